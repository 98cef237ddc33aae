#![doc = include_str!("../README.md")]

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod session;
pub mod token;
pub mod transport;
pub mod types;

// Re-exports for convenient access
pub use channel::{ChannelState, LoginCancel, PushLogin};
pub use config::SessionConfig;
pub use error::Error;
pub use event::LoginEvent;
pub use fingerprint::generate_fingerprint;
pub use session::{AuthenticatedUser, QrLogin, RecoveryCode, SessionService};
pub use token::TokenState;
pub use transport::{AccessResponse, ApiRequest, ApiResponse, Transport};
pub use types::{LoginCode, LoginHandle};
