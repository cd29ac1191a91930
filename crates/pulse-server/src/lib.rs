pub mod auth;
pub mod broadcaster;
pub mod client;
pub mod error;
pub mod handlers;
pub mod server;
pub mod wire;

pub use broadcaster::Broadcaster;
pub use error::ApiError;
pub use server::{start, start_with_clock, AppState, ServerConfig, ServerHandle};
