pub mod client;
pub mod session;
pub mod types;

pub use client::ApiClient;
pub use session::{Phase, SessionController, SessionGate, SESSION_TOKEN_HEADER};
pub use types::*;
