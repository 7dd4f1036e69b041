pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod services;
pub mod session;

pub use config::Config;
pub use context::ChatContext;
pub use error::{AppError, AppResult, GatewayError, GatewayResult};
pub use session::{IdentityState, SessionProvider};
