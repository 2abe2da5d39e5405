mod app;
pub mod claims;
pub mod error;
pub mod gateway;
pub mod http;
pub mod notifications;
mod redact;
pub mod settings;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

pub use app::{Client, ClientBuildError};
pub use error::{ApiError, ErrorKind};
pub use gateway::{Attempt, Gateway};
