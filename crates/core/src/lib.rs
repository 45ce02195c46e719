pub mod config;
pub mod error;
pub mod event;

pub use config::Config;
pub use error::CoreError;
pub use event::*;
