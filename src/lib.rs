pub mod config;
pub mod dispatch;
pub mod error;
pub mod log;
pub mod util;

pub use config::{Config, ProviderConfig, ProviderKind};
pub use dispatch::{Dispatcher, ExecutionResult, ParsedResult};
pub use error::{Error, ProviderFailure, Result};
