//! Common utilities and types shared by the Voty crates

pub mod config;
pub mod error;
pub mod logging;
pub mod utils;

pub use config::{Configuration, LogConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
