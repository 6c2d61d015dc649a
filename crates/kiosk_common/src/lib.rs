//! Kiosk Common - shared types, errors, allowlist and configuration for
//! the kiosk control service.

pub mod config;
pub mod error;
pub mod policy;
pub mod types;

pub use config::Config;
pub use error::{ControlError, ControlResult, ErrorKind};
pub use policy::{AllowlistEntry, CommandPolicy};
pub use types::*;
