//! Kiosk control daemon library - exposes modules for testing.

pub mod controller;
pub mod diagnostics;
pub mod executor;
pub mod fake;
pub mod health;
pub mod privileges;
pub mod retry;
pub mod state;

pub use controller::SystemController;
pub use executor::{BoundedExecutor, ProcessSpawner, TokioSpawner};
pub use state::{Operation, Phase, StateSnapshot, SystemState};
