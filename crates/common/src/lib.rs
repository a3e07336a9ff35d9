//! Common types and utilities shared by the arbiter crates

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::*;
pub use error::*;
pub use events::*;
pub use types::*;
