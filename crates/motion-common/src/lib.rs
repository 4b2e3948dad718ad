#![doc = "Common types shared across the motionctl workspace."]

pub mod config;
pub mod error;
pub mod mode;

pub use config::*;
pub use error::*;
pub use mode::*;
