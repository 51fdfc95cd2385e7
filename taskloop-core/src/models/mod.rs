//! Data models for taskloop

pub mod configuration;
pub mod run;

pub use configuration::*;
pub use run::*;
