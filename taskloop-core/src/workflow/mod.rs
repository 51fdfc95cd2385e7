//! Attempt workflow: poller, executor, orchestrator and their collaborators

pub mod executor;
pub mod identity;
pub mod orchestrator;
pub mod persistence;
pub mod poller;
pub mod result_sink;
pub mod simulated;

pub use executor::*;
pub use identity::*;
pub use orchestrator::*;
pub use persistence::*;
pub use poller::*;
pub use result_sink::*;
pub use simulated::*;
