//! # Taskloop Core Library
//!
//! Bounded-concurrency orchestration of multi-phase attempts: a confirmation
//! poller, the per-attempt workflow executor and the task orchestrator that
//! launches attempts until a success target or an attempt budget is reached.

pub mod models;
pub mod services;
pub mod workflow;
