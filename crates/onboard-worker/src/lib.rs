//! Onboard Worker - drives pending processes through the process engine
//!
//! Composition code registers its workflow definitions, opens the stores
//! with [`connect_stores`] and hands both to a [`ProcessWorker`].

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod stores;
pub mod telemetry;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use stores::{connect_stores, Stores};
pub use worker::{ProcessWorker, WorkerPassSummary};
