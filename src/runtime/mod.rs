//! Continuous-loop drivers: long polling and the minute-granularity worker.

pub mod polling;
pub mod worker;

pub use polling::PollingLoop;
pub use worker::WorkerLoop;
