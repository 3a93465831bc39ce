// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Job Scheduler: per-kind FIFO queues, worker pools, dispatch rate
//! gates, and the cooperative-cancellation token registry that backs the
//! Job API's `cancel(id)`.
#![deny(unsafe_code)]

pub mod queue;
pub mod rate_limit;
pub mod scheduler;

pub use queue::{JobQueue, QueueError, QueueStats};
pub use rate_limit::RateGate;
pub use scheduler::{JobScheduler, KindConfig, SchedulerError};
