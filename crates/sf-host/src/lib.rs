// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Model Client Pool: a narrow client trait for text/embedding/vision
//! model calls, a mock implementation for tests, and a pool that adds
//! per-kind rate limiting and bounded retry.
#![deny(unsafe_code)]

pub mod client;
pub mod pool;
pub mod retry;

pub use client::{ModelClient, ModelError, ModelKind, MockModelClient};
pub use pool::{ModelClientPool, RateGateConfig};
pub use retry::RetryConfig;
