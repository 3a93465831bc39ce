// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wall-clock budget enforcement for a single job run.
//!
//! Narrowed from a general token/cost/turn/duration tracker down to
//! duration only: this orchestrator has no notion of tokens or spend,
//! just the soft/hard deadlines a job runs against.

use std::fmt;
use std::time::{Duration, Instant};

/// Soft and hard wall-clock deadlines for one job.
#[derive(Debug, Clone, Copy)]
pub struct BudgetLimit {
    pub soft_deadline: Duration,
    pub hard_deadline: Duration,
}

impl Default for BudgetLimit {
    fn default() -> Self {
        Self {
            soft_deadline: Duration::from_secs(25 * 60),
            hard_deadline: Duration::from_secs(30 * 60),
        }
    }
}

/// Tracks elapsed wall-clock time against a [`BudgetLimit`], started
/// once at job pickup.
pub struct BudgetTracker {
    limit: BudgetLimit,
    start: Instant,
}

impl BudgetTracker {
    #[must_use]
    pub fn start(limit: BudgetLimit) -> Self {
        Self {
            limit,
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    #[must_use]
    pub fn check(&self) -> BudgetStatus {
        let elapsed = self.elapsed();
        if elapsed >= self.limit.hard_deadline {
            BudgetStatus::Exceeded(elapsed)
        } else if elapsed >= self.limit.soft_deadline {
            BudgetStatus::Warning(elapsed)
        } else {
            BudgetStatus::WithinLimits
        }
    }
}

/// Result of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    WithinLimits,
    /// Past the soft deadline; the job should be allowed to keep running
    /// but is a candidate for a warning log.
    Warning(Duration),
    /// Past the hard deadline; the caller must treat this as a timeout.
    Exceeded(Duration),
}

impl fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WithinLimits => write!(f, "within limits"),
            Self::Warning(d) => write!(f, "past soft deadline at {:.1}s", d.as_secs_f64()),
            Self::Exceeded(d) => write!(f, "past hard deadline at {:.1}s", d.as_secs_f64()),
        }
    }
}
