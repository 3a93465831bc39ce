// SPDX-License-Identifier: MIT OR Apache-2.0
//! A sliding-window rate gate: at most `max_per_minute` acquisitions are
//! allowed to complete within any trailing 60-second window.
//!
//! Where a pipeline stage would reject a run that arrives over budget,
//! dispatch here instead waits for the window to clear. The scheduler
//! already has the job parked in its queue; turning the limit into a
//! dispatch delay is more useful than failing a job purely on timing.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct RateGate {
    max_per_minute: u32,
    timestamps: Mutex<Vec<Instant>>,
}

impl RateGate {
    /// `max_per_minute == 0` disables the gate: `acquire` never waits.
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            timestamps: Mutex::new(Vec::new()),
        }
    }

    /// Block until dispatching one more job keeps the trailing-60s count
    /// at or under `max_per_minute`.
    pub async fn acquire(&self) {
        if self.max_per_minute == 0 {
            return;
        }
        let window = Duration::from_secs(60);
        loop {
            let wait_for = {
                let mut ts = self.timestamps.lock().await;
                let now = Instant::now();
                ts.retain(|t| now.duration_since(*t) < window);
                if (ts.len() as u32) < self.max_per_minute {
                    ts.push(now);
                    None
                } else {
                    // Oldest entry is the next to fall out of the window.
                    ts.first().map(|oldest| window - now.duration_since(*oldest))
                }
            };
            match wait_for {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_gate_never_waits() {
        let gate = RateGate::new(0);
        for _ in 0..100 {
            gate.acquire().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gate_admits_up_to_limit_then_waits_for_window() {
        let gate = RateGate::new(2);
        gate.acquire().await;
        gate.acquire().await;

        let third = tokio::time::timeout(Duration::from_millis(10), gate.acquire()).await;
        assert!(third.is_err(), "third acquire should block within the window");

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::time::timeout(Duration::from_millis(10), gate.acquire())
            .await
            .expect("gate should admit once the window has elapsed");
    }
}
