//! Convergence polling.
//!
//! Re-evaluate a status check at a fixed interval until it reports
//! [`Convergence::Converged`]. Errors from the check itself abort the wait;
//! they are never read as "not converged yet".

use crate::gateway::{InstanceRecord, Lookup};
use crate::utils::{AccordError, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    Converged,
    Pending,
}

#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    /// `None` waits indefinitely
    max_wait: Option<Duration>,
}

impl Poller {
    pub fn new(interval: Duration, max_wait: Option<Duration>) -> Self {
        Self { interval, max_wait }
    }

    /// Poll `check` until it converges. Returns the number of evaluations.
    pub async fn wait_until<F, Fut>(&self, condition: &str, mut check: F) -> Result<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Convergence>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if check().await? == Convergence::Converged {
                debug!(condition, attempts, "Converged");
                return Ok(attempts);
            }

            if let Some(max_wait) = self.max_wait {
                if started.elapsed() >= max_wait {
                    return Err(AccordError::PollTimeout {
                        condition: condition.to_string(),
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Instances whose name contains `marker`.
pub fn matching<'a>(instances: &'a [InstanceRecord], marker: &str) -> Lookup<Vec<&'a InstanceRecord>> {
    Lookup::from_vec(instances.iter().filter(|i| i.name.contains(marker)).collect())
}

/// Instances not in the Running state.
pub fn not_running(instances: &[InstanceRecord]) -> Lookup<Vec<&InstanceRecord>> {
    Lookup::from_vec(instances.iter().filter(|i| !i.is_running()).collect())
}

/// Scale-up target: a matching instance is Running.
pub fn scaled_up(instances: &[InstanceRecord], marker: &str) -> Convergence {
    match matching(instances, marker) {
        Lookup::Found(found) if found.iter().any(|i| i.is_running()) => Convergence::Converged,
        _ => Convergence::Pending,
    }
}

/// Scale-down target: no matching instance is listed at all.
pub fn scaled_down(instances: &[InstanceRecord], marker: &str) -> Convergence {
    match matching(instances, marker) {
        Lookup::NoneFound => Convergence::Converged,
        Lookup::Found(_) => Convergence::Pending,
    }
}

/// Restart target: every listed instance is Running.
pub fn all_running(instances: &[InstanceRecord]) -> Convergence {
    match not_running(instances) {
        Lookup::NoneFound => Convergence::Converged,
        Lookup::Found(_) => Convergence::Pending,
    }
}
