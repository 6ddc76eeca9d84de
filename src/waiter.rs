use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::compute::{ComputeApi, Location, Operation};
use crate::error::ClaimError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How often to poll and, optionally, how long to keep polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_wait: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PollOutcome {
    Succeeded,
    Failed,
    InFlight,
}

// An error payload fails the operation whatever its status says.
fn classify(operation: &Operation) -> PollOutcome {
    if operation.is_failed() {
        PollOutcome::Failed
    } else if operation.is_done() {
        PollOutcome::Succeeded
    } else {
        PollOutcome::InFlight
    }
}

/// Blocks until a zonal operation reaches a terminal state.
pub struct OperationWaiter<'a, C: ComputeApi + ?Sized> {
    compute: &'a C,
    policy: WaitPolicy,
}

impl<'a, C: ComputeApi + ?Sized> OperationWaiter<'a, C> {
    pub fn new(compute: &'a C, policy: WaitPolicy) -> Self {
        Self { compute, policy }
    }

    pub async fn wait(&self, location: &Location, operation: &str) -> Result<Operation, ClaimError> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            let current = self.compute.get_operation(location, operation).await?;
            polls += 1;
            debug!("Operation {} is {:?} (poll {})", operation, current.status, polls);

            match classify(&current) {
                PollOutcome::Succeeded => {
                    info!("Operation {} finished after {} poll(s)", operation, polls);
                    return Ok(current);
                }
                PollOutcome::Failed => {
                    debug!("Operation {} error payload: {:?}", operation, current.error);
                    return Err(ClaimError::OperationFailed {
                        operation: operation.to_string(),
                    });
                }
                PollOutcome::InFlight => {}
            }

            if let Some(max_wait) = self.policy.max_wait {
                let waited = started.elapsed();
                if waited >= max_wait {
                    warn!("Gave up waiting for operation {} after {:?}", operation, waited);
                    return Err(ClaimError::Timeout {
                        operation: operation.to_string(),
                        waited,
                    });
                }
            }

            sleep(self.policy.interval).await;
        }
    }
}
