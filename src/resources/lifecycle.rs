//! Machine teardown state machine.
//!
//! A running machine cannot be deleted. Teardown observes the machine, acts
//! on what it sees (stop, destroy, or wait) and observes again, until the
//! machine reports `destroyed` or the attempt budget runs out.
//!
//! [`transition`] is the pure decision table; [`Teardown`] drives it against
//! a [`MachineApi`].

use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::fly::{HttpReply, InstanceState, Machine, MachineApi, MachineApiError};

/// Default number of observe/act iterations.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default idle wait during transient states.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Action to take after an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do this iteration.
    None,
    /// Request a stop.
    Stop,
    /// Request destruction.
    Destroy,
    /// Teardown is finished.
    Complete,
}

/// What to do before the next observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Observe again right away.
    Immediate,
    /// Sleep for the poll interval first.
    Backoff,
}

/// Result of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Action to take.
    pub action: Action,
    /// Wait policy before the next observation.
    pub wait: Wait,
}

impl Transition {
    const fn new(action: Action, wait: Wait) -> Self {
        Self { action, wait }
    }

    /// Transition used when the machine could not be observed.
    #[must_use]
    pub const fn unobserved() -> Self {
        Self::new(Action::None, Wait::Backoff)
    }
}

/// Maps an observed machine state to the next step.
#[must_use]
pub const fn transition(observed: InstanceState) -> Transition {
    match observed {
        InstanceState::Started => Transition::new(Action::Stop, Wait::Immediate),
        InstanceState::Stopping | InstanceState::Destroying => {
            Transition::new(Action::None, Wait::Backoff)
        }
        InstanceState::Stopped => Transition::new(Action::Destroy, Wait::Immediate),
        InstanceState::Destroyed => Transition::new(Action::Complete, Wait::Immediate),
        InstanceState::Created | InstanceState::Starting | InstanceState::Unknown => {
            Transition::new(Action::None, Wait::Immediate)
        }
    }
}

/// Teardown failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TeardownError {
    /// The machine could not be observed.
    #[error("{0}")]
    GetInstanceFailed(String),

    /// The machine did not reach `destroyed` in time.
    #[error("max retries exceeded after {attempts} attempts{}", last_action_suffix(.last_action_error.as_deref()))]
    Timeout {
        /// Iterations run.
        attempts: u32,
        /// Most recent stop or destroy failure, if any.
        last_action_error: Option<String>,
    },
}

fn last_action_suffix(error: Option<&str>) -> String {
    error.map_or_else(String::new, |e| format!("; last action error: {e}"))
}

/// Counters of a successful teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Observations made, including the final one.
    pub attempts: u32,
    /// Stop requests sent.
    pub stops: u32,
    /// Destroy requests sent.
    pub destroys: u32,
    /// Backoff sleeps taken.
    pub waits: u32,
}

/// Teardown driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    /// Maximum observe/act iterations.
    pub max_attempts: u32,
    /// Sleep between observations during transient states.
    pub poll_interval: Duration,
}

impl Default for Teardown {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Teardown {
    /// Creates a driver with the given bounds.
    #[must_use]
    pub const fn new(max_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            max_attempts,
            poll_interval,
        }
    }

    /// Drives the machine to `destroyed`.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError::GetInstanceFailed`] if an observation fails at
    /// the transport level or returns an undecodable body, and
    /// [`TeardownError::Timeout`] if the attempt budget runs out.
    pub async fn run(
        &self,
        api: &dyn MachineApi,
        app: &str,
        id: &str,
    ) -> Result<TeardownReport, TeardownError> {
        let mut report = TeardownReport::default();
        let mut last_action_error = None;

        for attempt in 1..=self.max_attempts {
            report.attempts = attempt;

            let reply = api
                .get_machine(app, id)
                .await
                .map_err(|e| TeardownError::GetInstanceFailed(e.message))?;

            let step = if reply.status == 200 {
                let machine: Machine = reply.json().map_err(|e| {
                    TeardownError::GetInstanceFailed(format!(
                        "Failed to read machine response: {e}"
                    ))
                })?;
                debug!(machine = id, state = %machine.state, attempt, "Observed machine");
                transition(machine.state)
            } else {
                warn!(machine = id, status = reply.status, attempt, "Machine observation failed");
                Transition::unobserved()
            };

            match step.action {
                Action::Complete => {
                    info!(machine = id, attempts = attempt, "Machine destroyed");
                    return Ok(report);
                }
                Action::Stop => {
                    report.stops += 1;
                    if let Some(e) = action_error(api.stop_machine(app, id).await) {
                        warn!(machine = id, "Stop request failed: {e}");
                        last_action_error = Some(e);
                    }
                }
                Action::Destroy => {
                    report.destroys += 1;
                    if let Some(e) = action_error(api.delete_machine(app, id).await) {
                        warn!(machine = id, "Destroy request failed: {e}");
                        last_action_error = Some(e);
                    }
                }
                Action::None => {}
            }

            if step.wait == Wait::Backoff && attempt < self.max_attempts {
                report.waits += 1;
                sleep(self.poll_interval).await;
            }
        }

        Err(TeardownError::Timeout {
            attempts: self.max_attempts,
            last_action_error,
        })
    }
}

fn action_error(result: Result<HttpReply, MachineApiError>) -> Option<String> {
    match result {
        Ok(reply) if reply.is_success() => None,
        Ok(reply) => Some(reply.failure_detail()),
        Err(e) => Some(e.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fly::testing::ScriptedMachines;

    const NO_WAIT: Teardown = Teardown::new(DEFAULT_MAX_ATTEMPTS, Duration::ZERO);

    #[test]
    fn test_transition_table() {
        assert_eq!(transition(InstanceState::Started).action, Action::Stop);
        assert_eq!(transition(InstanceState::Stopped).action, Action::Destroy);
        assert_eq!(transition(InstanceState::Destroyed).action, Action::Complete);
        assert_eq!(transition(InstanceState::Stopping).wait, Wait::Backoff);
        assert_eq!(transition(InstanceState::Destroying).wait, Wait::Backoff);
        assert_eq!(
            transition(InstanceState::Starting),
            Transition::new(Action::None, Wait::Immediate)
        );
        assert_eq!(
            transition(InstanceState::Unknown),
            Transition::new(Action::None, Wait::Immediate)
        );
    }

    #[tokio::test]
    async fn test_scripted_teardown() {
        let api = ScriptedMachines::new().with_states(
            "148e",
            &[
                InstanceState::Started,
                InstanceState::Stopping,
                InstanceState::Stopped,
                InstanceState::Destroying,
                InstanceState::Destroyed,
            ],
        );

        let report = NO_WAIT.run(&api, "hello", "148e").await.expect("destroyed");

        assert_eq!(
            report,
            TeardownReport {
                attempts: 5,
                stops: 1,
                destroys: 1,
                waits: 2,
            }
        );
        assert_eq!(api.calls_to("stop"), 1);
        assert_eq!(api.calls_to("delete"), 1);
        assert_eq!(api.calls_to("get"), 5);
    }

    #[tokio::test]
    async fn test_timeout_after_max_attempts() {
        let api = ScriptedMachines::new().with_states("148e", &[InstanceState::Started]);

        let err = NO_WAIT.run(&api, "hello", "148e").await.expect_err("never destroyed");

        assert_eq!(
            err,
            TeardownError::Timeout {
                attempts: 10,
                last_action_error: None,
            }
        );
        assert_eq!(api.calls_to("get"), 10);
        assert_eq!(api.calls_to("stop"), 10);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_last_action_error() {
        let api = ScriptedMachines::new()
            .with_states("148e", &[InstanceState::Stopped])
            .with_delete_reply(403, serde_json::json!({ "error": "unauthorized" }));

        let err = Teardown::new(3, Duration::ZERO)
            .run(&api, "hello", "148e")
            .await
            .expect_err("never destroyed");

        match err {
            TeardownError::Timeout {
                attempts,
                last_action_error: Some(detail),
            } => {
                assert_eq!(attempts, 3);
                assert!(detail.starts_with("403 Forbidden"));
                assert!(detail.contains("unauthorized"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_does_not_sleep_after_last_attempt() {
        let api = ScriptedMachines::new().with_states("148e", &[InstanceState::Stopping]);
        let slow = Teardown::new(1, Duration::from_secs(30));

        let err = tokio::time::timeout(Duration::from_secs(5), slow.run(&api, "hello", "148e"))
            .await
            .expect("returns without a final backoff")
            .expect_err("never destroyed");

        assert_eq!(
            err,
            TeardownError::Timeout {
                attempts: 1,
                last_action_error: None,
            }
        );
        assert_eq!(api.calls_to("get"), 1);
    }

    #[tokio::test]
    async fn test_get_transport_error_stops_immediately() {
        let api = ScriptedMachines::new().with_get_error("connection reset");

        let err = NO_WAIT.run(&api, "hello", "148e").await.expect_err("fails");

        assert_eq!(
            err,
            TeardownError::GetInstanceFailed(String::from("connection reset"))
        );
        assert_eq!(api.calls_to("get"), 1);
    }

    #[tokio::test]
    async fn test_non_200_observation_backs_off() {
        let api = ScriptedMachines::new()
            .with_get_reply(503, serde_json::json!({ "error": "busy" }))
            .with_states("148e", &[InstanceState::Destroyed]);

        let report = NO_WAIT.run(&api, "hello", "148e").await.expect("destroyed");

        assert_eq!(report.attempts, 2);
        assert_eq!(report.waits, 1);
    }
}
