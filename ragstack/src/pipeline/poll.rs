//! Bounded readiness polling.
//!
//! Every resource this crate provisions settles into one of three shapes:
//! ready, failed, or still going. [`wait`] polls a state function at a fixed
//! interval until one of the first two holds or the attempt ceiling is hit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::errors::{DeployError, Result};

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Attempt ceiling and interval for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Maximum polls, including the first.
    pub max_attempts: usize,
    /// Sleep between polls.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::fast()
    }
}

impl PollConfig {
    /// Creates a poll config.
    #[must_use]
    pub const fn new(max_attempts: usize, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Quick resources such as roles and listings: 30 attempts.
    #[must_use]
    pub const fn fast() -> Self {
        Self::new(30, DEFAULT_POLL_INTERVAL)
    }

    /// Provisioning (stacks, endpoints, services, builds): 120 attempts.
    #[must_use]
    pub const fn provisioning() -> Self {
        Self::new(120, DEFAULT_POLL_INTERVAL)
    }

    /// Fine-tuning jobs: 360 attempts.
    #[must_use]
    pub const fn fine_tuning() -> Self {
        Self::new(360, DEFAULT_POLL_INTERVAL)
    }

    /// Non-critical teardown waits: 60 attempts.
    #[must_use]
    pub const fn teardown() -> Self {
        Self::new(60, DEFAULT_POLL_INTERVAL)
    }

    /// Sets the interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the attempt ceiling.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<S> {
    /// The ready predicate held.
    Ready(S),
    /// The failure predicate held.
    Failed(S),
    /// The ceiling was reached; carries the last observed state.
    TimedOut(S),
}

impl<S> PollOutcome<S> {
    /// Returns true for `Ready`.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The state carried by any variant.
    #[must_use]
    pub fn state(&self) -> &S {
        match self {
            Self::Ready(s) | Self::Failed(s) | Self::TimedOut(s) => s,
        }
    }
}

impl<S: fmt::Display> PollOutcome<S> {
    /// Converts to a result, for waits on the critical path.
    ///
    /// `Failed` becomes [`DeployError::TerminalState`] and `TimedOut` becomes
    /// [`DeployError::TimedOut`] carrying the last state.
    pub fn into_result(self, resource: &str, config: &PollConfig) -> Result<S> {
        match self {
            Self::Ready(state) => Ok(state),
            Self::Failed(state) => Err(DeployError::terminal(resource, state.to_string())),
            Self::TimedOut(state) => Err(DeployError::TimedOut {
                resource: resource.to_string(),
                attempts: config.max_attempts,
                last_state: state.to_string(),
            }),
        }
    }
}

/// Observed lifecycle state of a resource.
///
/// `Unknown` stands in for a poll whose query failed, so a transient error
/// is never mistaken for a deletion.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResourceState {
    /// The query failed.
    #[default]
    Unknown,
    /// The resource does not exist.
    Absent,
    /// The resource exists with this status.
    Present(String),
}

impl ResourceState {
    /// Maps a lookup result to a state.
    pub fn from_lookup<T>(found: Option<T>, status: impl FnOnce(&T) -> String) -> Self {
        found.map_or(Self::Absent, |item| Self::Present(status(&item)))
    }

    /// The status string, if present.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        match self {
            Self::Present(status) => Some(status),
            Self::Unknown | Self::Absent => None,
        }
    }

    /// Returns true if the resource is present with one of `statuses`.
    #[must_use]
    pub fn is_in(&self, statuses: &[&str]) -> bool {
        self.status().is_some_and(|s| statuses.contains(&s))
    }

    /// Returns true if the resource is known to be gone.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Absent => write!(f, "ABSENT"),
            Self::Present(status) => write!(f, "{status}"),
        }
    }
}

/// Polls until `is_ready` or `is_failed` holds, at most `max_attempts` times.
///
/// A poll error is logged and replaced by `S::default()`; the loop keeps
/// going. There is no sleep after the last attempt.
pub async fn wait<S, E, F, Fut, R, X>(
    label: &str,
    config: &PollConfig,
    mut poll: F,
    is_ready: R,
    is_failed: X,
) -> PollOutcome<S>
where
    S: Default + fmt::Debug,
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<S, E>>,
    R: Fn(&S) -> bool,
    X: Fn(&S) -> bool,
{
    let mut last = S::default();

    for attempt in 1..=config.max_attempts {
        let state = match poll().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(resource = label, attempt, error = %e, "poll failed, state unknown");
                S::default()
            }
        };

        if is_ready(&state) {
            tracing::debug!(resource = label, attempt, state = ?state, "ready");
            return PollOutcome::Ready(state);
        }
        if is_failed(&state) {
            tracing::warn!(resource = label, attempt, state = ?state, "terminal failure state");
            return PollOutcome::Failed(state);
        }

        tracing::debug!(
            resource = label,
            attempt,
            max_attempts = config.max_attempts,
            state = ?state,
            "waiting"
        );
        last = state;
        if attempt < config.max_attempts {
            tokio::time::sleep(config.interval).await;
        }
    }

    tracing::warn!(resource = label, attempts = config.max_attempts, last_state = ?last, "wait timed out");
    PollOutcome::TimedOut(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quick(max: usize) -> PollConfig {
        PollConfig::new(max, Duration::ZERO)
    }

    fn scripted(states: Vec<&'static str>) -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<std::result::Result<ResourceState, String>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let poll = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let status = states.get(n).or(states.last()).copied().unwrap_or("PENDING");
            std::future::ready(Ok(ResourceState::Present(status.to_string())))
        };
        (calls, poll)
    }

    #[test]
    fn test_presets() {
        assert_eq!(PollConfig::fast().max_attempts, 30);
        assert_eq!(PollConfig::provisioning().max_attempts, 120);
        assert_eq!(PollConfig::fine_tuning().max_attempts, 360);
        assert_eq!(PollConfig::teardown().max_attempts, 60);
        assert_eq!(PollConfig::default().interval, Duration::from_secs(5));
    }

    #[test]
    fn test_ready_on_first_poll_never_sleeps() {
        let (calls, poll) = scripted(vec!["InService"]);
        let outcome = tokio_test::block_on(wait(
            "pt",
            &PollConfig::new(3, Duration::from_secs(3600)),
            poll,
            |s: &ResourceState| s.is_in(&["InService"]),
            |s| s.is_in(&["Failed"]),
        ));

        assert!(outcome.is_ready());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ready_after_exactly_n_polls() {
        let (calls, poll) = scripted(vec!["CREATING", "CREATING", "ACTIVE"]);
        let outcome = wait(
            "kb",
            &quick(10),
            poll,
            |s: &ResourceState| s.is_in(&["ACTIVE"]),
            |s| s.is_in(&["FAILED"]),
        )
        .await;

        assert_eq!(outcome, PollOutcome::Ready(ResourceState::Present("ACTIVE".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timed_out_after_exactly_max_polls() {
        let (calls, poll) = scripted(vec!["CREATING"]);
        let outcome = wait(
            "stack",
            &quick(7),
            poll,
            |s: &ResourceState| s.is_in(&["CREATE_COMPLETE"]),
            |s| s.is_in(&["CREATE_FAILED"]),
        )
        .await;

        assert_eq!(outcome, PollOutcome::TimedOut(ResourceState::Present("CREATING".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_failed_state_stops_early() {
        let (calls, poll) = scripted(vec!["InProgress", "Failed", "Completed"]);
        let outcome = wait(
            "job",
            &quick(10),
            poll,
            |s: &ResourceState| s.is_in(&["Completed"]),
            |s| s.is_in(&["Failed", "Stopped", "Stopping"]),
        )
        .await;

        assert!(matches!(outcome, PollOutcome::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_poll_errors_become_unknown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let outcome = wait(
            "pt",
            &quick(5),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("throttled".to_string())
                    } else {
                        Ok(ResourceState::Absent)
                    }
                }
            },
            ResourceState::is_absent,
            |_| false,
        )
        .await;

        assert_eq!(outcome, PollOutcome::Ready(ResourceState::Absent));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_never_read_as_absent() {
        let outcome = wait(
            "collection",
            &quick(3),
            || async { Err::<ResourceState, _>("boom") },
            ResourceState::is_absent,
            |_| false,
        )
        .await;

        assert_eq!(outcome, PollOutcome::TimedOut(ResourceState::Unknown));
    }

    #[test]
    fn test_into_result() {
        let config = quick(4);
        let ready: PollOutcome<ResourceState> = PollOutcome::Ready(ResourceState::Absent);
        assert!(ready.into_result("x", &config).is_ok());

        let failed = PollOutcome::Failed(ResourceState::Present("CREATE_FAILED".into()));
        let err = failed.into_result("stack", &config).unwrap_err();
        assert_eq!(err.kind(), "terminal_state");

        let timed_out = PollOutcome::TimedOut(ResourceState::Present("Creating".into()));
        match timed_out.into_result("pt", &config).unwrap_err() {
            DeployError::TimedOut {
                attempts,
                last_state,
                ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_state, "Creating");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resource_state_helpers() {
        let state = ResourceState::from_lookup(Some("ACTIVE"), |s| (*s).to_string());
        assert_eq!(state.status(), Some("ACTIVE"));
        assert!(state.is_in(&["ACTIVE", "UPDATING"]));
        assert_eq!(ResourceState::from_lookup(None::<&str>, |s| (*s).to_string()), ResourceState::Absent);
        assert_eq!(ResourceState::Unknown.to_string(), "UNKNOWN");
    }
}
