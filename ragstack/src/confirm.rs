//! Human-in-the-loop confirmation for costly or destructive actions.

use async_trait::async_trait;
use std::io::{BufRead, Write};

/// Decides whether a gated action may proceed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Returns true to proceed with `action`.
    async fn confirm(&self, action: &str) -> bool;
}

/// A fixed answer, for `--yes` and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, action: &str) -> bool {
        tracing::info!(action, approved = self.0, "confirmation pre-answered");
        self.0
    }
}

/// Prompts on the terminal and reads a `y/N` answer from stdin.
///
/// Anything other than `y` or `yes` declines, including EOF and read errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirmer;

impl StdinConfirmer {
    /// Creates a stdin confirmer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Parses a typed answer.
#[must_use]
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, action: &str) -> bool {
        let prompt = format!("{action} Proceed? [y/N] ");
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            // A prompt that cannot be shown still waits for input.
            let _ = write!(stderr, "{prompt}");
            let _ = stderr.flush();

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_affirmative(&line),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "could not read confirmation");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "confirmation prompt aborted");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative(" YES "));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("yep"));
    }

    #[tokio::test]
    async fn test_auto_confirm() {
        assert!(AutoConfirm(true).confirm("delete everything").await);
        assert!(!AutoConfirm(false).confirm("delete everything").await);
    }

    #[tokio::test]
    async fn test_mock_confirmer_sees_action() {
        let mut confirmer = MockConfirmer::new();
        confirmer
            .expect_confirm()
            .with(eq("Provision throughput"))
            .times(1)
            .return_const(false);

        assert!(!confirmer.confirm("Provision throughput").await);
    }
}
