use crate::error::BootstrapError;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    time::Duration,
};
use tokio::time;

/// Every network suspension point of a bootstrap run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    PlatformInit,
    TokenExchange,
    ProfileFetch,
    TimezoneSync,
    PromotionCheck,
}

impl Step {
    pub fn label(self) -> &'static str {
        match self {
            Step::PlatformInit => "platform init",
            Step::TokenExchange => "token exchange",
            Step::ProfileFetch => "profile fetch",
            Step::TimezoneSync => "timezone sync",
            Step::PromotionCheck => "promotion check",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Races `operation` against `deadline`.
///
/// When the deadline wins, the operation future is dropped and its result is
/// never observed. Work the collaborator started on its own (a host SDK
/// promise, a request already on the wire) is not cancelled by this; the
/// orchestrator's mount guard is what keeps such late completions from
/// touching state.
pub async fn race<T, E, F>(
    step: Step,
    deadline: Duration,
    operation: F,
) -> Result<T, BootstrapError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<BootstrapError>,
{
    match time::timeout(deadline, operation).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!(%step, deadline_ms = deadline.as_millis() as u64, "step timed out");
            Err(BootstrapError::Timeout {
                step,
                after: deadline,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::error::ServiceError;
    use futures::future::pending;

    #[tokio::test(start_paused = true)]
    async fn race__returns_value_when_operation_finishes_first() {
        // given
        let operation = async {
            time::sleep(Duration::from_millis(10)).await;
            Ok::<_, ServiceError>(7)
        };

        // when
        let result = race(Step::ProfileFetch, Duration::from_millis(5000), operation).await;

        // then
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn race__fails_with_labelled_timeout_when_deadline_wins() {
        // given
        let operation = pending::<Result<(), ServiceError>>();

        // when
        let result = race(Step::PlatformInit, Duration::from_millis(5000), operation).await;

        // then
        match result {
            Err(BootstrapError::Timeout { step, after }) => {
                assert_eq!(step, Step::PlatformInit);
                assert_eq!(after, Duration::from_millis(5000));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn race__passes_operation_errors_through() {
        // given
        let operation = async { Err::<(), _>(ServiceError::with_status(500, "boom")) };

        // when
        let result = race(Step::TokenExchange, Duration::from_millis(5000), operation).await;

        // then
        assert!(matches!(result, Err(BootstrapError::Service(inner)) if inner.status == Some(500)));
    }
}
