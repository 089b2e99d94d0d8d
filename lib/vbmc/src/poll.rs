// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded polling for hypervisor conditions.
//!
//! Starting a VM is asynchronous at the hypervisor level, so the controller
//! has to poll for the launch session to finish acquiring the machine. The
//! wait here is explicitly bounded: a fixed sleep between attempts and a
//! maximum attempt count, after which the wait fails with a defined timeout
//! outcome instead of spinning forever. Dropping the returned future
//! cancels the wait.

use std::future::Future;
use std::time::Duration;

use slog::{debug, Logger};
use thiserror::Error;

use crate::hypervisor::HypervisorError;

/// How often, and how many times, to poll a condition before giving up.
#[derive(Clone, Copy, Debug)]
pub struct PollPolicy {
    /// Sleep between attempts.
    pub interval: Duration,
    /// Attempts before the wait fails with [`WaitError::TimedOut`].
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    /// Two seconds between polls, bounded at 30 attempts. Long enough for a
    /// slow VM process launch, short enough that an IPMI client's own retry
    /// loop is not starved.
    fn default() -> Self {
        Self { interval: Duration::from_secs(2), max_attempts: 30 }
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("{what} was not reached within {attempts} attempts")]
    TimedOut { what: String, attempts: u32 },

    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),
}

/// Polls `poll_fn` until it reports the condition holds, sleeping
/// `policy.interval` between attempts.
///
/// A predicate error aborts the wait immediately; exhausting the attempt
/// budget yields [`WaitError::TimedOut`]. `what` names the awaited
/// condition in logs and in the timeout error.
pub async fn wait_until<F, Fut>(
    policy: &PollPolicy,
    log: &Logger,
    what: &str,
    mut poll_fn: F,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, HypervisorError>>,
{
    for attempt in 1..=policy.max_attempts {
        if poll_fn().await? {
            return Ok(());
        }
        debug!(log, "condition not yet reached";
               "what" => what,
               "attempt" => attempt,
               "max_attempts" => policy.max_attempts);
        tokio::time::sleep(policy.interval).await;
    }

    Err(WaitError::TimedOut {
        what: what.to_string(),
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn quick_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy { interval: Duration::from_secs(2), max_attempts }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_sleeping_when_condition_holds() {
        let mut calls = 0;
        wait_until(&quick_policy(5), &test_logger(), "test condition", || {
            calls += 1;
            async { Ok(true) }
        })
        .await
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_condition_holds() {
        let mut calls = 0;
        wait_until(&quick_policy(5), &test_logger(), "test condition", || {
            calls += 1;
            let done = calls >= 3;
            async move { Ok(done) }
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_attempts() {
        let mut calls = 0;
        let err = wait_until(
            &quick_policy(4),
            &test_logger(),
            "test condition",
            || {
                calls += 1;
                async { Ok(false) }
            },
        )
        .await
        .unwrap_err();
        assert_eq!(calls, 4);
        assert!(matches!(
            err,
            WaitError::TimedOut { attempts: 4, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_error_aborts_the_wait() {
        let mut calls = 0;
        let err = wait_until(
            &quick_policy(5),
            &test_logger(),
            "test condition",
            || {
                calls += 1;
                async {
                    Err(HypervisorError::Driver("daemon went away".to_string()))
                }
            },
        )
        .await
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, WaitError::Hypervisor(_)));
    }
}
