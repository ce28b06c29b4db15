use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::trace;

/// Remote job state as this crate sees it. `Pending` is the only
/// non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Completed,
    Error,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

/// Anything the poller can wait on. Implementations decide which of their
/// values mean "keep checking".
pub trait PollState {
    fn is_terminal(&self) -> bool;
}

impl PollState for JobState {
    fn is_terminal(&self) -> bool {
        JobState::is_terminal(self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub max_wait: Duration,
    pub interval: Duration,
}

impl PollOptions {
    pub fn new(max_wait: Duration, interval: Duration) -> Self {
        Self { max_wait, interval }
    }

    /// Exactly one check, no waiting. Used where readiness is driven by an
    /// external actor of unknown duration and the caller re-invokes.
    pub fn single_check() -> Self {
        Self {
            max_wait: Duration::ZERO,
            interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of a bounded poll. A timeout is a distinct, non-error result:
/// the job may still finish and can be checked again out-of-band.
#[derive(Debug)]
pub struct PollOutcome<S> {
    pub state: S,
    pub checks: u32,
    pub timed_out: bool,
}

/// Await `check` until it yields a terminal state or the wait budget runs
/// out, sleeping `interval` between checks. The first check is immediate,
/// so `max_wait == 0` means a single check.
pub async fn poll_until_terminal<S, F, Fut>(
    mut check: F,
    opts: PollOptions,
) -> anyhow::Result<PollOutcome<S>>
where
    S: PollState,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<S>>,
{
    let started = tokio::time::Instant::now();
    let mut checks: u32 = 1;
    let mut state = check().await?;

    while !state.is_terminal() {
        if started.elapsed() + opts.interval > opts.max_wait {
            trace!(checks, "poll budget exhausted");
            return Ok(PollOutcome {
                state,
                checks,
                timed_out: true,
            });
        }
        tokio::time::sleep(opts.interval).await;
        state = check().await?;
        checks += 1;
    }

    Ok(PollOutcome {
        state,
        checks,
        timed_out: false,
    })
}
