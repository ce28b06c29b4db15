pub mod poller;
pub mod review;

pub use poller::{poll_until_terminal, JobState, PollOptions, PollOutcome, PollState};
pub use review::{ReviewOptions, ReviewRunResult, ReviewSummary, ReviewWorkflow};
