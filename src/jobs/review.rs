use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ErrorCode, OpError};
use crate::jobs::poller::{poll_until_terminal, JobState, PollOptions};
use crate::session::types::Session;
use crate::uploads::UploadLedger;
use crate::vendor::{Finding, VendorClient};

/// Knobs for one review run. Category filters are passed to the vendor
/// verbatim; timing feeds the poll budget.
#[derive(Debug, Clone)]
pub struct ReviewOptions {
    pub categories: Vec<String>,
    pub max_wait: Duration,
    pub interval: Duration,
}

impl Default for ReviewOptions {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            max_wait: Duration::from_secs(120),
            interval: Duration::from_secs(2),
        }
    }
}

/// Findings rolled up the way callers consume them: a total plus counts
/// grouped by rule and by page.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewSummary {
    pub review_id: String,
    pub total: usize,
    pub by_rule: BTreeMap<String, usize>,
    pub by_page: BTreeMap<String, usize>,
    pub findings: Vec<Finding>,
}

/// Outcome of a review run. A timeout is not a failure: it carries the
/// `job_timeout` code plus the review id so the caller can keep checking
/// out-of-band, and the upload stays registered for a resumed run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReviewRunResult {
    Completed(ReviewSummary),
    TimedOut {
        code: ErrorCode,
        review_id: String,
        checks: u32,
    },
}

impl ReviewRunResult {
    fn timed_out(review_id: String, checks: u32) -> Self {
        ReviewRunResult::TimedOut {
            code: ErrorCode::JobTimeout,
            review_id,
            checks,
        }
    }
}

/// End-to-end compliance review: resolve the upload, push it to the vendor,
/// create the job, poll to a terminal state, then release the upload.
#[derive(Debug, Clone)]
pub struct ReviewWorkflow {
    ledger: UploadLedger,
    vendor: VendorClient,
}

impl ReviewWorkflow {
    pub fn new(ledger: UploadLedger, vendor: VendorClient) -> Self {
        Self { ledger, vendor }
    }

    pub async fn run(
        &self,
        session: &Session,
        upload_id: &str,
        opts: ReviewOptions,
    ) -> Result<ReviewRunResult, OpError> {
        let vendor_creds = session
            .completed()
            .and_then(|c| c.vendor.clone())
            .ok_or_else(|| {
                OpError::new(
                    ErrorCode::InvalidSession,
                    "session carries no vendor credentials",
                )
            })?;

        let upload = self.ledger.get(upload_id).await.ok_or_else(|| {
            OpError::new(
                ErrorCode::UploadNotFound,
                format!("upload {upload_id} is unknown, expired, or already consumed"),
            )
        })?;
        let bytes = upload.read_bytes().await.map_err(OpError::from)?;

        let base = vendor_creds.api_base_url.trim_end_matches('/').to_string();
        let file_id = self
            .vendor
            .upload_file(&base, &vendor_creds.sid, &upload.filename, &bytes)
            .await
            .map_err(OpError::from)?;
        let review_id = self
            .vendor
            .create_review(&base, &vendor_creds.sid, &file_id, &opts.categories)
            .await
            .map_err(OpError::from)?;
        info!(review_id = %review_id, upload_id, "review job created; polling");

        let outcome = poll_until_terminal(
            || self.vendor.review_status(&base, &vendor_creds.sid, &review_id),
            PollOptions::new(opts.max_wait, opts.interval),
        )
        .await
        .map_err(OpError::from)?;

        if outcome.timed_out {
            warn!(review_id = %review_id, checks = outcome.checks, "review poll timed out");
            return Ok(ReviewRunResult::timed_out(review_id, outcome.checks));
        }

        match outcome.state.state {
            JobState::Completed => {
                // One-shot: the upload id is dead after a completed run.
                self.ledger.consume(upload_id).await;
                let summary = summarize(review_id, outcome.state.findings);
                info!(
                    review_id = %summary.review_id,
                    total = summary.total,
                    checks = outcome.checks,
                    "review completed"
                );
                Ok(ReviewRunResult::Completed(summary))
            }
            JobState::Failed | JobState::Error => {
                let detail = outcome
                    .state
                    .detail
                    .unwrap_or_else(|| "no detail reported".to_string());
                Err(OpError::new(
                    ErrorCode::JobFailed,
                    format!("review {review_id} failed: {detail}"),
                ))
            }
            // The poller never hands back a pending state unless the wait
            // budget ran out, which the branch above already covered.
            JobState::Pending => Ok(ReviewRunResult::timed_out(review_id, outcome.checks)),
        }
    }
}

fn summarize(review_id: String, findings: Vec<Finding>) -> ReviewSummary {
    let mut by_rule: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_page: BTreeMap<String, usize> = BTreeMap::new();
    for finding in &findings {
        *by_rule.entry(finding.rule.clone()).or_default() += 1;
        let page = finding
            .page
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        *by_page.entry(page).or_default() += 1;
    }
    ReviewSummary {
        review_id,
        total: findings.len(),
        by_rule,
        by_page,
        findings,
    }
}
