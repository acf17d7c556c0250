//! Pull-request boundary.
//!
//! Opening the pull request on the hosted platform is an external
//! collaborator's job; the core only defines the seam and consumes its
//! result. The PR-open worker converts a failure here into `PR_FAILED`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mendflow_agent::{CodeResult, JobContext};
use thiserror::Error;

/// Errors from the pull-request collaborator.
#[derive(Debug, Error)]
pub enum PullRequestError {
    #[error("{provider} error: {message}")]
    Provider { provider: String, message: String },
}

impl PullRequestError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// A pull request that was opened.
#[derive(Debug, Clone)]
pub struct OpenedPullRequest {
    pub number: i64,
    pub url: String,
}

/// The collaborator that turns an approved change set into a pull request.
#[async_trait]
pub trait PullRequestOpener: Send + Sync {
    async fn open_pull_request(
        &self,
        ctx: &JobContext,
        code: &CodeResult,
    ) -> Result<OpenedPullRequest, PullRequestError>;
}

/// Deterministic opener for tests: PR number derived from the issue number.
#[derive(Default)]
pub struct MockPullRequestOpener {
    pub fail: bool,
    pub delay: Duration,
    calls: AtomicUsize,
}

impl MockPullRequestOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PullRequestOpener for MockPullRequestOpener {
    async fn open_pull_request(
        &self,
        ctx: &JobContext,
        _code: &CodeResult,
    ) -> Result<OpenedPullRequest, PullRequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(PullRequestError::provider(
                "Mock",
                "pull request creation failed by configuration",
            ));
        }
        Ok(OpenedPullRequest {
            number: ctx.issue_number + 1000,
            url: format!(
                "https://example.test/{}/pull/{}",
                ctx.repository_id,
                ctx.issue_number + 1000
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mendflow_agent::CodeResult;

    fn context() -> JobContext {
        JobContext {
            job_id: "job-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            repository_id: "repo-1".to_string(),
            issue_number: 123,
            issue_title: "Test Issue".to_string(),
            issue_body: String::new(),
            issue_url: String::new(),
        }
    }

    fn code() -> CodeResult {
        CodeResult {
            changes: vec![],
            commit_message: "Fix issue #123".to_string(),
            branch: "mendflow/issue-123".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_mock_opener_derives_pr_from_issue() {
        let opener = MockPullRequestOpener::new();
        let pr = opener.open_pull_request(&context(), &code()).await.unwrap();
        assert_eq!(pr.number, 1123);
        assert!(pr.url.contains("pull/1123"));
        assert_eq!(opener.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_opener_failure() {
        let opener = MockPullRequestOpener::failing();
        let result = opener.open_pull_request(&context(), &code()).await;
        assert!(matches!(result, Err(PullRequestError::Provider { .. })));
    }
}
