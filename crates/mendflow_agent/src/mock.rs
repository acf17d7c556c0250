//! Mock agent for deterministic pipeline testing.
//!
//! Produces stable structured outputs derived from the job context, without
//! network calls. Failure and rejection behavior is configurable so tests
//! can drive every worker path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    Agent, AgentError, ChangeOperation, CodeResult, Complexity, FileChange, JobContext,
    PlanResult, ReviewResult,
};

/// Behavior knobs for [`MockAgent`].
#[derive(Debug, Clone)]
pub struct MockAgentConfig {
    /// Artificial delay before every call (simulates thinking time)
    pub delay: Duration,
    /// Fail the planning capability
    pub fail_planning: bool,
    /// Fail the coding capability
    pub fail_coding: bool,
    /// Fail the review capability
    pub fail_review: bool,
    /// Review completes but rejects the change set
    pub reject_review: bool,
}

impl Default for MockAgentConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(50),
            fail_planning: false,
            fail_coding: false,
            fail_review: false,
            reject_review: false,
        }
    }
}

/// Deterministic agent with configurable failures.
#[derive(Default)]
pub struct MockAgent {
    config: MockAgentConfig,
    plan_calls: AtomicUsize,
    code_calls: AtomicUsize,
    review_calls: AtomicUsize,
}

impl MockAgent {
    pub fn new(config: MockAgentConfig) -> Self {
        Self {
            config,
            plan_calls: AtomicUsize::new(0),
            code_calls: AtomicUsize::new(0),
            review_calls: AtomicUsize::new(0),
        }
    }

    /// How many times `plan` was invoked.
    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    /// How many times `code` was invoked.
    pub fn code_calls(&self) -> usize {
        self.code_calls.load(Ordering::SeqCst)
    }

    /// How many times `review` was invoked.
    pub fn review_calls(&self) -> usize {
        self.review_calls.load(Ordering::SeqCst)
    }

    async fn think(&self) {
        if !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        "Mock"
    }

    async fn plan(&self, ctx: &JobContext) -> Result<PlanResult, AgentError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.think().await;

        if self.config.fail_planning {
            return Err(AgentError::provider("Mock", "planning failed by configuration"));
        }

        Ok(PlanResult {
            summary: format!("Plan for issue #{}: {}", ctx.issue_number, ctx.issue_title),
            steps: vec![
                "Reproduce the reported behavior".to_string(),
                "Apply the fix".to_string(),
                "Extend the tests".to_string(),
            ],
            files_changed: vec![format!("src/issue_{}.rs", ctx.issue_number)],
            estimated_complexity: Complexity::Low,
            metadata: serde_json::json!({ "issue_number": ctx.issue_number }),
        })
    }

    async fn code(&self, ctx: &JobContext, plan: &PlanResult) -> Result<CodeResult, AgentError> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        self.think().await;

        if self.config.fail_coding {
            return Err(AgentError::provider("Mock", "coding failed by configuration"));
        }

        Ok(CodeResult {
            changes: plan
                .files_changed
                .iter()
                .map(|path| FileChange {
                    path: path.clone(),
                    operation: ChangeOperation::Update,
                    content: Some(format!("// fix for issue #{}\n", ctx.issue_number)),
                    original_content: Some(String::new()),
                })
                .collect(),
            commit_message: format!("Fix issue #{}", ctx.issue_number),
            branch: format!("mendflow/issue-{}", ctx.issue_number),
            metadata: serde_json::json!({ "issue_number": ctx.issue_number }),
        })
    }

    async fn review(
        &self,
        ctx: &JobContext,
        _plan: &PlanResult,
        code: &CodeResult,
    ) -> Result<ReviewResult, AgentError> {
        self.review_calls.fetch_add(1, Ordering::SeqCst);
        self.think().await;

        if self.config.fail_review {
            return Err(AgentError::provider("Mock", "review failed by configuration"));
        }

        if self.config.reject_review {
            return Ok(ReviewResult {
                approved: false,
                feedback: Some(format!(
                    "Changes for issue #{} need another pass",
                    ctx.issue_number
                )),
                suggested_changes: vec!["Handle the empty-input case".to_string()],
                security_issues: vec![],
                quality_score: 40,
                metadata: serde_json::json!({ "changes": code.changes.len() }),
            });
        }

        Ok(ReviewResult {
            approved: true,
            feedback: None,
            suggested_changes: vec![],
            security_issues: vec![],
            quality_score: 90,
            metadata: serde_json::json!({ "changes": code.changes.len() }),
        })
    }
}
