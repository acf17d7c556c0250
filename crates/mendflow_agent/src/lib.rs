//! Agent capability contract.
//!
//! This module provides a trait-based abstraction for the AI collaborators
//! that drive a job through its stages: `plan` analyzes the issue, `code`
//! produces the change set, `review` judges it. The pipeline only ever sees
//! this trait; a production binding fronts it with external LLM calls, and
//! [`mock::MockAgent`] drives tests.
//!
//! Agent operations are pure with respect to core state: they never touch
//! storage, never enqueue, never transition. A failed operation surfaces as
//! [`AgentError`] and the calling worker converts it into the stage's
//! failure event.

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// The provider rejected or could not complete the request
    #[error("{provider} error: {message}")]
    Provider { provider: String, message: String },

    /// The response could not be interpreted as the expected result shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Short text suitable for a job's error details.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Serialization(e.to_string())
    }
}

// =============================================================================
// Context
// =============================================================================

/// Everything an agent may know about the job it is working on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    pub job_id: String,
    pub tenant_id: String,
    pub repository_id: String,
    pub issue_number: i64,
    pub issue_title: String,
    pub issue_body: String,
    pub issue_url: String,
}

// =============================================================================
// Result Types
// =============================================================================

/// Estimated complexity of implementing an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Complexity::Low => write!(f, "low"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::High => write!(f, "high"),
        }
    }
}

/// Output of the planning stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub summary: String,
    pub steps: Vec<String>,
    pub files_changed: Vec<String>,
    pub estimated_complexity: Complexity,
    #[serde(default)]
    pub metadata: Value,
}

/// What a single change does to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

/// One file touched by the coding stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub operation: ChangeOperation,
    /// New content; absent for deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Previous content; absent for creates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
}

/// Output of the coding stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeResult {
    pub changes: Vec<FileChange>,
    pub commit_message: String,
    pub branch: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Output of the review stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub suggested_changes: Vec<String>,
    #[serde(default)]
    pub security_issues: Vec<String>,
    /// 0-100
    pub quality_score: u8,
    #[serde(default)]
    pub metadata: Value,
}

// =============================================================================
// Agent Trait
// =============================================================================

/// The `{plan, code, review}` capability set.
///
/// Implementations must be thread-safe; the pipeline shares one agent across
/// concurrent workers.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Get the agent name (e.g., "Claude", "Mock")
    fn name(&self) -> &str;

    /// Analyze the issue and produce an implementation plan.
    async fn plan(&self, ctx: &JobContext) -> Result<PlanResult, AgentError>;

    /// Implement the plan as a set of file changes.
    async fn code(&self, ctx: &JobContext, plan: &PlanResult) -> Result<CodeResult, AgentError>;

    /// Judge the change set against the plan.
    async fn review(
        &self,
        ctx: &JobContext,
        plan: &PlanResult,
        code: &CodeResult,
    ) -> Result<ReviewResult, AgentError>;
}
