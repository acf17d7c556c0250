//! Task-local tenant scope.
//!
//! The scope must be visible throughout the dynamic extent of one logical
//! operation - across suspension and resumption - without being threaded as
//! a parameter, and must be invisible to unrelated operations. A tokio
//! task-local gives exactly that: the value is bound for the wrapped future
//! and everything it awaits, and is released on every exit path, panic
//! included. Spawned tasks do not inherit it; whoever spawns re-wraps with
//! the scope it wants the child to run under.

use std::future::Future;

use crate::error::{Result, TenancyError};

tokio::task_local! {
    static CURRENT_SCOPE: TenantScope;
}

/// The tenant context active during a logical operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    /// The isolation key. Every multi-tenant row is filtered by this.
    pub tenant_id: String,
    /// Business-level passenger; never participates in isolation.
    pub organization_id: Option<String>,
}

impl TenantScope {
    /// Create a scope for a tenant.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            organization_id: None,
        }
    }

    /// Attach an organization id.
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }
}

/// Execute `fut` with the scope bound.
///
/// Returns the future's output; the scope is released when the future
/// completes, fails, or is dropped.
pub async fn run_with_scope<F>(scope: TenantScope, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_SCOPE.scope(scope, fut).await
}

/// The currently bound scope, or `ScopeMissing` outside any scope.
pub fn current() -> Result<TenantScope> {
    CURRENT_SCOPE
        .try_with(|scope| scope.clone())
        .map_err(|_| TenancyError::ScopeMissing)
}

/// Convenience over [`current`]: just the tenant id.
pub fn current_tenant_id() -> Result<String> {
    CURRENT_SCOPE
        .try_with(|scope| scope.tenant_id.clone())
        .map_err(|_| TenancyError::ScopeMissing)
}

/// Non-throwing probe.
pub fn has_scope() -> bool {
    CURRENT_SCOPE.try_with(|_| ()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_visible_across_awaits() {
        let seen = run_with_scope(TenantScope::new("tenant-a"), async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            current_tenant_id().unwrap()
        })
        .await;
        assert_eq!(seen, "tenant-a");
    }

    #[tokio::test]
    async fn test_no_scope_outside() {
        assert!(!has_scope());
        assert!(matches!(current(), Err(TenancyError::ScopeMissing)));
        assert!(matches!(
            current_tenant_id(),
            Err(TenancyError::ScopeMissing)
        ));
    }

    #[tokio::test]
    async fn test_scope_released_on_exit() {
        run_with_scope(TenantScope::new("tenant-a"), async {
            assert!(has_scope());
        })
        .await;
        assert!(!has_scope());
    }

    #[tokio::test]
    async fn test_concurrent_scopes_do_not_interfere() {
        let a = tokio::spawn(run_with_scope(TenantScope::new("tenant-a"), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            current_tenant_id().unwrap()
        }));
        let b = tokio::spawn(run_with_scope(TenantScope::new("tenant-b"), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            current_tenant_id().unwrap()
        }));

        assert_eq!(a.await.unwrap(), "tenant-a");
        assert_eq!(b.await.unwrap(), "tenant-b");
    }

    #[tokio::test]
    async fn test_nested_scope_shadows_then_restores() {
        run_with_scope(TenantScope::new("outer"), async {
            assert_eq!(current_tenant_id().unwrap(), "outer");
            run_with_scope(TenantScope::new("inner"), async {
                assert_eq!(current_tenant_id().unwrap(), "inner");
            })
            .await;
            assert_eq!(current_tenant_id().unwrap(), "outer");
        })
        .await;
    }

    #[test]
    fn test_organization_passenger() {
        let scope = TenantScope::new("t1").with_organization("org-9");
        assert_eq!(scope.tenant_id, "t1");
        assert_eq!(scope.organization_id.as_deref(), Some("org-9"));
    }
}
