//! Database schema creation for all Mendflow tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use tracing::info;

use crate::error::Result;
use crate::pool::DbPool;

/// Ensure all tables and indexes exist.
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    create_billing_tables(pool).await?;
    create_tenancy_tables(pool).await?;
    create_job_tables(pool).await?;
    create_queue_tables(pool).await?;

    info!("Database schema verified");
    Ok(())
}

/// Plans: subscription descriptors, owned by the billing subsystem.
/// No tenant_id column - plans are shared reference data.
async fn create_billing_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            price_usd REAL NOT NULL DEFAULT 0,
            billing_interval TEXT NOT NULL DEFAULT 'month',
            max_repos INTEGER NOT NULL,
            max_prs_per_month INTEGER NOT NULL,
            max_tokens_per_month INTEGER NOT NULL,
            max_llm_calls_per_month INTEGER NOT NULL,
            features TEXT NOT NULL DEFAULT '{}',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Tenants and their monitored repositories.
async fn create_tenancy_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY,
            github_installation_id INTEGER NOT NULL UNIQUE,
            github_account_login TEXT NOT NULL,
            github_account_type TEXT NOT NULL,
            installed_at TEXT NOT NULL,
            uninstalled_at TEXT,
            settings TEXT NOT NULL DEFAULT '{}',
            installation_status TEXT NOT NULL DEFAULT 'PENDING',
            plan_id TEXT NOT NULL REFERENCES plans(id),
            plan_changed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tenants_status ON tenants(installation_status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS repositories (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
            github_repo_id INTEGER NOT NULL UNIQUE,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            full_name TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            policy_overrides TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_repositories_tenant ON repositories(tenant_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_repositories_github ON repositories(github_repo_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Jobs and their append-only transition history.
async fn create_job_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            repository_id TEXT NOT NULL REFERENCES repositories(id),
            status TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_tenant ON jobs(tenant_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS job_transitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL REFERENCES jobs(id),
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            from_status TEXT NOT NULL,
            event TEXT NOT NULL,
            to_status TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_transitions_job ON job_transitions(job_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Ensure just the queue tables exist.
///
/// The queue substrate initializes lazily on first use and may run against
/// a database whose domain schema is managed elsewhere.
pub async fn ensure_queue_schema(pool: &DbPool) -> Result<()> {
    create_queue_tables(pool).await
}

/// Stage queues. Infrastructure, not tenant data: tenant identity rides in
/// the message envelope, so there is deliberately no tenant_id column here.
async fn create_queue_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS queue_messages (
            queue TEXT NOT NULL,
            message_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'READY',
            attempts INTEGER NOT NULL DEFAULT 0,
            visible_at INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL,
            claimed_at INTEGER,
            lease TEXT,
            finished_at INTEGER,
            last_error TEXT,
            PRIMARY KEY (queue, message_id)
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_ready ON queue_messages(queue, status, visible_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
