//! Tenant-aware storage client.
//!
//! Wraps the raw pool and enforces the isolation discipline for every table
//! that carries a `tenant_id` column:
//!
//! - reads conjoin `tenant_id = <current>` to whatever predicate the caller
//!   supplied (or stand it alone when there is none);
//! - inserts overwrite `tenant_id` with the current scope's id, element-wise
//!   for multi-row inserts, even when the caller supplied a different value;
//! - updates and deletes must carry a predicate, which is AND-ed with the
//!   tenant predicate, so rows of other tenants count as zero affected
//!   rows rather than failing or leaking existence;
//! - outside any scope the operation fails with `ScopeMissing` before any
//!   SQL is sent.
//!
//! Tables without a `tenant_id` column pass through untouched. The
//! classification is read from the live schema when the client is built, so
//! no user code decides which tables are protected.

use std::collections::HashMap;
use std::sync::RwLock;

use mendflow_db::{DbPool, DbRow, DbValue};
use sqlx::FromRow;
use tracing::debug;

use crate::error::{Result, TenancyError};
use crate::scope;

/// A predicate fragment with its bind values.
///
/// The clause is always parenthesized before being AND-ed with the tenant
/// predicate, so `a = ? OR b = ?` cannot escape the conjunction.
#[derive(Debug, Clone)]
pub struct Filter {
    clause: String,
    binds: Vec<DbValue>,
}

impl Filter {
    /// A raw clause with positional binds.
    pub fn new(clause: impl Into<String>, binds: Vec<DbValue>) -> Self {
        Self {
            clause: clause.into(),
            binds,
        }
    }

    /// `column = ?`
    pub fn eq(column: &str, value: impl Into<DbValue>) -> Self {
        Self {
            clause: format!("{column} = ?"),
            binds: vec![value.into()],
        }
    }

    /// Conjoin another filter.
    pub fn and(mut self, other: Filter) -> Self {
        self.clause = format!("({}) AND ({})", self.clause, other.clause);
        self.binds.extend(other.binds);
        self
    }
}

/// The tenant-aware client. The only legitimate path for multi-tenant
/// tables; a transparent pass-through for the rest.
pub struct TenantClient {
    pool: DbPool,
    /// table name -> declares a tenant_id column
    catalog: RwLock<HashMap<String, bool>>,
}

impl TenantClient {
    /// Build a client over an opened pool, classifying every table in the
    /// live schema by whether it declares a `tenant_id` column.
    pub async fn new(pool: DbPool) -> Result<Self> {
        let catalog = RwLock::new(classify_tables(&pool).await?);
        Ok(Self { pool, catalog })
    }

    /// Re-read the table classification (after migrations in tests).
    pub async fn refresh_catalog(&self) -> Result<()> {
        let fresh = classify_tables(&self.pool).await?;
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        Ok(())
    }

    /// The raw pool. Full SQL power: reserved for migrations, tenant
    /// lifecycle, and tests.
    pub fn raw(&self) -> &DbPool {
        &self.pool
    }

    /// Fetch all rows, tenant-filtered for multi-tenant tables.
    pub async fn fetch_all<T>(&self, table: &str, filter: Option<Filter>) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, DbRow> + Send + Unpin,
    {
        let (clause, binds) = self.read_predicate(table, filter)?;
        let sql = match clause {
            Some(clause) => format!("SELECT * FROM {table} WHERE {clause}"),
            None => format!("SELECT * FROM {table}"),
        };

        let mut query = sqlx::query_as::<_, T>(&sql);
        for value in &binds {
            query = value.bind_as(query);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Fetch at most one row, tenant-filtered for multi-tenant tables.
    pub async fn fetch_optional<T>(&self, table: &str, filter: Filter) -> Result<Option<T>>
    where
        T: for<'r> FromRow<'r, DbRow> + Send + Unpin,
    {
        let (clause, binds) = self.read_predicate(table, Some(filter))?;
        let clause = clause.unwrap_or_else(|| "1 = 1".to_string());
        let sql = format!("SELECT * FROM {table} WHERE {clause} LIMIT 1");

        let mut query = sqlx::query_as::<_, T>(&sql);
        for value in &binds {
            query = value.bind_as(query);
        }
        Ok(query.fetch_optional(&self.pool).await?)
    }

    /// Insert one row. On a multi-tenant table `tenant_id` is overwritten
    /// with the current scope's id regardless of what the caller supplied.
    pub async fn insert(&self, table: &str, columns: Vec<(&str, DbValue)>) -> Result<()> {
        self.insert_rows(table, vec![columns]).await
    }

    /// Insert several rows; the tenant override is applied element-wise.
    pub async fn insert_rows(
        &self,
        table: &str,
        rows: Vec<Vec<(&str, DbValue)>>,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let tenant_id = self.guard(table)?;

        for mut columns in rows {
            if let Some(ref tenant_id) = tenant_id {
                // Safety override, not a convenience: drop whatever the
                // caller supplied for tenant_id and inject the scope's.
                columns.retain(|(name, _)| *name != "tenant_id");
                columns.push(("tenant_id", DbValue::Text(tenant_id.clone())));
            }

            let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders})",
                names.join(", ")
            );

            let mut query = sqlx::query(&sql);
            for (_, value) in &columns {
                query = value.bind(query);
            }
            query.execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Update rows matching the filter. On a multi-tenant table the filter
    /// is AND-ed with the tenant predicate; rows of other tenants simply
    /// count as zero affected.
    pub async fn update(
        &self,
        table: &str,
        assignments: Vec<(&str, DbValue)>,
        filter: Filter,
    ) -> Result<u64> {
        let tenant_id = self.guard(table)?;

        let set_clause = assignments
            .iter()
            .map(|(name, _)| format!("{name} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let (where_clause, filter_binds) = constrain(filter, tenant_id.as_deref());
        let sql = format!("UPDATE {table} SET {set_clause} WHERE {where_clause}");

        let mut query = sqlx::query(&sql);
        for (_, value) in &assignments {
            query = value.bind(query);
        }
        for value in &filter_binds {
            query = value.bind(query);
        }
        let affected = query.execute(&self.pool).await?.rows_affected();
        debug!(table, affected, "scoped update");
        Ok(affected)
    }

    /// Delete rows matching the filter, with the same AND-ing discipline as
    /// update.
    pub async fn delete(&self, table: &str, filter: Filter) -> Result<u64> {
        let tenant_id = self.guard(table)?;

        let (where_clause, binds) = constrain(filter, tenant_id.as_deref());
        let sql = format!("DELETE FROM {table} WHERE {where_clause}");

        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = value.bind(query);
        }
        let affected = query.execute(&self.pool).await?.rows_affected();
        debug!(table, affected, "scoped delete");
        Ok(affected)
    }

    /// Build the effective read predicate for a table. `None` means an
    /// unfiltered scan (non-tenant table, no caller predicate).
    fn read_predicate(
        &self,
        table: &str,
        filter: Option<Filter>,
    ) -> Result<(Option<String>, Vec<DbValue>)> {
        let tenant_id = self.guard(table)?;
        Ok(match (filter, tenant_id) {
            (Some(filter), Some(tenant_id)) => {
                let (clause, binds) = constrain(filter, Some(&tenant_id));
                (Some(clause), binds)
            }
            (Some(filter), None) => (Some(format!("({})", filter.clause)), filter.binds),
            (None, Some(tenant_id)) => (
                Some("tenant_id = ?".to_string()),
                vec![DbValue::Text(tenant_id)],
            ),
            (None, None) => (None, Vec::new()),
        })
    }

    /// The per-operation guard. Runs before any SQL is composed: classifies
    /// the table from the cached catalog and, for multi-tenant tables,
    /// resolves the current scope or fails.
    fn guard(&self, table: &str) -> Result<Option<String>> {
        let multi_tenant = {
            let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
            match catalog.get(table) {
                Some(flag) => *flag,
                None => return Err(TenancyError::UnknownTable(table.to_string())),
            }
        };
        if !multi_tenant {
            return Ok(None);
        }
        Ok(Some(scope::current_tenant_id()?))
    }
}

/// AND a caller filter with the tenant predicate.
fn constrain(filter: Filter, tenant_id: Option<&str>) -> (String, Vec<DbValue>) {
    match tenant_id {
        Some(tenant_id) => {
            let clause = format!("({}) AND tenant_id = ?", filter.clause);
            let mut binds = filter.binds;
            binds.push(DbValue::Text(tenant_id.to_string()));
            (clause, binds)
        }
        None => (format!("({})", filter.clause), filter.binds),
    }
}

/// Classify every table in the live schema by the presence of a
/// `tenant_id` column.
async fn classify_tables(pool: &DbPool) -> Result<HashMap<String, bool>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT m.name,
               EXISTS (
                   SELECT 1 FROM pragma_table_info(m.name) p
                   WHERE p.name = 'tenant_id'
               )
        FROM sqlite_master m
        WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(name, has_tenant_id)| (name, has_tenant_id != 0))
        .collect())
}

/// Defensive ownership check for rows obtained outside the client.
pub fn verify_ownership(row_tenant_id: &str, kind: &str) -> Result<()> {
    let current = scope::current_tenant_id()?;
    if row_tenant_id != current {
        return Err(TenancyError::access_denied(kind));
    }
    Ok(())
}
