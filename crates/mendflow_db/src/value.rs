//! Dynamic bind values for composed queries.
//!
//! The tenant-aware client builds SQL text at runtime (it has to splice a
//! tenant predicate into arbitrary queries), so its bind values are
//! heterogeneous. `DbValue` is the small closed set of things we actually
//! store: text, integers, reals, booleans, JSON documents, and NULL.

use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};

/// A dynamically-typed bind value.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    /// Serialized to its JSON text form on bind.
    Json(serde_json::Value),
    Null,
}

impl DbValue {
    /// Bind this value onto a query, returning the extended query.
    pub fn bind<'q>(
        &self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            DbValue::Text(s) => query.bind(s.clone()),
            DbValue::Integer(i) => query.bind(*i),
            DbValue::Real(f) => query.bind(*f),
            DbValue::Bool(b) => query.bind(*b),
            DbValue::Json(v) => query.bind(v.to_string()),
            DbValue::Null => query.bind(None::<String>),
        }
    }

    /// Bind this value onto a typed `query_as`, returning the extended query.
    pub fn bind_as<'q, T>(
        &self,
        query: sqlx::query::QueryAs<'q, Sqlite, T, SqliteArguments<'q>>,
    ) -> sqlx::query::QueryAs<'q, Sqlite, T, SqliteArguments<'q>> {
        match self {
            DbValue::Text(s) => query.bind(s.clone()),
            DbValue::Integer(i) => query.bind(*i),
            DbValue::Real(f) => query.bind(*f),
            DbValue::Bool(b) => query.bind(*b),
            DbValue::Json(v) => query.bind(v.to_string()),
            DbValue::Null => query.bind(None::<String>),
        }
    }
}

impl From<&str> for DbValue {
    fn from(s: &str) -> Self {
        DbValue::Text(s.to_string())
    }
}

impl From<String> for DbValue {
    fn from(s: String) -> Self {
        DbValue::Text(s)
    }
}

impl From<i64> for DbValue {
    fn from(i: i64) -> Self {
        DbValue::Integer(i)
    }
}

impl From<i32> for DbValue {
    fn from(i: i32) -> Self {
        DbValue::Integer(i as i64)
    }
}

impl From<f64> for DbValue {
    fn from(f: f64) -> Self {
        DbValue::Real(f)
    }
}

impl From<bool> for DbValue {
    fn from(b: bool) -> Self {
        DbValue::Bool(b)
    }
}

impl From<serde_json::Value> for DbValue {
    fn from(v: serde_json::Value) -> Self {
        DbValue::Json(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => DbValue::Null,
        }
    }
}
