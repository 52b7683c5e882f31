//! The emitted query record and the sink it is published through.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One completed prepared-statement query observed on a proxied connection.
///
/// `query` carries the SQL text from the frontend's Parse message; `error`
/// carries the backend's primary error message when the query failed and is
/// empty otherwise. `kind`, `rows_affected` and `time` are reserved and not
/// populated yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Query {
    #[serde(rename = "type")]
    pub kind: String,
    pub query: String,
    pub error: String,
    pub rows_affected: u32,
    pub time: Option<DateTime<Utc>>,
}

impl Query {
    /// Record for a query retired by CommandComplete
    pub fn completed(query: impl Into<String>) -> Self {
        Query {
            query: query.into(),
            ..Query::default()
        }
    }

    /// Record for a query retired by ErrorResponse
    pub fn failed(query: impl Into<String>, error: impl Into<String>) -> Self {
        Query {
            query: query.into(),
            error: error.into(),
            ..Query::default()
        }
    }
}

/// Destination for observed query records.
///
/// `write` is invoked synchronously from the observer task of every proxied
/// connection, so implementations must tolerate concurrent callers.
pub trait QuerySink: Send + Sync {
    fn write(&self, query: &Query);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_record() {
        let q = Query::completed("SELECT 1");
        assert_eq!(q.query, "SELECT 1");
        assert!(q.error.is_empty());
        assert_eq!(q.rows_affected, 0);
        assert!(q.time.is_none());
    }

    #[test]
    fn test_failed_record() {
        let q = Query::failed("SELECT broken", "syntax error");
        assert_eq!(q.query, "SELECT broken");
        assert_eq!(q.error, "syntax error");
    }

    #[test]
    fn test_serializes_reserved_type_field() {
        let q = Query::completed("SELECT 1");
        let json = serde_json::to_string(&q).unwrap();
        assert!(json.contains("\"type\":\"\""));
        assert!(json.contains("\"query\":\"SELECT 1\""));
    }
}
