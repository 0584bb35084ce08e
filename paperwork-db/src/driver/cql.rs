//! CQL driver backed by the `scylla` crate
//!
//! Works against both ScyllaDB and Apache Cassandra. Statements are sent
//! unprepared; positional values are serialized from [`Value`]s.

use super::{
    Connection, ConnectTarget, DatabaseDriver, DiagnosticLevel, DiagnosticSink, DriverDiagnostic,
    DriverError, DriverKind,
};
use crate::query::{ResultSet, Statement, Value};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::errors::{DbError, ExecutionError, RequestAttemptError};
use scylla::statement::unprepared::Statement as CqlStatement;
use scylla::value::{CqlTimestamp, CqlValue, Row as CqlRow};
use std::time::Duration;

const SOURCE: &str = "scylla";

/// [`DatabaseDriver`] for CQL stores
#[derive(Debug, Clone, Default)]
pub struct CqlDriver;

impl CqlDriver {
    /// Creates the driver
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseDriver for CqlDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Cql
    }

    async fn connect(
        &self,
        target: &ConnectTarget,
        sink: DiagnosticSink,
    ) -> Result<Box<dyn Connection>, DriverError> {
        let mut builder = SessionBuilder::new()
            .known_nodes(&target.contact_points)
            .connection_timeout(target.connect_timeout);
        if let Some(keyspace) = &target.keyspace {
            builder = builder.use_keyspace(keyspace, false);
        }

        let session = tokio::time::timeout(target.connect_timeout, builder.build())
            .await
            .map_err(|_| {
                DriverError::Timeout(format!(
                    "no session within {}ms",
                    target.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        let nodes = session.get_cluster_state().get_nodes_info().len();
        sink(DriverDiagnostic::new(
            DiagnosticLevel::Info,
            SOURCE,
            format!("session established ({nodes} nodes known)"),
        ));

        Ok(Box::new(CqlConnection {
            session,
            request_timeout: target.request_timeout,
            sink,
        }))
    }
}

struct CqlConnection {
    session: Session,
    request_timeout: Duration,
    sink: DiagnosticSink,
}

#[async_trait]
impl Connection for CqlConnection {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, DriverError> {
        let mut query = CqlStatement::new(statement.cql.clone());
        query.set_request_timeout(Some(
            statement
                .options
                .request_timeout
                .unwrap_or(self.request_timeout),
        ));
        query.set_is_idempotent(statement.options.idempotent);

        let values: Vec<Option<CqlValue>> = statement.params.iter().map(to_cql).collect();
        let result = self
            .session
            .query_unpaged(query, values)
            .await
            .map_err(map_execution_error)?;

        for warning in result.warnings() {
            (self.sink)(DriverDiagnostic::new(
                DiagnosticLevel::Warning,
                SOURCE,
                warning.to_string(),
            ));
        }

        if !result.is_rows() {
            return Ok(ResultSet::default());
        }

        let rows = result
            .into_rows_result()
            .map_err(|e| DriverError::Decode(e.to_string()))?;
        let columns = rows
            .column_specs()
            .iter()
            .map(|spec| spec.name().to_string())
            .collect();

        let mut result_set = ResultSet::new(columns);
        for row in rows
            .rows::<CqlRow>()
            .map_err(|e| DriverError::Decode(e.to_string()))?
        {
            let row = row.map_err(|e| DriverError::Decode(e.to_string()))?;
            let values = row
                .columns
                .into_iter()
                .map(from_cql)
                .collect::<Result<Vec<_>, _>>()?;
            result_set.push_row(values);
        }
        Ok(result_set)
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        debug!("Database: (cql) closing session");
        drop(self.session);
        Ok(())
    }
}

fn to_cql(value: &Value) -> Option<CqlValue> {
    match value {
        Value::Null => None,
        Value::Text(s) => Some(CqlValue::Text(s.clone())),
        Value::Int(i) => Some(CqlValue::Int(*i)),
        Value::BigInt(i) => Some(CqlValue::BigInt(*i)),
        Value::Boolean(b) => Some(CqlValue::Boolean(*b)),
        Value::Timestamp(ts) => Some(CqlValue::Timestamp(CqlTimestamp(ts.timestamp_millis()))),
    }
}

fn from_cql(value: Option<CqlValue>) -> Result<Value, DriverError> {
    let Some(value) = value else {
        return Ok(Value::Null);
    };
    Ok(match value {
        CqlValue::Text(s) | CqlValue::Ascii(s) => Value::Text(s),
        CqlValue::Int(i) => Value::Int(i),
        CqlValue::BigInt(i) => Value::BigInt(i),
        CqlValue::Boolean(b) => Value::Boolean(b),
        CqlValue::Uuid(uuid) => Value::Text(uuid.to_string()),
        CqlValue::Timestamp(CqlTimestamp(millis)) => Value::Timestamp(
            DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
                DriverError::Decode(format!("timestamp out of range: {millis}"))
            })?,
        ),
        other => {
            return Err(DriverError::Decode(format!(
                "unsupported column value: {other:?}"
            )))
        }
    })
}

fn map_execution_error(err: ExecutionError) -> DriverError {
    match &err {
        ExecutionError::RequestTimeout(_) => DriverError::Timeout(err.to_string()),
        ExecutionError::LastAttemptError(RequestAttemptError::DbError(db, _)) => match db {
            DbError::SyntaxError
            | DbError::Invalid
            | DbError::AlreadyExists { .. }
            | DbError::Unauthorized => DriverError::InvalidQuery(err.to_string()),
            _ => DriverError::Server(err.to_string()),
        },
        _ => DriverError::Connection(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversion() {
        let now = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        let cases = [
            Value::Null,
            Value::Text("001_a.cql".to_string()),
            Value::Int(7),
            Value::BigInt(1 << 40),
            Value::Boolean(true),
            Value::Timestamp(now),
        ];

        for value in cases {
            assert_eq!(from_cql(to_cql(&value)).unwrap(), value);
        }
    }

    #[test]
    fn test_ascii_reads_as_text() {
        assert_eq!(
            from_cql(Some(CqlValue::Ascii("x".to_string()))).unwrap(),
            Value::Text("x".to_string())
        );
    }

    #[test]
    fn test_unsupported_value() {
        let err = from_cql(Some(CqlValue::Float(1.5))).unwrap_err();
        assert!(matches!(err, DriverError::Decode(_)));
    }
}
