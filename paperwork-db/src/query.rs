//! Statements, bound values and result sets exchanged with drivers
//!
//! These types are driver-neutral: the CQL driver converts them to and from
//! its wire representation, and the in-memory test driver interprets them
//! directly.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A single bound or returned column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value
    Null,
    /// `text` / `varchar` / `ascii`
    Text(String),
    /// 32-bit `int`
    Int(i32),
    /// 64-bit `bigint`
    BigInt(i64),
    /// `boolean`
    Boolean(bool),
    /// `timestamp`, millisecond precision on the wire
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Returns the text content if this is a [`Value::Text`]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the timestamp if this is a [`Value::Timestamp`]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Returns true for [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::BigInt(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

/// Per-statement execution options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Overrides the connection's default request timeout
    pub request_timeout: Option<Duration>,

    /// Whether the driver may safely retry the statement
    pub idempotent: bool,
}

/// A CQL statement with positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Statement text, executed as-is
    pub cql: String,

    /// Values for the `?` placeholders, in order
    pub params: Vec<Value>,

    /// Execution options
    pub options: QueryOptions,
}

impl Statement {
    /// Creates a statement without parameters
    pub fn new(cql: impl Into<String>) -> Self {
        Self {
            cql: cql.into(),
            params: Vec::new(),
            options: QueryOptions::default(),
        }
    }

    /// Appends a positional parameter
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Overrides the request timeout for this statement
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = Some(timeout);
        self
    }

    /// Marks the statement as safe to retry
    pub fn idempotent(mut self) -> Self {
        self.options.idempotent = true;
        self
    }

    /// Single-line, length-limited form of the statement text for log output
    pub fn summary(&self) -> String {
        const MAX: usize = 80;
        let flat = self.cql.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() <= MAX {
            flat
        } else {
            let cut: String = flat.chars().take(MAX).collect();
            format!("{cut}...")
        }
    }
}

/// Rows returned by a statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Creates an empty result with the given column names
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row; missing trailing values read as [`Value::Null`]
    pub fn push_row(&mut self, values: Vec<Value>) {
        self.rows.push(values);
    }

    /// Builder-style [`ResultSet::push_row`]
    pub fn with_row(mut self, values: Vec<Value>) -> Self {
        self.push_row(values);
        self
    }

    /// Column names in result order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows were returned
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The only row, or `None` unless exactly one row was returned
    pub fn single(&self) -> Option<Row<'_>> {
        match self.rows.as_slice() {
            [values] => Some(Row {
                columns: &self.columns,
                values,
            }),
            _ => None,
        }
    }

    /// Iterates rows with by-name column access
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }
}

static NULL: Value = Value::Null;

/// A borrowed row of a [`ResultSet`]
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    /// Value of the named column, or `None` if the column is unknown
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        Some(self.values.get(index).unwrap_or(&NULL))
    }

    /// Text value of the named column
    pub fn text(&self, column: &str) -> Option<&'a str> {
        self.get(column).and_then(Value::as_text)
    }

    /// Timestamp value of the named column
    pub fn timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        self.get(column).and_then(Value::as_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_bind_keeps_order() {
        let stmt = Statement::new("INSERT INTO t (a, b) VALUES (?, ?)")
            .bind("first")
            .bind(2i32);
        assert_eq!(
            stmt.params,
            vec![Value::Text("first".to_string()), Value::Int(2)]
        );
        assert!(!stmt.options.idempotent);
    }

    #[test]
    fn test_statement_summary_flattens_and_truncates() {
        let stmt = Statement::new("CREATE TABLE a (\n    id int PRIMARY KEY\n);");
        assert_eq!(stmt.summary(), "CREATE TABLE a ( id int PRIMARY KEY );");

        let long = Statement::new("x".repeat(200));
        let summary = long.summary();
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), 83);
    }

    #[test]
    fn test_row_access_by_name() {
        let now = Utc::now();
        let rs = ResultSet::new(vec!["filename".into(), "migrated_at".into()])
            .with_row(vec![Value::from("001_a.cql"), Value::from(now)])
            .with_row(vec![Value::from("002_b.cql")]);

        let rows: Vec<_> = rs.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("filename"), Some("001_a.cql"));
        assert_eq!(rows[0].timestamp("migrated_at"), Some(now));

        // Short row reads as null, unknown column reads as None
        assert_eq!(rows[1].get("migrated_at"), Some(&Value::Null));
        assert_eq!(rows[1].get("nope"), None);
    }

    #[test]
    fn test_empty_result() {
        let rs = ResultSet::new(vec!["filename".into()]);
        assert!(rs.is_empty());
        assert_eq!(rs.len(), 0);
        assert_eq!(rs.columns(), ["filename".to_string()]);
    }
}
