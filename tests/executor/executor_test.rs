//! Transaction handling of the executor against a recording cursor.

use async_trait::async_trait;
use querygraph::executor::{execute, get};
use querygraph::prelude::*;
use serde_json::json;

/// Records every call and answers queries from a fixed row set.
#[derive(Default)]
struct Recording {
    log: Vec<String>,
    rows: Vec<serde_json::Value>,
    fail_on: Option<String>,
}

impl Recording {
    fn with_rows(rows: Vec<serde_json::Value>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    fn check(&self, sql: &str) -> QueryResult<()> {
        match &self.fail_on {
            Some(needle) if sql.contains(needle.as_str()) => {
                Err(QueryError::Connection(format!("refused: {}", sql)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Cursor for Recording {
    async fn begin(&mut self) -> QueryResult<()> {
        self.log.push("BEGIN".into());
        Ok(())
    }

    async fn query(&mut self, statement: &Compiled) -> QueryResult<Vec<serde_json::Value>> {
        self.log.push(statement.sql.clone());
        self.check(&statement.sql)?;
        Ok(self.rows.clone())
    }

    async fn execute(&mut self, statement: &Compiled) -> QueryResult<u64> {
        self.log.push(statement.sql.clone());
        self.check(&statement.sql)?;
        Ok(0)
    }

    async fn commit(&mut self) -> QueryResult<()> {
        self.log.push("COMMIT".into());
        Ok(())
    }

    async fn rollback(&mut self) -> QueryResult<()> {
        self.log.push("ROLLBACK".into());
        Ok(())
    }
}

fn graph() -> QueryGraph {
    let schema = Schema::new(vec![Relation::new(
        "movie",
        vec![Column::primary("id"), Column::scalar("title")],
    )])
    .unwrap();
    QueryGraph::new(schema)
}

fn batch(session: &Session) -> Batch {
    let graph = graph();
    graph
        .table("movie")
        .unwrap()
        .select(Selection::fields(["title"]))
        .unwrap()
        .prepare(session, &CompileOptions::default())
        .unwrap()
}

#[tokio::test]
async fn test_execute_commits() {
    let mut cursor = Recording::with_rows(vec![json!({"title": "A New Hope"})]);
    let rows = execute(&mut cursor, &batch(&Session::new())).await.unwrap();

    assert_eq!(rows, vec![json!({"title": "A New Hope"})]);
    assert_eq!(cursor.log.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(cursor.log.last().map(String::as_str), Some("COMMIT"));
    assert_eq!(cursor.log.len(), 3);
}

#[tokio::test]
async fn test_session_runs_inside_the_transaction() {
    let mut cursor = Recording::default();
    let session = Session::new().role("reader");
    execute(&mut cursor, &batch(&session)).await.unwrap();

    assert_eq!(cursor.log[0], "BEGIN");
    assert_eq!(cursor.log[1], "SET LOCAL ROLE \"reader\"");
    assert!(cursor.log[2].starts_with("SELECT row_to_json"));
    assert_eq!(cursor.log[3], "COMMIT");
}

#[tokio::test]
async fn test_error_rolls_back() {
    let mut cursor = Recording {
        fail_on: Some("SET LOCAL ROLE".into()),
        ..Recording::default()
    };
    let err = execute(&mut cursor, &batch(&Session::new().role("nobody")))
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Connection(_)));
    assert_eq!(
        cursor.log,
        vec!["BEGIN", "SET LOCAL ROLE \"nobody\"", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_get_returns_single_row() {
    let mut cursor = Recording::with_rows(vec![json!({"title": "Empire"})]);
    let row = get(&mut cursor, &batch(&Session::new())).await.unwrap();
    assert_eq!(row, Some(json!({"title": "Empire"})));

    let mut cursor = Recording::default();
    let row = get(&mut cursor, &batch(&Session::new())).await.unwrap();
    assert_eq!(row, None);
}

#[tokio::test]
async fn test_get_with_many_rows_rolls_back() {
    let mut cursor = Recording::with_rows(vec![json!({"title": "A"}), json!({"title": "B"})]);
    let err = get(&mut cursor, &batch(&Session::new())).await.unwrap_err();

    assert!(matches!(err, QueryError::MultipleResults(2)));
    assert_eq!(cursor.log.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!cursor.log.iter().any(|entry| entry == "COMMIT"));
}

#[tokio::test]
async fn test_empty_batch_touches_nothing() {
    let mut cursor = Recording::default();
    let rows = execute(&mut cursor, &Batch { parts: vec![] }).await.unwrap();
    assert!(rows.is_empty());
    assert!(cursor.log.is_empty());
}

#[test]
fn test_executor_prepares_with_its_options() {
    let graph = graph();
    let executor = Executor::new(
        "postgres://localhost/app",
        CompileOptions::with_placeholder(Placeholder::Format),
    );
    let query = graph
        .table("movie")
        .unwrap()
        .filter(Predicate::lookup("id", 1))
        .unwrap();
    let batch = executor.prepare(&query, &Session::new()).unwrap();

    assert!(batch.main().unwrap().sql.ends_with("WHERE \"movie\".\"id\" = %s) AS \"x\""));
    assert_eq!(
        executor.connections().current_url().unwrap(),
        "postgres://localhost/app"
    );
    assert_eq!(executor.connections().cached(), 0);
}
