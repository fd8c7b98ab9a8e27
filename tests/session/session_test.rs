//! Session settings wrapped around compiled queries.

use querygraph::prelude::*;

fn graph() -> QueryGraph {
    let schema = Schema::new(vec![Relation::new(
        "address",
        vec![Column::primary("id"), Column::scalar("country")],
    )])
    .unwrap();
    QueryGraph::new(schema)
}

#[test]
fn test_no_session_is_a_single_statement() {
    let graph = graph();
    let batch = graph
        .table("address")
        .unwrap()
        .prepare(&Session::new(), &CompileOptions::default())
        .unwrap();

    assert_eq!(batch.parts.len(), 1);
    assert!(batch.prelude().is_empty());
}

#[test]
fn test_role_and_variables_run_first() {
    let graph = graph();
    let session = Session::new()
        .role("web_user")
        .variable("request.user_id", 7)
        .variable("request.lang", "en");
    let batch = graph
        .table("address")
        .unwrap()
        .filter(Predicate::lookup("country", "NZ"))
        .unwrap()
        .select(Selection::fields(["id"]))
        .unwrap()
        .prepare(&session, &CompileOptions::default())
        .unwrap();

    let sql: Vec<&str> = batch.parts.iter().map(|p| p.sql.as_str()).collect();
    assert_eq!(
        sql,
        vec![
            "SET LOCAL ROLE \"web_user\"",
            "SET LOCAL \"request\".\"user_id\" TO '7'",
            "SET LOCAL \"request\".\"lang\" TO 'en'",
            "SELECT row_to_json(\"x\") FROM (SELECT \"address\".\"id\" FROM \"address\" \
             WHERE \"address\".\"country\" = $1) AS \"x\"",
        ]
    );
    // Each part is sent on its own, so numbering restarts.
    let main = batch.main().unwrap();
    assert_eq!(main.args, vec![Value::from("NZ")]);
}

#[test]
fn test_session_from_json() {
    let session: Session = serde_json::from_str(
        r#"{"role": "reader", "variables": {"app.tenant": "acme", "app.level": 3}}"#,
    )
    .unwrap();
    assert_eq!(
        session,
        Session::new()
            .role("reader")
            .variable("app.tenant", "acme")
            .variable("app.level", 3)
    );
}

#[test]
fn test_invalid_session_fails_prepare() {
    let graph = graph();
    let query = graph.table("address").unwrap();

    let err = query
        .prepare(&Session::new().role(""), &CompileOptions::default())
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidSession(_)));

    let err = query
        .prepare(
            &Session::new().variable("app.user id", 1),
            &CompileOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidSession(_)));
}
