//! End-to-end runs against a real PostgreSQL server.
//!
//! Ignored by default. Run with
//! `QUERYGRAPH_TEST_URL=postgres://postgres@localhost/postgres cargo test --test live_postgres_test -- --ignored`.
//! The connecting user must be allowed to create tables and roles.

use querygraph::executor::{execute, get, PostgresCursor};
use querygraph::prelude::*;
use serde_json::json;
use tokio_postgres::{Client, NoTls};

const SETUP: &str = r#"
DROP TABLE IF EXISTS qg_planet, qg_film, qg_address;
CREATE TABLE qg_film (id SERIAL PRIMARY KEY, title TEXT NOT NULL, year INT);
CREATE TABLE qg_planet (id SERIAL PRIMARY KEY, name TEXT NOT NULL, film INT REFERENCES qg_film(id));
CREATE TABLE qg_address (id SERIAL PRIMARY KEY, country TEXT NOT NULL);
INSERT INTO qg_address (country) VALUES ('NZ'), ('AU');
DO $$ BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = 'qg_reader') THEN CREATE ROLE qg_reader; END IF;
    IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = 'qg_outsider') THEN CREATE ROLE qg_outsider; END IF;
END $$;
GRANT SELECT ON qg_address TO qg_reader;
"#;

fn test_url() -> String {
    std::env::var("QUERYGRAPH_TEST_URL")
        .unwrap_or_else(|_| "postgres://postgres@localhost/postgres".into())
}

async fn connect() -> Client {
    let (client, connection) = tokio_postgres::connect(&test_url(), NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client.batch_execute(SETUP).await.unwrap();
    client
}

fn graph() -> QueryGraph {
    let schema = Schema::new(vec![
        Relation::new(
            "qg_film",
            vec![
                Column::primary("id"),
                Column::scalar("title"),
                Column::scalar("year").nullable().typed("integer"),
                Column::reverse("planets", "qg_planet", "film"),
            ],
        ),
        Relation::new(
            "qg_planet",
            vec![
                Column::primary("id"),
                Column::scalar("name"),
                Column::forward("film", "qg_film").nullable(),
            ],
        ),
        Relation::new(
            "qg_address",
            vec![Column::primary("id"), Column::scalar("country")],
        ),
    ])
    .unwrap();
    QueryGraph::new(schema)
}

// One suite so the scenarios never race on the shared tables.
#[tokio::test]
#[ignore]
async fn test_live_suite() {
    let client = connect().await;
    let mut cursor = PostgresCursor::from_client(client);

    insert_returns_generated_key(&mut cursor).await;
    nested_insert_links_rows(&mut cursor).await;
    reverse_insert_reads_back(&mut cursor).await;
    filter_over_paged_lookup(&mut cursor).await;
    update_reads_back_nested_insert(&mut cursor).await;
    values_insert_into_typed_columns(&mut cursor).await;
    values_compare_as_numbers(&mut cursor).await;
    role_gates_access(&mut cursor).await;
    failed_statement_leaves_nothing_behind(&mut cursor).await;
}

async fn insert_returns_generated_key(cursor: &mut PostgresCursor) {
    let batch = {
        let graph = graph();
        graph
            .table("qg_film")
            .unwrap()
            .insert(Changes::new().set("title", "A New Hope"))
            .unwrap()
            .select(Selection::fields(["id", "title"]))
            .unwrap()
            .prepare(&Session::new(), &CompileOptions::default())
            .unwrap()
    };
    let row = get(cursor, &batch).await.unwrap().unwrap();

    assert_eq!(row["title"], json!("A New Hope"));
    assert!(row["id"].as_i64().is_some());
}

async fn nested_insert_links_rows(cursor: &mut PostgresCursor) {
    let batch = {
        let graph = graph();
        graph
            .table("qg_planet")
            .unwrap()
            .insert(
                Changes::new()
                    .set("name", "Tatooine")
                    .nested("film", Changes::new().set("title", "Empire")),
            )
            .unwrap()
            .select(Selection::fields(["name"]).lookup("film", Selection::fields(["title"])))
            .unwrap()
            .prepare(&Session::new(), &CompileOptions::default())
            .unwrap()
    };
    let rows = execute(cursor, &batch).await.unwrap();

    assert_eq!(
        rows,
        vec![json!({"name": "Tatooine", "film": {"title": "Empire"}})]
    );
}

async fn reverse_insert_reads_back(cursor: &mut PostgresCursor) {
    let batch = {
        let graph = graph();
        graph
            .table("qg_film")
            .unwrap()
            .insert(Changes::new().set("title", "Return of the Jedi").many(
                "planets",
                vec![
                    Changes::new().set("name", "Endor"),
                    Changes::new().set("name", "Naboo"),
                ],
            ))
            .unwrap()
            .select(Selection::fields(["title"]).lookup("planets", Selection::fields(["name"])))
            .unwrap()
            .prepare(&Session::new(), &CompileOptions::default())
            .unwrap()
    };
    let row = get(cursor, &batch).await.unwrap().unwrap();

    assert_eq!(row["title"], json!("Return of the Jedi"));
    let mut names: Vec<&str> = row["planets"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["name"].as_str())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Endor", "Naboo"]);
}

async fn filter_over_paged_lookup(cursor: &mut PostgresCursor) {
    let batch = {
        let graph = graph();
        graph
            .table("qg_planet")
            .unwrap()
            .select(Selection::fields(["name"]).lookup("film", Selection::fields(["title"])))
            .unwrap()
            .limit(5)
            .unwrap()
            .filter(Predicate::lookup("film__title", "Empire"))
            .unwrap()
            .prepare(&Session::new(), &CompileOptions::default())
            .unwrap()
    };
    let rows = execute(cursor, &batch).await.unwrap();

    assert_eq!(
        rows,
        vec![json!({"name": "Tatooine", "film": {"title": "Empire"}})]
    );
}

async fn update_reads_back_nested_insert(cursor: &mut PostgresCursor) {
    let batch = {
        let graph = graph();
        graph
            .table("qg_planet")
            .unwrap()
            .filter(Predicate::lookup("name", "Tatooine"))
            .unwrap()
            .update(Changes::new().nested("film", Changes::new().set("title", "A New Hope")))
            .unwrap()
            .select(Selection::fields(["name"]).lookup("film", Selection::fields(["title"])))
            .unwrap()
            .prepare(&Session::new(), &CompileOptions::default())
            .unwrap()
    };
    let rows = execute(cursor, &batch).await.unwrap();

    assert_eq!(
        rows,
        vec![json!({"name": "Tatooine", "film": {"title": "A New Hope"}})]
    );
}

async fn values_insert_into_typed_columns(cursor: &mut PostgresCursor) {
    let batch = {
        let graph = graph();
        let rows = graph
            .values(
                &["title", "year"],
                vec![
                    vec![Value::from("Rogue One"), Value::Int(2016)],
                    vec![Value::from("Solo"), Value::Null],
                ],
            )
            .unwrap();
        graph
            .table("qg_film")
            .unwrap()
            .insert(Changes::from_query(&rows))
            .unwrap()
            .select(Selection::fields(["title", "year"]))
            .unwrap()
            .prepare(&Session::new(), &CompileOptions::default())
            .unwrap()
    };
    let mut rows = execute(cursor, &batch).await.unwrap();
    rows.sort_by_key(|row| row["title"].as_str().map(str::to_owned));

    assert_eq!(
        rows,
        vec![
            json!({"title": "Rogue One", "year": 2016}),
            json!({"title": "Solo", "year": null}),
        ]
    );
}

async fn values_compare_as_numbers(cursor: &mut PostgresCursor) {
    let batch = {
        let graph = graph();
        graph
            .values(
                &["n"],
                vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(10)]],
            )
            .unwrap()
            .filter(Predicate::lookup("n__gt", 2))
            .unwrap()
            .prepare(&Session::new(), &CompileOptions::default())
            .unwrap()
    };
    let rows = execute(cursor, &batch).await.unwrap();

    assert_eq!(rows, vec![json!({"n": 10})]);
}

async fn role_gates_access(cursor: &mut PostgresCursor) {
    let prepare = |session: &Session| {
        let graph = graph();
        graph
            .table("qg_address")
            .unwrap()
            .select(Selection::fields(["id"]))
            .unwrap()
            .prepare(session, &CompileOptions::default())
            .unwrap()
    };

    let denied = execute(cursor, &prepare(&Session::new().role("qg_outsider"))).await;
    assert!(matches!(denied, Err(QueryError::Database(_))));

    let allowed = execute(cursor, &prepare(&Session::new().role("qg_reader")))
        .await
        .unwrap();
    assert_eq!(allowed.len(), 2);
}

async fn count_titled(cursor: &mut PostgresCursor, title: &str) -> usize {
    let graph = graph();
    let batch = graph
        .table("qg_film")
        .unwrap()
        .filter(Predicate::lookup("title", title))
        .unwrap()
        .prepare(&Session::new(), &CompileOptions::default())
        .unwrap();
    execute(cursor, &batch).await.unwrap().len()
}

async fn failed_statement_leaves_nothing_behind(cursor: &mut PostgresCursor) {
    let graph = graph();
    let film = graph
        .table("qg_film")
        .unwrap()
        .insert(Changes::new().set("title", "Phantom"))
        .unwrap();
    let planet = graph
        .table("qg_planet")
        .unwrap()
        .insert(Changes::new().set("name", "Nowhere").set("film", -1))
        .unwrap();
    let batch = graph
        .common(&[film, planet])
        .unwrap()
        .prepare(&Session::new(), &CompileOptions::default())
        .unwrap();

    // The film insert succeeds inside the statement, the planet insert
    // violates the foreign key, so neither is kept.
    assert!(matches!(
        execute(cursor, &batch).await,
        Err(QueryError::Database(_))
    ));
    assert_eq!(count_titled(cursor, "Phantom").await, 0);
}
