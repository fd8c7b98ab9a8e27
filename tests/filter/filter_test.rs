//! Filters compiled as part of whole queries.

use querygraph::prelude::*;
use serde_json::json;

fn graph() -> QueryGraph {
    let schema = Schema::new(vec![
        Relation::new(
            "movie",
            vec![
                Column::primary("id"),
                Column::scalar("title"),
                Column::reverse("actors", "actor", "movie"),
            ],
        ),
        Relation::new(
            "actor",
            vec![
                Column::primary("id"),
                Column::scalar("first_name"),
                Column::forward("address", "address").nullable(),
                Column::forward("movie", "movie").nullable(),
            ],
        ),
        Relation::new(
            "address",
            vec![Column::primary("id"), Column::scalar("country")],
        ),
    ])
    .unwrap();
    QueryGraph::new(schema)
}

fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

#[test]
fn test_join_segment_is_exists() {
    let graph = graph();
    let compiled = graph
        .table("actor")
        .unwrap()
        .filter(Predicate::lookup("address__country", "NZ"))
        .unwrap()
        .select(Selection::fields(["first_name"]))
        .unwrap()
        .compile()
        .unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT row_to_json(\"x\") FROM (SELECT \"actor\".\"first_name\" FROM \"actor\" \
         WHERE EXISTS (SELECT 1 FROM \"address\" WHERE \"address\".\"id\" = \"actor\".\"address\" \
         AND \"address\".\"country\" = $1)) AS \"x\""
    );
    assert_eq!(compiled.args, vec![Value::from("NZ")]);
}

#[test]
fn test_json_filter_entries_are_anded() {
    let graph = graph();
    let filter = Filter::from_json(object(json!({
        "first_name__ct": "ar",
        "id__in": [1, 2, 3],
        "address__nu": false
    })));
    let compiled = graph
        .table("actor")
        .unwrap()
        .filter(filter)
        .unwrap()
        .compile()
        .unwrap();

    assert!(compiled.sql.contains("\"actor\".\"first_name\" LIKE $"));
    assert!(compiled.sql.contains("\"actor\".\"address\" IS NOT NULL"));
    assert_eq!(compiled.sql.matches(" AND ").count(), 2);
    assert_eq!(compiled.args.len(), 4);
    assert!(compiled.args.contains(&Value::from("%ar%")));
    assert!(compiled.args.contains(&Value::Int(3)));
}

#[test]
fn test_chained_filters_apply_innermost_first() {
    let graph = graph();
    let compiled = graph
        .table("movie")
        .unwrap()
        .filter(Predicate::lookup("title", "A"))
        .unwrap()
        .filter(Predicate::lookup("id__gt", 3))
        .unwrap()
        .compile()
        .unwrap();

    assert!(compiled
        .sql
        .contains("WHERE \"movie\".\"title\" = $1 AND \"movie\".\"id\" > $2"));
}

#[test]
fn test_sub_query_operand() {
    let graph = graph();
    let cast = graph
        .table("actor")
        .unwrap()
        .filter(Predicate::lookup("first_name", "Mark"))
        .unwrap()
        .select(Selection::fields(["movie"]))
        .unwrap();
    let compiled = graph
        .table("movie")
        .unwrap()
        .filter(Predicate::lookup("id__in", cast.handle()))
        .unwrap()
        .select(Selection::fields(["title"]))
        .unwrap()
        .compile()
        .unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT row_to_json(\"x\") FROM (SELECT \"movie\".\"title\" FROM \"movie\" \
         WHERE \"movie\".\"id\" IN (SELECT \"actor\".\"movie\" FROM \"actor\" \
         WHERE \"actor\".\"first_name\" = $1)) AS \"x\""
    );
}

#[test]
fn test_sub_query_rejects_ordering_operators() {
    let graph = graph();
    let ids = graph
        .table("actor")
        .unwrap()
        .select(Selection::fields(["movie"]))
        .unwrap();
    let query = graph
        .table("movie")
        .unwrap()
        .filter(Predicate::lookup("id__lt", ids.handle()))
        .unwrap();
    assert!(matches!(
        query.compile(),
        Err(QueryError::InvalidFilterLookup { .. })
    ));
}

#[test]
fn test_filter_on_staged_insert_pushes_column_down() {
    let graph = graph();
    let compiled = graph
        .table("movie")
        .unwrap()
        .insert(Changes::new().set("title", "A New Hope"))
        .unwrap()
        .filter(Predicate::lookup("title__ct", "Hope"))
        .unwrap()
        .select(Selection::fields(["id"]))
        .unwrap()
        .compile()
        .unwrap();

    assert_eq!(
        compiled.sql,
        "WITH \"t1\" AS (INSERT INTO \"movie\" (\"title\") VALUES ($1) RETURNING \"id\", \"title\") \
         SELECT row_to_json(\"x\") FROM (SELECT \"t1\".\"id\" FROM \"t1\" \
         WHERE \"t1\".\"title\" LIKE $2 ESCAPE '\\') AS \"x\""
    );
    assert_eq!(
        compiled.args,
        vec![Value::from("A New Hope"), Value::from("%Hope%")]
    );
}

#[test]
fn test_reverse_join_filter_on_staged_insert_needs_key() {
    let graph = graph();
    let compiled = graph
        .table("movie")
        .unwrap()
        .insert(Changes::new().set("title", "A New Hope"))
        .unwrap()
        .filter(Predicate::lookup("actors__first_name", "Mark"))
        .unwrap()
        .select(Selection::fields(["title"]))
        .unwrap()
        .compile()
        .unwrap();

    assert!(compiled.sql.starts_with(
        "WITH \"t1\" AS (INSERT INTO \"movie\" (\"title\") VALUES ($1) RETURNING \"id\", \"title\")"
    ));
    assert!(compiled
        .sql
        .contains("WHERE EXISTS (SELECT 1 FROM \"actor\" WHERE \"actor\".\"movie\" = \"t1\".\"id\""));
}

#[test]
fn test_invalid_lookup_aborts_compile() {
    let graph = graph();
    let query = graph
        .table("actor")
        .unwrap()
        .filter(Predicate::lookup("address__planet", "Tatooine"))
        .unwrap();
    match query.compile() {
        Err(QueryError::InvalidFilterLookup { lookup, segment, .. }) => {
            assert_eq!(lookup, "address__planet");
            assert_eq!(segment, "planet");
        }
        other => panic!("expected an invalid lookup, got {:?}", other),
    }
}

#[test]
fn test_or_and_not_compose() {
    let graph = graph();
    let predicate = Predicate::lookup("title", "A")
        .or(Predicate::lookup("title", "B"))
        .and(Predicate::lookup("id", Value::Null).not());
    let compiled = graph
        .table("movie")
        .unwrap()
        .filter(predicate)
        .unwrap()
        .compile()
        .unwrap();

    assert!(compiled.sql.contains(
        "WHERE (\"movie\".\"title\" = $1 OR \"movie\".\"title\" = $2) AND NOT (\"movie\".\"id\" IS NULL)"
    ));
}
