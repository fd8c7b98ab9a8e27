//! Builder-time validation and graph composition.

use querygraph::prelude::*;

fn graph() -> QueryGraph {
    let schema = Schema::new(vec![
        Relation::new(
            "film",
            vec![
                Column::primary("id"),
                Column::scalar("title"),
                Column::reverse("planets", "planet", "film"),
            ],
        ),
        Relation::new(
            "planet",
            vec![
                Column::primary("id"),
                Column::scalar("name"),
                Column::forward("film", "film").nullable(),
            ],
        ),
    ])
    .unwrap();
    QueryGraph::new(schema)
}

#[test]
fn test_unknown_relation() {
    let graph = graph();
    assert!(matches!(
        graph.table("starship"),
        Err(QueryError::UnknownRelation(_))
    ));
}

#[test]
fn test_unknown_columns_fail_before_compiling() {
    let graph = graph();
    let planets = graph.table("planet").unwrap();

    assert!(matches!(
        planets.select(Selection::fields(["climate"])),
        Err(QueryError::UnknownColumn { .. })
    ));
    assert!(matches!(
        planets.insert(Changes::new().set("climate", "arid")),
        Err(QueryError::UnknownColumn { .. })
    ));
    assert!(matches!(
        planets.update(Changes::new().set("climate", "arid")),
        Err(QueryError::UnknownColumn { .. })
    ));
    assert!(matches!(
        planets.order_by("climate"),
        Err(QueryError::UnknownColumn { .. })
    ));
}

#[test]
fn test_nested_selection_is_validated() {
    let graph = graph();
    let err = graph
        .table("planet")
        .unwrap()
        .select(Selection::new().lookup("film", Selection::fields(["director"])))
        .unwrap_err();
    match err {
        QueryError::UnknownColumn { column, relation } => {
            assert_eq!(column, "director");
            assert_eq!(relation, "film");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_cannot_order_by_reverse_relation() {
    let graph = graph();
    assert!(matches!(
        graph.table("film").unwrap().order_by("planets"),
        Err(QueryError::InvalidValue { .. })
    ));
}

#[test]
fn test_queries_are_persistent() {
    let graph = graph();
    let films = graph.table("film").unwrap();
    let titled = films.select(Selection::fields(["title"])).unwrap();
    let first = films.limit(1).unwrap();

    assert_eq!(
        films.compile().unwrap().sql,
        "SELECT row_to_json(\"x\") FROM (SELECT * FROM \"film\") AS \"x\""
    );
    assert_eq!(
        titled.compile().unwrap().sql,
        "SELECT row_to_json(\"x\") FROM (SELECT \"film\".\"title\" FROM \"film\") AS \"x\""
    );
    assert_eq!(
        first.compile().unwrap().sql,
        "SELECT row_to_json(\"x\") FROM (SELECT * FROM \"film\" LIMIT 1) AS \"x\""
    );
}

#[test]
fn test_later_select_replaces_earlier() {
    let graph = graph();
    let compiled = graph
        .table("film")
        .unwrap()
        .select(Selection::fields(["id"]))
        .unwrap()
        .select(Selection::fields(["title"]))
        .unwrap()
        .compile()
        .unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT row_to_json(\"x\") FROM (SELECT \"film\".\"title\" FROM \"film\") AS \"x\""
    );
}

#[test]
fn test_common_runs_all_and_returns_last() {
    let graph = graph();
    let insert = graph
        .table("film")
        .unwrap()
        .insert(Changes::new().set("title", "A New Hope"))
        .unwrap();
    let titles = graph
        .table("film")
        .unwrap()
        .select(Selection::fields(["title"]))
        .unwrap();

    let compiled = graph.common(&[insert, titles]).unwrap().compile().unwrap();
    assert_eq!(
        compiled.sql,
        "WITH \"t1\" AS (INSERT INTO \"film\" (\"title\") VALUES ($1) RETURNING \"id\") \
         SELECT row_to_json(\"x\") FROM (SELECT \"film\".\"title\" FROM \"film\") AS \"x\""
    );
}

#[test]
fn test_common_needs_a_query() {
    let graph = graph();
    assert!(matches!(
        graph.common(&[]),
        Err(QueryError::ConflictingArguments(_))
    ));
}

#[test]
fn test_values_as_select_source() {
    let graph = graph();
    let compiled = graph
        .values(&["n"], vec![vec![Value::Int(1)], vec![Value::Int(2)]])
        .unwrap()
        .select(Selection::fields(["n"]))
        .unwrap()
        .compile()
        .unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT row_to_json(\"x\") FROM (SELECT \"v1\".\"n\" FROM (VALUES (CAST($1 AS bigint)), ($2)) AS \"v1\"(\"n\")) AS \"x\""
    );
    assert_eq!(compiled.args, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn test_values_filter_compares_as_numbers() {
    let graph = graph();
    let compiled = graph
        .values(
            &["n"],
            vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(10)]],
        )
        .unwrap()
        .filter(Predicate::lookup("n__gt", 2))
        .unwrap()
        .compile()
        .unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT row_to_json(\"x\") FROM (SELECT * FROM (VALUES (CAST($1 AS bigint)), ($2), ($3)) \
         AS \"v1\"(\"n\") WHERE \"v1\".\"n\" > $4) AS \"x\""
    );
}

#[test]
fn test_values_column_types_come_from_every_row() {
    let graph = graph();
    let compiled = graph
        .values(
            &["n", "label"],
            vec![
                vec![Value::Null, Value::from("a")],
                vec![Value::Float(1.5), Value::Null],
                vec![Value::Int(2), Value::from(true)],
            ],
        )
        .unwrap()
        .compile()
        .unwrap();
    assert!(compiled.sql.contains(
        "(VALUES (CAST($1 AS double precision), $2), ($3, $4), ($5, $6)) AS \"v1\"(\"n\", \"label\")"
    ));
}

#[test]
fn test_values_cannot_be_mutated() {
    let graph = graph();
    let rows = graph.values(&["n"], vec![vec![Value::Int(1)]]).unwrap();
    assert!(matches!(
        rows.insert(Changes::new().set("n", 2)),
        Err(QueryError::NotInsertable(_))
    ));
    assert!(matches!(rows.delete(), Err(QueryError::NotMutable(_))));
}

#[test]
fn test_handles_do_not_cross_graphs() {
    let first = graph();
    let second = graph();
    let other = first.table("film").unwrap().limit(1).unwrap();

    let err = second
        .table("planet")
        .unwrap()
        .filter(Predicate::lookup("film__in", other.handle()))
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownQueryNode(_)));
}

#[test]
fn test_changes_from_json() {
    let graph = graph();
    let payload = serde_json::json!({
        "title": "A New Hope",
        "planets": [{"name": "Tatooine"}, {"name": "Alderaan"}]
    });
    let serde_json::Value::Object(map) = payload else {
        panic!("expected an object");
    };

    let compiled = graph
        .table("film")
        .unwrap()
        .insert(Changes::from_json(map))
        .unwrap()
        .compile()
        .unwrap();
    assert_eq!(compiled.sql.matches("INSERT INTO \"planet\"").count(), 2);
    assert_eq!(compiled.args.len(), 3);
}
