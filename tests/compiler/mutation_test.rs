//! Compiled writes: staged inserts, updates and deletes, nested and reverse
//! inserts, and branches.

use insta::assert_snapshot;
use querygraph::prelude::*;

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
                Column::forward("movie", "movie").nullable(),
            ],
        ),
        Relation::new(
            "film",
            vec![
                Column::primary("id"),
                Column::scalar("title"),
                Column::scalar("year").nullable().typed("integer"),
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

const PLANET_WITH_FILM: &str = "WITH \"t1\" AS (INSERT INTO \"film\" (\"title\") VALUES ($1) RETURNING \"id\"), \
     \"t2\" AS (INSERT INTO \"planet\" (\"name\", \"film\") VALUES ($2, (SELECT \"t1\".\"id\" FROM \"t1\")) RETURNING *) \
     SELECT row_to_json(\"x\") FROM (SELECT * FROM \"t2\") AS \"x\"";

#[test]
fn test_insert_then_select() {
    let graph = graph();
    let compiled = graph
        .table("movie")
        .unwrap()
        .insert(Changes::new().set("title", "A New Hope"))
        .unwrap()
        .select(Selection::fields(["id", "title"]))
        .unwrap()
        .compile_with(&CompileOptions::with_placeholder(Placeholder::Format))
        .unwrap();

    assert_eq!(
        compiled.sql,
        "WITH \"t1\" AS (INSERT INTO \"movie\" (\"title\") VALUES (%s) RETURNING \"id\", \"title\") \
         SELECT row_to_json(\"x\") FROM (SELECT \"t1\".\"id\", \"t1\".\"title\" FROM \"t1\") AS \"x\""
    );
    assert_eq!(compiled.args, vec![Value::from("A New Hope")]);
}

#[test]
fn test_insert_with_sub_query_value() {
    let graph = graph();
    let film = graph
        .table("film")
        .unwrap()
        .insert(Changes::new().set("title", "A New Hope"))
        .unwrap()
        .select(Selection::fields(["id"]))
        .unwrap();
    let compiled = graph
        .table("planet")
        .unwrap()
        .insert(Changes::new().set("name", "Tatooine").query("film", &film))
        .unwrap()
        .compile()
        .unwrap();

    assert_eq!(compiled.sql, PLANET_WITH_FILM);
    assert_eq!(
        compiled.args,
        vec![Value::from("A New Hope"), Value::from("Tatooine")]
    );
}

#[test]
fn test_nested_insert_matches_explicit_sub_query() {
    let graph = graph();
    let compiled = graph
        .table("planet")
        .unwrap()
        .insert(
            Changes::new()
                .set("name", "Tatooine")
                .nested("film", Changes::new().set("title", "A New Hope")),
        )
        .unwrap()
        .compile()
        .unwrap();

    assert_eq!(compiled.sql, PLANET_WITH_FILM);
}

#[test]
fn test_branch_referenced_twice_is_staged_once() {
    let graph = graph();
    let film = graph
        .table("film")
        .unwrap()
        .insert(Changes::new().set("title", "A New Hope"))
        .unwrap();
    let key = film.select(Selection::fields(["id"])).unwrap();
    let planet = graph
        .table("planet")
        .unwrap()
        .insert(Changes::new().set("name", "Tatooine").query("film", &key))
        .unwrap();

    let compiled = film.branch(&planet).compile().unwrap();

    assert_eq!(compiled.sql.matches("INSERT INTO \"film\"").count(), 1);
    assert_eq!(compiled.sql, PLANET_WITH_FILM);
}

#[test]
fn test_unreferenced_branch_still_runs_first() {
    let graph = graph();
    let cleanup = graph
        .table("film")
        .unwrap()
        .filter(Predicate::lookup("title", "Howard the Duck"))
        .unwrap()
        .delete()
        .unwrap();
    let films = graph
        .table("film")
        .unwrap()
        .select(Selection::fields(["title"]))
        .unwrap();

    let compiled = cleanup.branch(&films).compile().unwrap();

    assert_eq!(
        compiled.sql,
        "WITH \"t1\" AS (DELETE FROM \"film\" WHERE \"film\".\"title\" = $1 RETURNING \"id\") \
         SELECT row_to_json(\"x\") FROM (SELECT \"film\".\"title\" FROM \"film\") AS \"x\""
    );
}

#[test]
fn test_reverse_insert_reads_back_through_union() {
    let graph = graph();
    let compiled = graph
        .table("movie")
        .unwrap()
        .insert(Changes::new().set("title", "A New Hope").many(
            "actors",
            vec![
                Changes::new().set("first_name", "Mark"),
                Changes::new().set("first_name", "Carrie"),
            ],
        ))
        .unwrap()
        .select(Selection::fields(["title"]).lookup("actors", Selection::fields(["first_name"])))
        .unwrap()
        .compile()
        .unwrap();

    assert_eq!(
        compiled.sql,
        "WITH \"t1\" AS (INSERT INTO \"movie\" (\"title\") VALUES ($1) RETURNING \"id\", \"title\"), \
         \"t2\" AS (INSERT INTO \"actor\" (\"first_name\", \"movie\") VALUES ($2, (SELECT \"t1\".\"id\" FROM \"t1\")) RETURNING *), \
         \"t3\" AS (INSERT INTO \"actor\" (\"first_name\", \"movie\") VALUES ($3, (SELECT \"t1\".\"id\" FROM \"t1\")) RETURNING *) \
         SELECT row_to_json(\"x\") FROM (SELECT \"t1\".\"title\", \"j1\".\"value\" AS \"actors\" FROM \"t1\" \
         LEFT JOIN LATERAL (SELECT coalesce(array_agg(row_to_json(\"a1\")), '{}') AS \"value\" \
         FROM (SELECT \"u1\".\"first_name\" FROM (SELECT * FROM \"t2\" UNION ALL SELECT * FROM \"t3\") AS \"u1\" \
         WHERE \"u1\".\"movie\" = \"t1\".\"id\") AS \"a1\") AS \"j1\" ON TRUE) AS \"x\""
    );
    assert_eq!(
        compiled.args,
        vec![
            Value::from("A New Hope"),
            Value::from("Mark"),
            Value::from("Carrie")
        ]
    );
}

#[test]
fn test_reverse_rows_cannot_set_link_column() {
    let graph = graph();
    let err = graph
        .table("movie")
        .unwrap()
        .insert(Changes::new().many(
            "actors",
            vec![Changes::new().set("first_name", "Mark").set("movie", 1)],
        ))
        .unwrap_err();
    assert!(matches!(err, QueryError::ConflictingArguments(_)));
}

#[test]
fn test_update_filtered_relation() {
    let graph = graph();
    let compiled = graph
        .table("movie")
        .unwrap()
        .filter(Predicate::lookup("id", 2))
        .unwrap()
        .update(Changes::new().set("title", "Empire"))
        .unwrap()
        .compile()
        .unwrap();

    assert_snapshot!(
        compiled.sql,
        @r#"WITH "t1" AS (UPDATE "movie" SET "title" = $1 WHERE "movie"."id" = $2 RETURNING *) SELECT row_to_json("x") FROM (SELECT * FROM "t1") AS "x""#
    );
    assert_eq!(compiled.args, vec![Value::from("Empire"), Value::Int(2)]);
}

#[test]
fn test_update_with_join_filter() {
    let graph = graph();
    let compiled = graph
        .table("actor")
        .unwrap()
        .filter(Predicate::lookup("movie__title", "A New Hope"))
        .unwrap()
        .update(Changes::new().set("first_name", "Luke"))
        .unwrap()
        .select(Selection::fields(["id"]))
        .unwrap()
        .compile()
        .unwrap();

    assert_eq!(
        compiled.sql,
        "WITH \"t1\" AS (UPDATE \"actor\" SET \"first_name\" = $1 WHERE EXISTS (SELECT 1 FROM \"movie\" \
         WHERE \"movie\".\"id\" = \"actor\".\"movie\" AND \"movie\".\"title\" = $2) RETURNING \"id\") \
         SELECT row_to_json(\"x\") FROM (SELECT \"t1\".\"id\" FROM \"t1\") AS \"x\""
    );
}

#[test]
fn test_update_with_nested_insert_reads_it_back() {
    let graph = graph();
    let compiled = graph
        .table("planet")
        .unwrap()
        .filter(Predicate::lookup("name", "Hoth"))
        .unwrap()
        .update(Changes::new().nested("film", Changes::new().set("title", "Empire")))
        .unwrap()
        .select(Selection::fields(["name"]).lookup("film", Selection::fields(["title"])))
        .unwrap()
        .compile()
        .unwrap();

    assert_eq!(
        compiled.sql,
        "WITH \"t1\" AS (INSERT INTO \"film\" (\"title\") VALUES ($1) RETURNING *), \
         \"t2\" AS (UPDATE \"planet\" SET \"film\" = (SELECT \"t1\".\"id\" FROM \"t1\") \
         WHERE \"planet\".\"name\" = $2 RETURNING \"id\", \"name\", \"film\") \
         SELECT row_to_json(\"x\") FROM (SELECT \"t2\".\"name\", row_to_json(\"j1\") AS \"film\" FROM \"t2\" \
         LEFT JOIN LATERAL (SELECT \"u1\".\"title\" FROM (SELECT * FROM \"t1\") AS \"u1\" \
         WHERE \"u1\".\"id\" = \"t2\".\"film\") AS \"j1\" ON TRUE) AS \"x\""
    );
    assert_eq!(compiled.args, vec![Value::from("Empire"), Value::from("Hoth")]);
}

#[test]
fn test_empty_update_rejected_at_compile() {
    let graph = graph();
    let query = graph.table("movie").unwrap().update(Changes::new()).unwrap();
    assert!(matches!(
        query.compile(),
        Err(QueryError::InvalidValue { .. })
    ));
}

#[test]
fn test_update_cannot_add_reverse_rows() {
    let graph = graph();
    let err = graph
        .table("movie")
        .unwrap()
        .update(Changes::new().many("actors", vec![Changes::new().set("first_name", "x")]))
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidValue { .. }));
}

#[test]
fn test_selected_query_is_not_mutable() {
    let graph = graph();
    let err = graph
        .table("movie")
        .unwrap()
        .select(Selection::fields(["title"]))
        .unwrap()
        .delete()
        .unwrap_err();
    assert!(matches!(err, QueryError::NotMutable(_)));
}

#[test]
fn test_insert_from_values() {
    let graph = graph();
    let rows = graph
        .values(
            &["title"],
            vec![vec![Value::from("A New Hope")], vec![Value::from("Empire")]],
        )
        .unwrap();
    let compiled = graph
        .table("film")
        .unwrap()
        .insert(Changes::from_query(&rows))
        .unwrap()
        .select(Selection::fields(["title"]))
        .unwrap()
        .compile()
        .unwrap();

    assert_eq!(
        compiled.sql,
        "WITH \"t1\" AS (INSERT INTO \"film\" (\"title\") SELECT \"v1\".\"title\" \
         FROM (VALUES (CAST($1 AS text)), ($2)) AS \"v1\"(\"title\") RETURNING \"id\", \"title\") \
         SELECT row_to_json(\"x\") FROM (SELECT \"t1\".\"title\" FROM \"t1\") AS \"x\""
    );
    assert_eq!(compiled.args.len(), 2);
}

#[test]
fn test_insert_from_values_casts_to_declared_types() {
    let graph = graph();
    let rows = graph
        .values(
            &["title", "year"],
            vec![
                vec![Value::from("A New Hope"), Value::Int(1977)],
                vec![Value::from("Empire"), Value::Null],
            ],
        )
        .unwrap();
    let compiled = graph
        .table("film")
        .unwrap()
        .insert(Changes::from_query(&rows))
        .unwrap()
        .compile()
        .unwrap();

    assert_eq!(
        compiled.sql,
        "WITH \"t1\" AS (INSERT INTO \"film\" (\"title\", \"year\") SELECT \"v1\".\"title\", \"v1\".\"year\" \
         FROM (VALUES (CAST($1 AS text), CAST($2 AS integer)), ($3, $4)) AS \"v1\"(\"title\", \"year\") \
         RETURNING *) SELECT row_to_json(\"x\") FROM (SELECT * FROM \"t1\") AS \"x\""
    );
    assert_eq!(compiled.args[1], Value::Int(1977));
}

#[test]
fn test_insert_from_query_checks_target_columns() {
    let graph = graph();
    let rows = graph
        .values(&["rating"], vec![vec![Value::Int(5)]])
        .unwrap();
    let query = graph
        .table("film")
        .unwrap()
        .insert(Changes::from_query(&rows))
        .unwrap();
    assert!(matches!(
        query.compile(),
        Err(QueryError::UnknownColumn { .. })
    ));
}

#[test]
fn test_compile_is_deterministic() {
    let graph = graph();
    let query = graph
        .table("planet")
        .unwrap()
        .insert(
            Changes::new()
                .set("name", "Hoth")
                .nested("film", Changes::new().set("title", "Empire")),
        )
        .unwrap()
        .select(Selection::fields(["name"]).lookup("film", Selection::fields(["title"])))
        .unwrap();

    let first = query.compile().unwrap();
    let second = query.compile().unwrap();
    assert_eq!(first, second);
}
