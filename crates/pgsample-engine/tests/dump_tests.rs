//! End-to-end dump generation against the mock catalog

use pgsample_catalog::{
    CatalogError, MockCatalog, MockCatalogBuilder, MockTable, SNAPSHOT_BEGIN, SNAPSHOT_END,
};
use pgsample_engine::{DumpEngine, DumpError};
use pgsample_manifest::{Manifest, ManifestItem};
use pretty_assertions::assert_eq;
use std::io::{self, Write};

// =============================================================================
// Helper Functions
// =============================================================================

fn users_table() -> MockTable {
    MockTable::new(["id", "username", "email", "created_at"])
        .with_row([Some("1"), Some("alice"), Some("alice@example.com"), Some("2024-01-01 00:00:00")])
        .with_row([Some("2"), Some("bob"), None, Some("2024-01-02 00:00:00")])
        .with_row([Some("3"), Some("charlie"), Some("c@example.com"), Some("2024-01-03 00:00:00")])
}

fn blog_catalog() -> MockCatalog {
    MockCatalogBuilder::new()
        .with_table("users", users_table())
        .with_table(
            "posts",
            MockTable::new(["id", "user_id", "title"])
                .with_dependency("users")
                .with_row([Some("10"), Some("1"), Some("First Post")])
                .with_row([Some("11"), Some("2"), Some("Tabs\tand\nnewlines")]),
        )
        .with_table(
            "comments",
            MockTable::new(["id", "post_id", "user_id", "body"])
                .with_dependency("posts")
                .with_dependency("users")
                .with_row([Some("100"), Some("10"), Some("2"), Some("nice")]),
        )
        .build()
}

fn manifest(items: Vec<ManifestItem>) -> Manifest {
    Manifest {
        tables: items,
        ..Default::default()
    }
}

async fn dump(catalog: &MockCatalog, manifest: &Manifest) -> (Result<pgsample_engine::DumpSummary, DumpError>, String) {
    let mut out = Vec::new();
    let result = DumpEngine::new(catalog).write_dump(manifest, &mut out).await;
    (result, String::from_utf8(out).unwrap())
}

/// Table names of the COPY headers, in output order
fn copy_order(out: &str) -> Vec<&str> {
    out.lines()
        .filter_map(|l| l.strip_prefix("COPY "))
        .filter_map(|l| l.split_whitespace().next())
        .collect()
}

/// Writer that fails once `limit` bytes have been accepted
struct FailingWriter {
    written: usize,
    limit: usize,
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Output format
// =============================================================================

#[tokio::test]
async fn test_full_output_single_table() {
    let catalog = MockCatalogBuilder::new()
        .with_table(
            "users",
            MockTable::new(["id", "username"])
                .with_row([Some("1"), Some("alice")])
                .with_row([Some("2"), None]),
        )
        .build();
    let manifest = manifest(vec![ManifestItem::new("users")
        .with_post_action("SELECT pg_catalog.setval('users_id_seq', 100, true)")]);

    let (result, out) = dump(&catalog, &manifest).await;
    result.unwrap();

    let expected = "\
--
-- PostgreSQL database dump
--

BEGIN;

SET statement_timeout = 0;
SET client_encoding = 'UTF8';
SET standard_conforming_strings = on;
SET check_function_bodies = false;
SET client_min_messages = warning;

--
-- Data for Name: users; Type: TABLE DATA
--

COPY users (\"id\", \"username\") FROM stdin;
1\talice
2\t\\N
\\.

SELECT pg_catalog.setval('users_id_seq', 100, true);

COMMIT;

--
-- PostgreSQL database dump complete
--
";
    assert_eq!(out, expected);
}

#[tokio::test]
async fn test_empty_manifest() {
    let catalog = MockCatalog::new();
    let (result, out) = dump(&catalog, &Manifest::default()).await;

    let summary = result.unwrap();
    assert!(summary.tables.is_empty());
    assert!(out.contains("BEGIN;"));
    assert!(out.contains("COMMIT;"));
    assert!(out.contains("PostgreSQL database dump complete"));
    assert_eq!(out.matches("COPY ").count(), 0);
}

#[tokio::test]
async fn test_escaped_values_in_rows() {
    let catalog = blog_catalog();
    let (result, out) = dump(&catalog, &manifest(vec![ManifestItem::new("users"), ManifestItem::new("posts")])).await;
    result.unwrap();

    assert!(out.contains("11\t2\tTabs\\tand\\nnewlines\n"));
    assert!(out.contains("2\tbob\t\\N\t2024-01-02 00:00:00\n"));
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_fk_order_overrides_manifest_order() {
    let catalog = blog_catalog();
    let manifest = manifest(vec![
        ManifestItem::new("comments"),
        ManifestItem::new("posts"),
        ManifestItem::new("users"),
    ]);

    let (result, out) = dump(&catalog, &manifest).await;
    let summary = result.unwrap();

    assert_eq!(copy_order(&out), vec!["users", "posts", "comments"]);
    assert_eq!(summary.total_rows, 6);
    assert_eq!(
        summary.tables.iter().map(|t| t.rows).collect::<Vec<_>>(),
        vec![3, 2, 1]
    );
}

#[tokio::test]
async fn test_independent_tables_keep_manifest_order() {
    let catalog = MockCatalogBuilder::new()
        .with_table("zebra", MockTable::new(["id"]))
        .with_table("apple", MockTable::new(["id"]))
        .with_table("mango", MockTable::new(["id"]))
        .build();
    let manifest = manifest(vec![
        ManifestItem::new("zebra"),
        ManifestItem::new("apple"),
        ManifestItem::new("mango"),
    ]);

    let (result, out) = dump(&catalog, &manifest).await;
    result.unwrap();
    assert_eq!(copy_order(&out), vec!["zebra", "apple", "mango"]);
}

#[tokio::test]
async fn test_dependency_outside_manifest_ignored() {
    let catalog = blog_catalog();
    let (result, out) = dump(&catalog, &manifest(vec![ManifestItem::new("comments")])).await;

    result.unwrap();
    assert_eq!(copy_order(&out), vec!["comments"]);
}

#[tokio::test]
async fn test_self_reference_is_not_a_cycle() {
    let catalog = MockCatalogBuilder::new()
        .with_table(
            "employees",
            MockTable::new(["id", "manager_id"])
                .with_dependency("employees")
                .with_row([Some("1"), None])
                .with_row([Some("2"), Some("1")]),
        )
        .build();

    let (result, out) = dump(&catalog, &manifest(vec![ManifestItem::new("employees")])).await;
    assert_eq!(result.unwrap().total_rows, 2);
    assert!(out.contains("2\t1\n"));
}

#[tokio::test]
async fn test_schema_qualified_names_keep_fk_order() {
    // The catalog reports foreign keys by the short name on search_path
    let catalog = MockCatalogBuilder::new()
        .with_table("users", users_table())
        .with_table(
            "posts",
            MockTable::new(["id", "user_id", "title"])
                .with_dependency("users")
                .with_row([Some("10"), Some("1"), Some("First Post")]),
        )
        .with_alias("public.users", "users")
        .with_alias("public.posts", "posts")
        .build();
    let manifest = manifest(vec![ManifestItem::new("public.posts"), ManifestItem::new("public.users")]);

    let (result, out) = dump(&catalog, &manifest).await;
    let summary = result.unwrap();

    assert_eq!(copy_order(&out), vec!["public.users", "public.posts"]);
    assert_eq!(summary.tables[0].table, "public.users");

    let plan = DumpEngine::new(&catalog).plan(&manifest).await.unwrap();
    assert_eq!(plan.tables[1].canonical, "posts");
    assert_eq!(plan.graph.parents("posts"), vec!["users"]);
}

#[tokio::test]
async fn test_same_table_under_two_spellings_is_duplicate() {
    let catalog = MockCatalogBuilder::new()
        .with_table("users", users_table())
        .with_alias("public.users", "users")
        .build();
    let manifest = manifest(vec![ManifestItem::new("users"), ManifestItem::new("public.users")]);

    let (result, out) = dump(&catalog, &manifest).await;
    assert!(matches!(result, Err(DumpError::DuplicateTable(ref t)) if t == "public.users"));
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_cycle_reported_with_manifest_spelling() {
    let catalog = MockCatalogBuilder::new()
        .with_table("a", MockTable::new(["id"]).with_dependency("b"))
        .with_table("b", MockTable::new(["id"]).with_dependency("a"))
        .with_alias("public.a", "a")
        .build();

    let (result, _) = dump(&catalog, &manifest(vec![ManifestItem::new("public.a"), ManifestItem::new("b")])).await;
    match result {
        Err(DumpError::CyclicDependency { tables }) => assert_eq!(tables, vec!["public.a", "b"]),
        other => panic!("expected cycle error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cycle_fails_before_output() {
    let catalog = MockCatalogBuilder::new()
        .with_table("a", MockTable::new(["id"]).with_dependency("b"))
        .with_table("b", MockTable::new(["id"]).with_dependency("a"))
        .with_table("c", MockTable::new(["id"]))
        .build();
    let observer = catalog.clone();

    let (result, out) = dump(
        &catalog,
        &manifest(vec![ManifestItem::new("c"), ManifestItem::new("a"), ManifestItem::new("b")]),
    )
    .await;

    match result {
        Err(DumpError::CyclicDependency { tables }) => assert_eq!(tables, vec!["a", "b"]),
        other => panic!("expected cycle error, got {:?}", other),
    }
    assert!(out.is_empty());
    assert!(observer.executed().await.is_empty());
}

// =============================================================================
// Projection and queries
// =============================================================================

#[tokio::test]
async fn test_explicit_columns_projection() {
    let catalog = blog_catalog();
    let projected = users_table().project(&["id", "username", "email"]);
    catalog
        .add_query_result("SELECT \"id\", \"username\", \"email\" FROM users", projected)
        .await;

    let manifest = manifest(vec![
        ManifestItem::new("users").with_columns(["id", "username", "email"])
    ]);
    let (result, out) = dump(&catalog, &manifest).await;
    result.unwrap();

    let header = out.lines().find(|l| l.starts_with("COPY users")).unwrap();
    assert_eq!(header, "COPY users (\"id\", \"username\", \"email\") FROM stdin;");
    assert!(!out.contains("created_at"));
    assert!(!out.contains("2024-01-01"));
    assert!(out.contains("1\talice\talice@example.com\n"));
}

#[tokio::test]
async fn test_custom_query_with_vars() {
    let catalog = blog_catalog();
    let observer = catalog.clone();
    let sql = "SELECT * FROM users WHERE id <= 2";
    let rows = users_table().rows.into_iter().take(2).collect();
    catalog.add_query_result(sql, rows).await;

    let yaml = r#"
vars:
  max_user_id: 2
tables:
  - table: users
    query: "SELECT * FROM users WHERE id <= {{max_user_id}};"
"#;
    let manifest = Manifest::from_yaml(yaml).unwrap();
    let (result, out) = dump(&catalog, &manifest).await;

    assert_eq!(result.unwrap().total_rows, 2);
    assert_eq!(observer.executed().await, vec![sql]);
    assert!(out.contains("COPY users (\"id\", \"username\", \"email\", \"created_at\") FROM stdin;"));
    assert!(!out.contains("charlie"));
}

#[tokio::test]
async fn test_custom_query_with_explicit_columns_wraps_subquery() {
    let catalog = blog_catalog();
    let observer = catalog.clone();
    let sql = "SELECT \"id\", \"email\" FROM (SELECT * FROM users WHERE id = 1) AS pgsample_subset";
    catalog
        .add_query_result(sql, vec![vec![Some("1".to_string()), Some("alice@example.com".to_string())]])
        .await;

    let manifest = manifest(vec![ManifestItem::new("users")
        .with_query("SELECT * FROM users WHERE id = 1")
        .with_columns(["id", "email"])]);
    let (result, out) = dump(&catalog, &manifest).await;

    result.unwrap();
    assert_eq!(observer.executed().await, vec![sql]);
    assert!(out.contains("COPY users (\"id\", \"email\") FROM stdin;\n1\talice@example.com\n\\.\n"));
}

#[tokio::test]
async fn test_post_action_follows_terminator() {
    let catalog = blog_catalog();
    let manifest = manifest(vec![
        ManifestItem::new("users")
            .with_post_action("SELECT pg_catalog.setval('users_id_seq', 100, true)"),
        ManifestItem::new("posts").with_post_action("ANALYZE posts;"),
    ]);

    let (result, out) = dump(&catalog, &manifest).await;
    let summary = result.unwrap();

    assert!(out.contains("\\.\n\nSELECT pg_catalog.setval('users_id_seq', 100, true);\n\n--\n-- Data for Name: posts"));
    assert!(out.contains("\\.\n\nANALYZE posts;\n\nCOMMIT;"));
    assert_eq!(summary.tables[0].post_actions, 1);
}

#[tokio::test]
async fn test_post_action_with_trailing_comment() {
    let catalog = blog_catalog();
    let manifest = manifest(vec![
        ManifestItem::new("users").with_post_action("ANALYZE users -- refresh planner stats"),
        ManifestItem::new("posts"),
    ]);

    let (result, out) = dump(&catalog, &manifest).await;
    result.unwrap();

    assert!(out.contains("ANALYZE users -- refresh planner stats\n;\n\n--\n-- Data for Name: posts"));
}

#[tokio::test]
async fn test_custom_query_with_trailing_comment_and_columns() {
    let catalog = blog_catalog();
    let observer = catalog.clone();
    let sql = "SELECT \"id\", \"email\" FROM (SELECT * FROM users\nWHERE id <= 2 -- sample only\n) AS pgsample_subset";
    catalog
        .add_query_result(sql, vec![vec![Some("1".to_string()), Some("alice@example.com".to_string())]])
        .await;

    let manifest = manifest(vec![ManifestItem::new("users")
        .with_query("SELECT * FROM users\nWHERE id <= 2 -- sample only\n")
        .with_columns(["id", "email"])]);
    let (result, _) = dump(&catalog, &manifest).await;

    assert_eq!(result.unwrap().total_rows, 1);
    assert_eq!(observer.executed().await, vec![sql]);
}

// =============================================================================
// Snapshot
// =============================================================================

#[tokio::test]
async fn test_all_tables_read_in_one_snapshot() {
    let catalog = blog_catalog();
    let observer = catalog.clone();
    let manifest = manifest(vec![ManifestItem::new("posts"), ManifestItem::new("users")]);

    let (result, _) = dump(&catalog, &manifest).await;
    result.unwrap();

    assert_eq!(
        observer.session().await,
        vec![
            SNAPSHOT_BEGIN,
            "SELECT \"id\", \"username\", \"email\", \"created_at\" FROM users",
            "SELECT \"id\", \"user_id\", \"title\" FROM posts",
            SNAPSHOT_END,
        ]
    );
}

#[tokio::test]
async fn test_snapshot_released_after_failure() {
    let catalog = blog_catalog();
    let observer = catalog.clone();
    catalog
        .add_query_error(
            "SELECT \"id\", \"user_id\", \"title\" FROM posts",
            CatalogError::QueryError("canceling statement due to conflict with recovery".to_string()),
        )
        .await;

    let (result, _) = dump(&catalog, &manifest(vec![ManifestItem::new("users"), ManifestItem::new("posts")])).await;

    assert!(matches!(result, Err(DumpError::QueryExecution { .. })));
    assert_eq!(observer.session().await.last().map(String::as_str), Some(SNAPSHOT_END));
}

#[tokio::test]
async fn test_planning_alone_takes_no_snapshot() {
    let catalog = blog_catalog();
    let observer = catalog.clone();

    DumpEngine::new(&catalog)
        .plan(&manifest(vec![ManifestItem::new("users")]))
        .await
        .unwrap();

    assert!(observer.session().await.is_empty());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_missing_table_is_schema_error() {
    let catalog = blog_catalog();
    let (result, out) = dump(
        &catalog,
        &manifest(vec![ManifestItem::new("users"), ManifestItem::new("ghosts")]),
    )
    .await;

    match result {
        Err(DumpError::SchemaQuery { table, source }) => {
            assert_eq!(table, "ghosts");
            assert_eq!(source, CatalogError::TableNotFound("ghosts".to_string()));
        }
        other => panic!("expected schema error, got {:?}", other),
    }
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_permission_denied_is_schema_error() {
    let catalog = blog_catalog();
    catalog
        .add_table_error("posts", CatalogError::PermissionDenied("posts".to_string()))
        .await;

    let (result, out) = dump(&catalog, &manifest(vec![ManifestItem::new("posts")])).await;
    assert!(matches!(result, Err(DumpError::SchemaQuery { .. })));
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_unknown_explicit_column() {
    let catalog = blog_catalog();
    let manifest = manifest(vec![ManifestItem::new("users").with_columns(["id", "password"])]);

    let (result, out) = dump(&catalog, &manifest).await;
    match result {
        Err(DumpError::UnknownColumn { table, column }) => {
            assert_eq!(table, "users");
            assert_eq!(column, "password");
        }
        other => panic!("expected unknown column, got {:?}", other),
    }
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_duplicate_table_rejected() {
    let catalog = blog_catalog();
    let manifest = manifest(vec![ManifestItem::new("users"), ManifestItem::new("users")]);

    let (result, out) = dump(&catalog, &manifest).await;
    assert!(matches!(result, Err(DumpError::DuplicateTable(ref t)) if t == "users"));
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_query_error_aborts() {
    let catalog = blog_catalog();
    catalog
        .add_query_error(
            "SELECT \"id\", \"user_id\", \"title\" FROM posts",
            CatalogError::QueryError("relation is locked".to_string()),
        )
        .await;
    let manifest = manifest(vec![
        ManifestItem::new("users"),
        ManifestItem::new("posts"),
        ManifestItem::new("comments"),
    ]);

    let (result, out) = dump(&catalog, &manifest).await;

    assert!(matches!(result, Err(DumpError::QueryExecution { ref table, .. }) if table == "posts"));
    assert_eq!(copy_order(&out), vec!["users"]);
    assert!(!out.contains("COMMIT;"));
}

#[tokio::test]
async fn test_stream_error_mid_table() {
    let catalog = blog_catalog();
    catalog
        .add_stream_error(
            "SELECT \"id\", \"username\", \"email\", \"created_at\" FROM users",
            1,
            CatalogError::ConnectionError("server closed the connection".to_string()),
        )
        .await;

    let (result, out) = dump(&catalog, &manifest(vec![ManifestItem::new("users")])).await;

    match result {
        Err(DumpError::QueryExecution { table, source }) => {
            assert_eq!(table, "users");
            assert!(matches!(source, CatalogError::ConnectionError(_)));
        }
        other => panic!("expected query error, got {:?}", other),
    }
    assert!(out.contains("alice"));
    assert!(!out.contains("bob"));
    assert!(!out.contains("\\."));
}

#[tokio::test]
async fn test_output_error_aborts() {
    let catalog = blog_catalog();
    let mut out = FailingWriter { written: 0, limit: 400 };

    let result = DumpEngine::new(&catalog)
        .write_dump(&manifest(vec![ManifestItem::new("users"), ManifestItem::new("posts")]), &mut out)
        .await;

    match result {
        Err(DumpError::Output(err)) => assert_eq!(err.to_string(), "disk full"),
        other => panic!("expected output error, got {:?}", other),
    }
}

// =============================================================================
// Planning
// =============================================================================

#[tokio::test]
async fn test_plan_without_output() {
    let catalog = blog_catalog();
    let observer = catalog.clone();
    let manifest = manifest(vec![ManifestItem::new("posts"), ManifestItem::new("users")]);

    let plan = DumpEngine::new(&catalog).plan(&manifest).await.unwrap();

    assert_eq!(plan.order(), vec!["users", "posts"]);
    assert_eq!(plan.tables[1].sql, "SELECT \"id\", \"user_id\", \"title\" FROM posts");
    assert_eq!(plan.graph.parents("posts"), vec!["users"]);
    assert!(observer.executed().await.is_empty());
}

#[tokio::test]
async fn test_structural_balance() {
    let catalog = blog_catalog();
    let manifest = manifest(vec![
        ManifestItem::new("comments"),
        ManifestItem::new("users"),
        ManifestItem::new("posts"),
    ]);

    let (result, out) = dump(&catalog, &manifest).await;
    result.unwrap();

    let headers = out.lines().filter(|l| l.starts_with("COPY ") && l.ends_with(" FROM stdin;")).count();
    let terminators = out.lines().filter(|l| *l == "\\.").count();
    assert_eq!(headers, 3);
    assert_eq!(headers, terminators);
}
