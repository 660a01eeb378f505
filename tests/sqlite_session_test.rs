//! Integration tests against a real SQLite database file.
//!
//! Tests verify that:
//! - Savepoints roll back only the nested scope
//! - get-or-create inserts once and finds the row afterwards
//! - One-shot execution reports affected rows and insert ids
//! - Execution contexts commit or roll back as a unit
//! - Joined rows are stitched into object graphs

use db_async_exec::db::{Database, JoinDescriptor, QueryMeta, RawCursor, RowDecoder, SqlxDriver};
use db_async_exec::error::DbError;
use db_async_exec::models::{DatabaseType, ModelMeta, Statement, TransactionKind, Value};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Create a SQLite database with a users/tweets schema.
async fn setup_db() -> (Database<SqlxDriver>, String) {
    let temp_file = NamedTempFile::new().unwrap();
    // Keep the temp file alive - prevent deletion when function returns
    let db_path = temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let db = Database::connect(&format!("sqlite:{}?autorollback=true", db_path))
        .await
        .unwrap();
    assert_eq!(db.pool().database_type(), DatabaseType::SQLite);
    assert_eq!(db.pool().max_connections(), 1);

    db.execute_sql(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
        &[],
        true,
    )
    .await
    .unwrap();
    db.execute_sql(
        "CREATE TABLE tweets (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL, body TEXT)",
        &[],
        true,
    )
    .await
    .unwrap();

    (db, db_path)
}

async fn user_ids(db: &Database<SqlxDriver>) -> Vec<i64> {
    let mut session = db.session().await.unwrap();
    let rows = session
        .query("SELECT id FROM users ORDER BY id", &[], RowDecoder::Tuples)
        .await
        .unwrap()
        .into_vec()
        .await
        .unwrap();
    session.release().await;
    rows.iter()
        .filter_map(|r| r.as_tuple().and_then(|t| t[0].as_i64()))
        .collect()
}

#[tokio::test]
async fn test_savepoint_rollback_keeps_outer_work() {
    let (db, db_path) = setup_db().await;
    let mut session = db.session().await.unwrap();

    session
        .atomic(None, async |s| {
            s.execute("INSERT INTO users (id, name) VALUES (1, 'alice')", &[], true)
                .await?;
            let inner: Result<(), DbError> = s
                .atomic(None, async |s| {
                    s.execute("INSERT INTO users (id, name) VALUES (2, 'bob')", &[], true)
                        .await?;
                    Err(DbError::invalid_input("discard bob"))
                })
                .await;
            assert!(inner.is_err());
            s.execute("INSERT INTO users (id, name) VALUES (3, 'carol')", &[], true)
                .await?;
            Ok(())
        })
        .await
        .unwrap();
    session.release().await;

    assert_eq!(user_ids(&db).await, vec![1, 3]);
    db.close().await;
    std::fs::remove_file(&db_path).ok();
}

#[tokio::test]
async fn test_transaction_kind_and_constraint_failure() {
    let (db, db_path) = setup_db().await;
    let mut session = db.session().await.unwrap();

    let result = session
        .transaction(Some(TransactionKind::Immediate), async |s| {
            s.execute("INSERT INTO users (id, name) VALUES (1, 'alice')", &[], true)
                .await?;
            s.execute("INSERT INTO users (id, name) VALUES (2, 'alice')", &[], true)
                .await?;
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(DbError::Integrity { .. })));
    assert_eq!(session.depth(), 0);
    session.release().await;

    assert!(user_ids(&db).await.is_empty());
    db.close().await;
    std::fs::remove_file(&db_path).ok();
}

#[tokio::test]
async fn test_get_or_create_inserts_once() {
    let (db, db_path) = setup_db().await;
    let mut session = db.session().await.unwrap();

    let lookup = Statement::new(
        "SELECT id, name FROM users WHERE name = ?",
        vec![Value::from("dave")],
    );
    let insert = Statement::new(
        "INSERT INTO users (name) VALUES (?)",
        vec![Value::from("dave")],
    );

    let (record, created) = session
        .get_or_create(&lookup, &insert, RowDecoder::Dicts)
        .await
        .unwrap();
    assert!(created);
    assert_eq!(record.as_dict().unwrap()["name"], Value::from("dave"));

    let (again, created) = session
        .get_or_create(&lookup, &insert, RowDecoder::Dicts)
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again, record);
    session.release().await;

    assert_eq!(user_ids(&db).await.len(), 1);
    db.close().await;
    std::fs::remove_file(&db_path).ok();
}

#[tokio::test]
async fn test_execute_sql_reports_write_results() {
    let (db, db_path) = setup_db().await;

    let cursor = db
        .execute_sql(
            "INSERT INTO users (name) VALUES (?)",
            &[Value::from("erin")],
            true,
        )
        .await
        .unwrap();
    assert_eq!(cursor.rows_affected(), 1);
    assert_eq!(cursor.last_insert_id(), Some(1));

    let err = db
        .execute_sql("SELECT * FROM missing_table", &[], false)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Statement { .. }));
    assert_eq!(db.pool().available(), 1);

    db.close().await;
    std::fs::remove_file(&db_path).ok();
}

#[tokio::test]
async fn test_execution_context_rolls_back_on_error() {
    let (db, db_path) = setup_db().await;

    let result: Result<(), DbError> = db
        .execution_context(true, async |s| {
            s.execute("INSERT INTO users (name) VALUES ('frank')", &[], true)
                .await?;
            Err(DbError::invalid_input("abort"))
        })
        .await;
    assert!(result.is_err());
    assert!(user_ids(&db).await.is_empty());

    db.execution_context(true, async |s| {
        s.execute("INSERT INTO users (name) VALUES ('grace')", &[], true)
            .await?;
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(user_ids(&db).await, vec![1]);

    db.close().await;
    std::fs::remove_file(&db_path).ok();
}

#[tokio::test]
async fn test_left_join_stitched_into_graphs() {
    let (db, db_path) = setup_db().await;
    db.execute_sql(
        "INSERT INTO users (id, name) VALUES (1, 'alice'), (2, 'bob')",
        &[],
        true,
    )
    .await
    .unwrap();
    db.execute_sql(
        "INSERT INTO tweets (id, user_id, body) VALUES (10, 1, 'hi'), (11, 1, 'again')",
        &[],
        true,
    )
    .await
    .unwrap();

    let meta = Arc::new(
        QueryMeta::new(ModelMeta::new("users", &["id"]))
            .join(
                ModelMeta::new("tweets", &["id"]),
                JoinDescriptor::backref("users", "tweets", "user_id", "tweets"),
            )
            .with_columns([
                ("users", "id"),
                ("users", "name"),
                ("tweets", "id"),
                ("tweets", "user_id"),
                ("tweets", "body"),
            ]),
    );

    let mut session = db.session().await.unwrap();
    let graphs = session
        .query(
            "SELECT u.id, u.name, t.id, t.user_id, t.body \
             FROM users u LEFT JOIN tweets t ON t.user_id = u.id \
             ORDER BY u.id, t.id",
            &[],
            RowDecoder::AggregateModel(meta),
        )
        .await
        .unwrap()
        .into_vec()
        .await
        .unwrap();
    session.release().await;

    assert_eq!(graphs.len(), 2);
    let alice = graphs[0].as_graph().unwrap();
    assert_eq!(alice.root().get("name"), Some(&Value::from("alice")));
    let bodies: Vec<_> = alice
        .related_many(alice.root_id(), "tweets")
        .iter()
        .filter_map(|t| t.get("body").and_then(Value::as_str).map(str::to_string))
        .collect();
    assert_eq!(bodies, vec!["hi", "again"]);

    let bob = graphs[1].as_graph().unwrap();
    assert!(bob.related_many(bob.root_id(), "tweets").is_empty());

    db.close().await;
    std::fs::remove_file(&db_path).ok();
}
