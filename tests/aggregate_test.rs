//! Integration tests for aggregate row stitching.

mod common;

use common::{MockCursor, MockHandle, row};
use db_async_exec::db::{
    AggregateStitcher, CursorState, JoinDescriptor, QueryMeta, ResultWrapper, RowDecoder,
};
use db_async_exec::models::{DumpOptions, Instance, ModelMeta, ObjectGraph, Relation, Value};
use std::sync::Arc;

/// user -< tweet -< comment
fn user_tweets_comments() -> Arc<QueryMeta> {
    Arc::new(
        QueryMeta::new(ModelMeta::new("user", &["id"]))
            .join(
                ModelMeta::new("tweet", &["id"]),
                JoinDescriptor::backref("user", "tweet", "user_id", "tweets"),
            )
            .join(
                ModelMeta::new("comment", &["id"]),
                JoinDescriptor::backref("tweet", "comment", "tweet_id", "comments"),
            )
            .with_columns([
                ("user", "id"),
                ("tweet", "id"),
                ("tweet", "user_id"),
                ("comment", "id"),
                ("comment", "tweet_id"),
            ]),
    )
}

fn scenario_rows() -> Vec<Vec<Value>> {
    vec![
        row(&[Some(1), Some(10), Some(1), Some(100), Some(10)]),
        row(&[Some(1), Some(10), Some(1), Some(101), Some(10)]),
        row(&[Some(1), Some(11), Some(1), None, None]),
        row(&[Some(2), None, None, None, None]),
    ]
}

async fn stitch(handle: &MockHandle, meta: Arc<QueryMeta>, rows: Vec<Vec<Value>>) -> Vec<ObjectGraph> {
    let cursor = MockCursor::over(handle, &["c0", "c1", "c2", "c3", "c4"], rows);
    let result = ResultWrapper::new(cursor, RowDecoder::AggregateModel(meta));
    result
        .into_vec()
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.as_graph().cloned().unwrap())
        .collect()
}

fn ids(instances: Vec<&Instance>) -> Vec<i64> {
    instances
        .iter()
        .filter_map(|i| i.get("id").and_then(Value::as_i64))
        .collect()
}

#[tokio::test]
async fn test_one_group_per_root_with_backref_lists() {
    let handle = MockHandle::default();
    let graphs = stitch(&handle, user_tweets_comments(), scenario_rows()).await;
    assert_eq!(graphs.len(), 2);

    let first = &graphs[0];
    assert_eq!(first.root().get("id"), Some(&Value::Int(1)));
    assert_eq!(ids(first.related_many(first.root_id(), "tweets")), vec![10, 11]);

    let tweet_ids = first.related_ids(first.root_id(), "tweets");
    assert_eq!(ids(first.related_many(tweet_ids[0], "comments")), vec![100, 101]);
    assert!(first.related_many(tweet_ids[1], "comments").is_empty());

    let second = &graphs[1];
    assert_eq!(second.root().get("id"), Some(&Value::Int(2)));
    assert!(second.related_many(second.root_id(), "tweets").is_empty());
    assert_eq!(second.len(), 1);
}

#[tokio::test]
async fn test_outer_join_placeholders_never_attach() {
    let handle = MockHandle::default();
    let meta = Arc::new(
        QueryMeta::new(ModelMeta::new("tweet", &["id"]))
            .join(
                ModelMeta::new("user", &["id"]),
                JoinDescriptor::forward("tweet", "user", "user_id", "author"),
            )
            .with_columns([("tweet", "id"), ("tweet", "user_id"), ("user", "id")]),
    );
    let rows = vec![
        row(&[Some(10), Some(1), Some(1)]),
        row(&[Some(11), Some(2), None]),
    ];
    let cursor = MockCursor::over(&handle, &["a", "b", "c"], rows);
    let graphs: Vec<ObjectGraph> = ResultWrapper::new(cursor, RowDecoder::AggregateModel(meta))
        .into_vec()
        .await
        .unwrap()
        .into_iter()
        .filter_map(|r| r.as_graph().cloned())
        .collect();

    let author = graphs[0].related_one(graphs[0].root_id(), "author").unwrap();
    assert_eq!(author.get("id"), Some(&Value::Int(1)));
    // Referenced user missing from the result: the edge is simply not created.
    assert!(graphs[1].related_one(graphs[1].root_id(), "author").is_none());
    assert_eq!(graphs[1].len(), 1);
}

#[tokio::test]
async fn test_composite_keys_compare_as_tuples() {
    let handle = MockHandle::default();
    let meta = Arc::new(
        QueryMeta::new(ModelMeta::new("student", &["id"]))
            .join(
                ModelMeta::new("grade", &["student_id", "term"]),
                JoinDescriptor::backref("student", "grade", "student_id", "grades"),
            )
            .with_columns([("student", "id"), ("grade", "student_id"), ("grade", "term")]),
    );
    let rows = vec![
        row(&[Some(7), Some(7), Some(1)]),
        row(&[Some(7), Some(7), Some(2)]),
        row(&[Some(7), Some(7), Some(1)]),
        row(&[Some(7), Some(7), None]),
    ];
    let cursor = MockCursor::over(&handle, &["a", "b", "c"], rows);
    let mut result = ResultWrapper::new(cursor, RowDecoder::AggregateModel(meta));
    let graph = result.one().await.unwrap().as_graph().unwrap();

    let terms: Vec<i64> = graph
        .related_many(graph.root_id(), "grades")
        .iter()
        .filter_map(|g| g.get("term").and_then(Value::as_i64))
        .collect();
    // (7, 1) once; (7, NULL) has a NULL key part and is skipped.
    assert_eq!(terms, vec![1, 2]);
}

#[tokio::test]
async fn test_self_join_through_alias() {
    let handle = MockHandle::default();
    let meta = Arc::new(
        QueryMeta::new(ModelMeta::new("employee", &["id"]))
            .join(
                ModelMeta::new("employee", &["id"]).with_alias("report"),
                JoinDescriptor::self_join("employee", "report", "manager_id", "reports"),
            )
            .with_columns([
                ("employee", "id"),
                ("employee", "manager_id"),
                ("report", "id"),
                ("report", "manager_id"),
            ]),
    );
    let rows = vec![
        row(&[Some(1), None, Some(2), Some(1)]),
        row(&[Some(1), None, Some(3), Some(1)]),
        row(&[Some(4), Some(1), None, None]),
    ];
    let cursor = MockCursor::over(&handle, &["a", "b", "c", "d"], rows);
    let graphs = ResultWrapper::new(cursor, RowDecoder::AggregateModel(meta))
        .into_vec()
        .await
        .unwrap();

    assert_eq!(graphs.len(), 2);
    let boss = graphs[0].as_graph().unwrap();
    assert_eq!(ids(boss.related_many(boss.root_id(), "reports")), vec![2, 3]);
    assert_eq!(boss.related_many(boss.root_id(), "reports")[0].model, "report");
    let loner = graphs[1].as_graph().unwrap();
    assert!(loner.related_many(loner.root_id(), "reports").is_empty());
}

#[tokio::test]
async fn test_stitching_is_idempotent() {
    let handle = MockHandle::default();
    let first = stitch(&handle, user_tweets_comments(), scenario_rows()).await;
    let second = stitch(&handle, user_tweets_comments(), scenario_rows()).await;

    let dump = |graphs: &[ObjectGraph]| -> Vec<serde_json::Value> {
        let options = DumpOptions {
            backrefs: true,
            ..Default::default()
        };
        graphs.iter().map(|g| g.to_json(options)).collect()
    };
    assert_eq!(dump(&first), dump(&second));
    assert_eq!(
        dump(&first)[0]["tweets"][0]["comments"][1]["id"],
        serde_json::json!(101)
    );
}

fn count_hook(instance: &mut Instance) {
    let runs = instance.get("hook_runs").and_then(Value::as_i64).unwrap_or(0);
    instance.set("hook_runs", Value::Int(runs + 1));
}

#[tokio::test]
async fn test_prepared_hook_runs_once_per_instance() {
    let handle = MockHandle::default();
    let meta = Arc::new(
        QueryMeta::new(ModelMeta::new("user", &["id"]).with_prepared_hook(count_hook))
            .join(
                ModelMeta::new("tweet", &["id"]).with_prepared_hook(count_hook),
                JoinDescriptor::backref("user", "tweet", "user_id", "tweets"),
            )
            .with_columns([("user", "id"), ("tweet", "id"), ("tweet", "user_id")]),
    );
    let rows = vec![
        row(&[Some(1), Some(10), Some(1)]),
        row(&[Some(1), Some(11), Some(1)]),
        row(&[Some(1), Some(11), Some(1)]),
    ];
    let graphs = stitch(&handle, meta, rows).await;
    let graph = &graphs[0];

    assert_eq!(graph.len(), 3);
    for id in 0..graph.len() {
        let instance = graph.instance(id).unwrap();
        assert!(instance.is_prepared());
        assert_eq!(instance.get("hook_runs"), Some(&Value::Int(1)));
    }
}

#[tokio::test]
async fn test_stitcher_buffers_first_row_of_next_group() {
    let handle = MockHandle::default();
    let cursor = MockCursor::over(&handle, &["c0", "c1", "c2", "c3", "c4"], scenario_rows());
    let mut state = CursorState::new(cursor);
    let mut stitcher = AggregateStitcher::new(user_tweets_comments());

    let first = stitcher.next_group(&mut state).await.unwrap().unwrap();
    assert_eq!(first.root().get("id"), Some(&Value::Int(1)));
    assert!(stitcher.has_buffered_row());
    assert!(!state.is_populated());

    let second = stitcher.next_group(&mut state).await.unwrap().unwrap();
    assert_eq!(second.root().get("id"), Some(&Value::Int(2)));
    assert!(!stitcher.has_buffered_row());
    assert!(state.is_populated());

    assert!(stitcher.next_group(&mut state).await.unwrap().is_none());
    assert_eq!(handle.closed_cursors(), 1);
}

#[tokio::test]
async fn test_keyless_root_still_gets_empty_backref_list() {
    let handle = MockHandle::default();
    let meta = Arc::new(
        QueryMeta::new(ModelMeta::new("user", &["id"]))
            .join(
                ModelMeta::new("tweet", &["id"]),
                JoinDescriptor::backref("user", "tweet", "user_id", "tweets"),
            )
            .with_columns([
                ("user", "id"),
                ("user", "score"),
                ("tweet", "id"),
                ("tweet", "user_id"),
            ]),
    );
    let cursor = MockCursor::over(
        &handle,
        &["c0", "c1", "c2", "c3"],
        vec![row(&[None, Some(7), None, None])],
    );

    let records = ResultWrapper::new(cursor, RowDecoder::AggregateModel(meta))
        .into_vec()
        .await
        .unwrap();
    assert_eq!(records.len(), 1);

    let graph = records[0].as_graph().unwrap();
    assert_eq!(graph.root().get("score"), Some(&Value::Int(7)));
    assert_eq!(graph.root().relation("tweets"), Some(&Relation::Many(Vec::new())));
    assert!(graph.root().is_prepared());
    assert_eq!(
        graph.to_json(DumpOptions {
            backrefs: true,
            ..Default::default()
        }),
        serde_json::json!({"id": null, "score": 7, "tweets": []})
    );
}
