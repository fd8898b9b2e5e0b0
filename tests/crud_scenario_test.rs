//! CRUD round trips through the public handles, backed by the in-memory store

use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson};
use mongo_boiler::db::MemoryBackend;
use mongo_boiler::{BoilerError, Collection, Database, ExecContext, UpdateCounts};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Named {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    name: String,
}

fn named(name: &str) -> Named {
    Named {
        id: None,
        name: name.to_string(),
    }
}

fn setup(collection: &str) -> (MemoryBackend, Collection) {
    let backend = MemoryBackend::new("scenario");
    let db = Database::with_backend(Arc::new(backend.clone()), ExecContext::background());
    let coll = db.collection(collection);
    (backend, coll)
}

#[tokio::test]
async fn test_insert_delete_scenario() {
    let (backend, coll) = setup("names");

    let ids = coll
        .insert_many(&[named("a"), named("a"), named("b")])
        .await
        .unwrap();
    assert_eq!(ids.len(), 3);

    let a: Vec<Named> = coll.find_many(doc! { "name": "a" }).await.unwrap();
    assert_eq!(a.len(), 2);
    assert_eq!(a[0].id.map(Bson::ObjectId), Some(ids[0].clone()));
    assert_eq!(a[1].id.map(Bson::ObjectId), Some(ids[1].clone()));

    assert_eq!(coll.delete_many(doc! { "name": "a" }).await.unwrap(), 2);

    let a: Vec<Named> = coll.find_many(doc! { "name": "a" }).await.unwrap();
    assert!(a.is_empty());
    let b: Vec<Named> = coll.find_many(doc! { "name": "b" }).await.unwrap();
    assert_eq!(b.len(), 1);

    // Every cursor opened above was released
    assert_eq!(backend.cursor_stats().opened(), 3);
    assert_eq!(backend.cursor_stats().open(), 0);
}

#[tokio::test]
async fn test_insert_one_then_find_by_id() {
    let (_, coll) = setup("names");
    let id = coll.insert_one(&named("solo")).await.unwrap();

    let found: Named = coll.find_one(doc! { "_id": id.clone() }).await.unwrap();
    assert_eq!(found.name, "solo");
    assert_eq!(found.id.map(Bson::ObjectId), Some(id));
}

#[tokio::test]
async fn test_supplied_ids_are_returned_in_input_order() {
    let (_, coll) = setup("names");
    let batch: Vec<Named> = (0..5)
        .map(|n| Named {
            id: Some(ObjectId::new()),
            name: format!("n{}", n),
        })
        .collect();

    let ids = coll.insert_many(&batch).await.unwrap();
    let expected: Vec<Bson> = batch.iter().map(|n| Bson::ObjectId(n.id.unwrap())).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_delete_one_then_find_one_is_not_found() {
    let (_, coll) = setup("names");
    coll.insert_one(&named("gone")).await.unwrap();

    assert_eq!(coll.delete_one(doc! { "name": "gone" }).await.unwrap(), 1);
    let err = coll
        .find_one::<Named>(doc! { "name": "gone" })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_update_counts_follow_matches() {
    let (_, coll) = setup("names");
    coll.insert_many(&[named("x"), named("x"), named("x")])
        .await
        .unwrap();

    let counts = coll
        .update_many(doc! { "name": "x" }, doc! { "$set": { "seen": true } })
        .await
        .unwrap();
    assert_eq!(counts, UpdateCounts { matched: 3, modified: 3 });

    let counts = coll
        .update_one(doc! { "name": "x" }, doc! { "$set": { "seen": true } })
        .await
        .unwrap();
    assert_eq!(counts, UpdateCounts { matched: 1, modified: 0 });

    let counts = coll
        .update_many(doc! { "name": "y" }, doc! { "$set": { "seen": true } })
        .await
        .unwrap();
    assert_eq!(counts, UpdateCounts::default());
}

#[tokio::test]
async fn test_drop_then_read_is_empty() {
    let (backend, coll) = setup("names");
    coll.insert_many(&[named("a"), named("b")]).await.unwrap();

    coll.drop().await.unwrap();

    let all: Vec<Named> = coll.find_many(doc! {}).await.unwrap();
    assert!(all.is_empty());

    // A fresh handle for the same name sees the same, now empty, collection
    let again = coll.database().collection("names");
    let all: Vec<Named> = again.find_many(doc! {}).await.unwrap();
    assert!(all.is_empty());
    assert_eq!(backend.count("names"), 0);
}

#[tokio::test]
async fn test_handles_are_usable_across_tasks() {
    let (backend, coll) = setup("names");

    let mut tasks = Vec::new();
    for n in 0..8 {
        let coll = coll.clone();
        tasks.push(tokio::spawn(async move {
            coll.insert_one(&named(&format!("t{}", n))).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(backend.count("names"), 8);
}

#[tokio::test]
async fn test_expired_deadline_fails_every_operation() {
    let backend = MemoryBackend::new("scenario");
    let ctx = ExecContext::with_timeout(std::time::Duration::ZERO);
    let db = Database::with_backend(Arc::new(backend.clone()), ctx);
    let coll = db.collection("names");

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let err = coll.insert_one(&named("late")).await.unwrap_err();
    assert!(matches!(err, BoilerError::DeadlineExceeded));
    assert!(err.is_interrupted());
}
