use chrono::{TimeZone, Utc};
use gscholar_core::{Contact, ContactStatus, Opportunity, Task};
use gscholar_storage::{Query, RecordKind, RecordStore, StoreError, UpsertOutcome};
use tempfile::tempdir;
use uuid::Uuid;

fn opportunity() -> Opportunity {
    Opportunity {
        id: Uuid::new_v4(),
        school_name: "The University of Tokyo".into(),
        school_abbr: "UTokyo".into(),
        is_official: true,
        program_name: "Amgen Scholars Program".into(),
        description: "An undergraduate summer research program.".into(),
        tags: vec!["Summer Research".into(), "BioTech".into()],
        deadline: Utc.with_ymd_and_hms(2027, 4, 1, 0, 0, 0).single().unwrap(),
        status: "Fully Funded".into(),
        location: "Tokyo, Japan".into(),
        website_url: "https://www.u-tokyo.ac.jp/".into(),
        image_url: None,
        is_saved: false,
        saved_at: None,
    }
}

fn task(title: &str) -> Task {
    Task {
        id: Uuid::new_v4(),
        school_abbr: "MIT".into(),
        school_name: "MIT".into(),
        program_name: "2027 CS Summer Research".into(),
        title: title.into(),
        deadline: Utc.with_ymd_and_hms(2027, 1, 4, 0, 0, 0).single().unwrap(),
        is_completed: false,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn collections_survive_reopen() {
    let dir = tempdir().expect("tempdir");
    let saved_at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).single().unwrap();
    let opp = opportunity();
    let first = task("Submit Online Application Form");
    let second = task("Contact Prof. Smith via cold email");
    let contact = Contact::new("Dr. Grace Hopper", "Systems Lab, Stanford", ContactStatus::FollowingUp);

    {
        let store = RecordStore::open(dir.path()).await.expect("open");
        store.insert(opp.clone()).await.expect("insert opp");
        store.insert(first.clone()).await.expect("insert task");
        store.insert(second.clone()).await.expect("insert task");
        store.insert(contact.clone()).await.expect("insert contact");
        store
            .update::<Opportunity, _>(opp.id, |o| o.mark_saved(saved_at))
            .await
            .expect("save");
        store
            .update::<Task, _>(first.id, |t| {
                t.toggle_completed();
            })
            .await
            .expect("complete");
        store.delete::<Task>(second.id).await.expect("delete");
    }

    let reopened = RecordStore::open(dir.path()).await.expect("reopen");
    let stored = reopened.get::<Opportunity>(opp.id).await.expect("opp persisted");
    assert!(stored.is_saved);
    assert_eq!(stored.saved_at, Some(saved_at));

    let tasks = reopened.all::<Task>().await;
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].is_completed);
    assert!(!reopened.contains::<Task>(second.id).await);

    let contacts = reopened.all::<Contact>().await;
    assert_eq!(contacts, vec![contact]);
}

#[tokio::test]
async fn task_upsert_keeps_completion() {
    let dir = tempdir().expect("tempdir");
    let store = RecordStore::open(dir.path()).await.expect("open");
    let mut original = task("Draft Personal Statement");
    original.is_completed = true;
    store.insert(original.clone()).await.expect("insert");

    let mut incoming = original.clone();
    incoming.is_completed = false;
    incoming.title = "Draft Personal Statement v2".into();
    assert_eq!(store.upsert(incoming).await.expect("upsert"), UpsertOutcome::Updated);

    let stored = store.get::<Task>(original.id).await.expect("present");
    assert!(stored.is_completed);
    assert_eq!(stored.title, "Draft Personal Statement v2");
}

#[tokio::test]
async fn batch_upsert_is_idempotent_on_disk() {
    let dir = tempdir().expect("tempdir");
    let store = RecordStore::open(dir.path()).await.expect("open");
    let batch = vec![opportunity(), opportunity(), opportunity()];

    let report = store.upsert_batch(batch.clone()).await.expect("first batch");
    assert_eq!(report.inserted, 3);
    let path = store.collection_path(RecordKind::Opportunity);
    let bytes = std::fs::read(&path).expect("read");

    for _ in 0..3 {
        let report = store.upsert_batch(batch.clone()).await.expect("repeat batch");
        assert_eq!(report.unchanged, 3);
        assert!(!report.changed());
    }
    assert_eq!(std::fs::read(&path).expect("read"), bytes);
    assert_eq!(store.count::<Opportunity>().await, 3);
}

#[tokio::test]
async fn invalid_record_rolls_back_the_whole_batch() {
    let dir = tempdir().expect("tempdir");
    let store = RecordStore::open(dir.path()).await.expect("open");
    let mut broken = opportunity();
    broken.saved_at = Some(Utc::now());

    let err = store
        .upsert_batch(vec![opportunity(), broken])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid { kind: RecordKind::Opportunity, .. }));
    assert_eq!(store.count::<Opportunity>().await, 0);
    assert!(!store.collection_path(RecordKind::Opportunity).exists());
}

#[tokio::test]
async fn corrupt_collection_file_fails_open() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("contacts.json"), b"{ not json").expect("write");

    let err = RecordStore::open(dir.path()).await.unwrap_err();
    assert!(matches!(err, StoreError::Decode { .. }));
}

#[tokio::test]
async fn concurrent_updates_to_one_record_serialize() {
    let dir = tempdir().expect("tempdir");
    let store = std::sync::Arc::new(RecordStore::open(dir.path()).await.expect("open"));
    let opp = opportunity();
    store.insert(opp.clone()).await.expect("insert");

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let id = opp.id;
        handles.push(tokio::spawn(async move {
            store
                .update::<Opportunity, _>(id, move |o| o.tags.push(format!("tag-{i}")))
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("update");
    }

    let stored = store.get::<Opportunity>(opp.id).await.expect("present");
    assert_eq!(stored.tags.len(), 10);
    let tagged = store
        .query(Query::<Opportunity>::all().filter(|o| o.has_tag("tag-7")))
        .await;
    assert_eq!(tagged.len(), 1);
}
