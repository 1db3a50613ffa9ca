use chrono::Utc;
use file_vault::state_machine::VersionStatus;
use file_vault::storage::models::{FileRecord, FileType, FileVersionRecord};
use file_vault::storage::{files, versions, Database, DatabaseError, UnitOfWork};

fn test_db() -> (tempfile::TempDir, Database, UnitOfWork) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let uow = UnitOfWork::new(db.clone());
    (dir, db, uow)
}

fn sample_file(id: &str, owner: &str) -> FileRecord {
    let now = Utc::now();
    FileRecord {
        id: id.to_string(),
        owner_id: owner.to_string(),
        uploaded_by_session_id: "s1".to_string(),
        name: "photo.png".to_string(),
        mime_type: "image/png".to_string(),
        file_type: FileType::Image,
        byte_size: 1024,
        status: VersionStatus::Processing,
        version_num: 1,
        max_version_num: 1,
        preview_key: None,
        created_at: now,
        updated_at: now,
    }
}

fn sample_version(id: &str, file_id: &str, num: u32, status: VersionStatus) -> FileVersionRecord {
    let now = Utc::now();
    FileVersionRecord {
        id: id.to_string(),
        file_id: file_id.to_string(),
        uploaded_by_session_id: "s1".to_string(),
        storage_key: format!("o/{file_id}/v{num}/photo.png"),
        mime_type: "image/png".to_string(),
        byte_size: 1024,
        version_num: num,
        preview_key: None,
        status,
        check_attempts: 0,
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn test_save_and_get_file() {
    let (_dir, db, uow) = test_db();
    let file = sample_file("file-1", "owner-1");

    uow.run(|tx| files::save(tx, &file)).unwrap();

    let retrieved = files::get(&db.read().unwrap(), "file-1")
        .unwrap()
        .expect("file should exist");
    assert_eq!(retrieved, file);
}

#[test]
fn test_list_by_owner() {
    let (_dir, db, uow) = test_db();

    uow.run(|tx| {
        files::save(tx, &sample_file("f1", "alice"))?;
        files::save(tx, &sample_file("f2", "alice"))?;
        files::save(tx, &sample_file("f3", "bob"))?;
        // Saving twice must not duplicate the index entry
        files::save(tx, &sample_file("f1", "alice"))
    })
    .unwrap();

    let snapshot = db.read().unwrap();
    let mut alice: Vec<String> = files::list_by_owner(&snapshot, "alice")
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    alice.sort();
    assert_eq!(alice, vec!["f1", "f2"]);
    assert_eq!(files::list_by_owner(&snapshot, "bob").unwrap().len(), 1);
    assert!(files::list_by_owner(&snapshot, "carol").unwrap().is_empty());
}

#[test]
fn test_delete_file_cleans_owner_index() {
    let (_dir, db, uow) = test_db();
    uow.run(|tx| {
        files::save(tx, &sample_file("f1", "alice"))?;
        files::save(tx, &sample_file("f2", "alice"))
    })
    .unwrap();

    assert!(uow.run(|tx| files::delete(tx, "f1")).unwrap());
    assert!(!uow.run(|tx| files::delete(tx, "f1")).unwrap());

    let snapshot = db.read().unwrap();
    assert!(files::get(&snapshot, "f1").unwrap().is_none());
    let remaining = files::list_by_owner(&snapshot, "alice").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "f2");
}

#[test]
fn test_versions_ordered_by_number() {
    let (_dir, db, uow) = test_db();
    uow.run(|tx| {
        versions::save(tx, &sample_version("v3", "f1", 3, VersionStatus::Processing))?;
        versions::save(tx, &sample_version("v1", "f1", 1, VersionStatus::Ready))?;
        versions::save(tx, &sample_version("v2", "f1", 2, VersionStatus::Failed))?;
        versions::save(tx, &sample_version("other", "f2", 7, VersionStatus::Ready))
    })
    .unwrap();

    let snapshot = db.read().unwrap();
    let nums: Vec<u32> = versions::list_by_file(&snapshot, "f1")
        .unwrap()
        .iter()
        .map(|v| v.version_num)
        .collect();
    assert_eq!(nums, vec![1, 2, 3]);
    assert_eq!(versions::latest_number(&snapshot, "f1").unwrap(), 3);
    assert_eq!(versions::latest_number(&snapshot, "f2").unwrap(), 7);
    assert_eq!(versions::latest_number(&snapshot, "none").unwrap(), 0);
    assert!(versions::number_taken(&snapshot, "f1", 2).unwrap());
    assert!(!versions::number_taken(&snapshot, "f1", 4).unwrap());
    assert_eq!(
        versions::get_by_number(&snapshot, "f1", 2).unwrap().unwrap().id,
        "v2"
    );
}

#[test]
fn test_status_index_follows_updates() {
    let (_dir, db, uow) = test_db();
    let mut version = sample_version("v1", "f1", 1, VersionStatus::Processing);
    uow.run(|tx| versions::save(tx, &version)).unwrap();

    let processing = versions::list_by_status(&db.read().unwrap(), VersionStatus::Processing).unwrap();
    assert_eq!(processing.len(), 1);

    version.status = VersionStatus::Uploaded;
    uow.run(|tx| versions::save(tx, &version)).unwrap();

    let snapshot = db.read().unwrap();
    assert!(versions::list_by_status(&snapshot, VersionStatus::Processing)
        .unwrap()
        .is_empty());
    assert_eq!(
        versions::list_by_status(&snapshot, VersionStatus::Uploaded)
            .unwrap()
            .len(),
        1
    );

    uow.run(|tx| versions::delete(tx, "v1")).unwrap();
    let snapshot = db.read().unwrap();
    assert!(versions::list_by_status(&snapshot, VersionStatus::Uploaded)
        .unwrap()
        .is_empty());
    assert!(!versions::number_taken(&snapshot, "f1", 1).unwrap());
}

#[derive(Debug)]
enum TestError {
    Db,
    Business,
}

impl From<DatabaseError> for TestError {
    fn from(_: DatabaseError) -> Self {
        TestError::Db
    }
}

#[test]
fn test_unit_of_work_rolls_back_on_error() {
    let (_dir, db, uow) = test_db();

    let result: Result<(), TestError> = uow.run(|tx| {
        files::save(tx, &sample_file("f1", "alice"))?;
        versions::save(tx, &sample_version("v1", "f1", 1, VersionStatus::Processing))?;
        Err(TestError::Business)
    });
    assert!(matches!(result, Err(TestError::Business)));

    let snapshot = db.read().unwrap();
    assert!(files::get(&snapshot, "f1").unwrap().is_none());
    assert!(versions::get(&snapshot, "v1").unwrap().is_none());
    assert!(files::list_by_owner(&snapshot, "alice").unwrap().is_empty());
}

#[test]
fn test_writes_are_invisible_until_commit() {
    let (_dir, db, uow) = test_db();

    uow.run(|tx| {
        files::save(tx, &sample_file("f1", "alice"))?;
        // The transaction reads its own write; a snapshot does not
        assert!(files::get(tx, "f1")?.is_some());
        assert!(files::get(&db.read()?, "f1")?.is_none());
        Ok::<_, DatabaseError>(())
    })
    .unwrap();

    assert!(files::get(&db.read().unwrap(), "f1").unwrap().is_some());
}

#[test]
fn test_purge_all() {
    let (_dir, db, uow) = test_db();
    uow.run(|tx| {
        files::save(tx, &sample_file("f1", "alice"))?;
        versions::save(tx, &sample_version("v1", "f1", 1, VersionStatus::Ready))
    })
    .unwrap();

    let stats = db.purge_all().unwrap();
    assert_eq!(stats.files, 1);
    assert_eq!(stats.versions, 1);

    let snapshot = db.read().unwrap();
    assert!(files::get(&snapshot, "f1").unwrap().is_none());
    assert!(versions::list_by_file(&snapshot, "f1").unwrap().is_empty());
}

#[test]
fn test_reopen_persists_data() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        UnitOfWork::new(db)
            .run(|tx| files::save(tx, &sample_file("f1", "alice")))
            .unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    assert!(files::get(&db.read().unwrap(), "f1").unwrap().is_some());
}
