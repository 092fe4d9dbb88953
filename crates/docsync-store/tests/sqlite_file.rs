#![cfg(feature = "sqlite")]

use docsync::prelude::*;
use docsync_store::{DocStore, JournalMode, SqliteConfig, SqliteStore};
use serde_json::json;

#[test]
fn documents_survive_reopening_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docs.db");

    {
        let mut store = DocStore::new(SqliteStore::open(&path).unwrap());
        let mut doc = store.open_doc("todos", "t1").unwrap();
        doc.set(&Path::root(), json!({"title": "ship", "tags": []})).unwrap();
        doc.push(&Path::parse("tags"), vec![json!("release")]).unwrap();
        doc.set_text(&Path::parse("title"), "ship it").unwrap();
        assert_eq!(store.commit(&mut doc).unwrap(), 3);
        assert_eq!(store.backend().journal_mode().unwrap().to_lowercase(), "wal");
        store.close().unwrap();
    }

    let store = DocStore::new(SqliteStore::open(&path).unwrap());
    let doc = store.open_doc("todos", "t1").unwrap();
    assert_eq!(doc.version(), 3);
    assert_eq!(doc.snapshot(), &json!({"title": "ship it", "tags": ["release"]}));

    let log = store.range("todos", "t1", 0, None).unwrap();
    let replayed = Document::replay("todos", "t1", log.iter().map(|e| &e.op)).unwrap();
    assert_eq!(&replayed, doc.document());

    let found = store
        .query("todos", &json!({"tags": "release", "$orderby": {"title": 1}}))
        .unwrap();
    assert_eq!(found.results.len(), 1);
    assert!(store.backend().file_size().unwrap() > 0);
}

#[test]
fn two_writers_on_one_file_are_linearized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let config = SqliteConfig {
        journal_mode: JournalMode::Delete,
        ..SqliteConfig::default()
    };
    let mut first = DocStore::new(SqliteStore::open_with_config(&path, config.clone()).unwrap());
    let mut second = DocStore::new(SqliteStore::open_with_config(&path, config).unwrap());

    let mut a = first.open_doc("todos", "t1").unwrap();
    let mut b = second.open_doc("todos", "t1").unwrap();
    a.set(&Path::parse("winner"), json!("first")).unwrap();
    b.set(&Path::parse("winner"), json!("second")).unwrap();

    first.commit(&mut a).unwrap();
    assert!(second.commit(&mut b).is_err());
    assert!(b.has_pending());

    let b = second.open_doc("todos", "t1").unwrap();
    assert_eq!(b.snapshot(), &json!({"winner": "first"}));
}
