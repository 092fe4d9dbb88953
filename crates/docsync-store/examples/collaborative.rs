//! # Collaborative Editing: two clients, one op log
//!
//! Two clients edit the same document through one store. The store's
//! `(id, version)` uniqueness decides who wins a race; the loser catches up
//! and retries. A third client follows along by replaying the log and
//! printing the change events it sees.
//!
//! Run: `cargo run -p docsync-store --example collaborative`

use docsync::prelude::*;
use docsync_store::{DocStore, MemoryStore, StoreError};
use serde_json::json;

fn main() {
    println!("=== Collaborative Editing Example ===\n");

    let mut store = DocStore::new(MemoryStore::new());

    // ── Step 1: Alice creates the document ──────────────────────────
    println!("1. Alice creates a shopping list...");
    let mut alice = store.open_doc("lists", "groceries").unwrap();
    alice
        .set(&Path::root(), json!({"title": "Groceries", "items": []}))
        .unwrap();
    alice
        .push(&Path::parse("items"), vec![json!("milk"), json!("eggs")])
        .unwrap();
    let v = store.commit(&mut alice).unwrap();
    println!("   committed at v{v}: {}", alice.snapshot());

    // A follower that only reads.
    let mut follower = store.open_doc("lists", "groceries").unwrap();

    // ── Step 2: Bob and Alice race ──────────────────────────────────
    println!("\n2. Bob and Alice edit concurrently...");
    let mut bob = store.open_doc("lists", "groceries").unwrap();
    alice.set_text(&Path::parse("title"), "Weekend groceries").unwrap();
    bob.insert(&Path::parse("items"), 0, vec![json!("bread")]).unwrap();

    store.commit(&mut alice).unwrap();
    match store.commit(&mut bob) {
        Err(StoreError::VersionConflict { version, latest, .. }) => {
            println!("   Bob lost the race at v{version} (store is at v{latest}), retrying");
        }
        other => println!("   unexpected: {other:?}"),
    }

    // ── Step 3: Bob rebases and retries ─────────────────────────────
    let mut bob = store.open_doc("lists", "groceries").unwrap();
    bob.insert(&Path::parse("items"), 0, vec![json!("bread")]).unwrap();
    let v = store.commit(&mut bob).unwrap();
    println!("   Bob committed at v{v}: {}", bob.snapshot());

    // ── Step 4: The follower catches up ─────────────────────────────
    println!("\n3. Follower catches up...");
    for event in store.catch_up(&mut follower).unwrap() {
        println!("   {}", serde_json::to_string(&event).unwrap());
    }
    assert_eq!(follower.snapshot(), bob.snapshot());

    // ── Step 5: Queries ─────────────────────────────────────────────
    println!("\n4. Querying...");
    let with_bread = store.query("lists", &json!({"items": "bread"})).unwrap();
    println!("   lists containing bread: {}", with_bread.results.len());
    let count = store
        .query("lists", &json!({"$count": true}))
        .unwrap()
        .extra
        .unwrap_or_default();
    println!("   total lists: {count}");

    println!("\n=== Done! ===");
}
