//! # docsync-store
//!
//! Persistence for [`docsync`] documents.
//!
//! Stores each document twice: its current snapshot, as a row of its
//! collection, and the operations that produced it, in a per-document op
//! log keyed uniquely by version. The log is what linearizes concurrent
//! writers; the snapshot is what queries read.
//!
//! ## Quick Start
//!
//! ```
//! use docsync::{DocMutator, Path, RemoteDoc};
//! use docsync_store::{DocStore, MemoryStore};
//! use serde_json::json;
//!
//! let mut store = DocStore::new(MemoryStore::new());
//!
//! let mut doc = store.open_doc("todos", "t1").unwrap();
//! doc.insert(&Path::parse("items"), 0, vec![json!("a")]).unwrap();
//! assert_eq!(store.commit(&mut doc).unwrap(), 1);
//!
//! let log = store.range("todos", "t1", 0, Some(1)).unwrap();
//! assert_eq!(serde_json::to_value(&log[0].op).unwrap(), json!({"p": ["items", 0], "li": "a"}));
//!
//! let open = store.query("todos", &json!({"items": "a"})).unwrap();
//! assert_eq!(open.results.len(), 1);
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryStore`] | *(always available)* | Testing, prototyping, poll replicas in tests |
//! | `SqliteStore` | `sqlite` | Single-file persistence for servers and desktop apps |

#![warn(missing_docs)]

pub mod codec;
mod db;
mod filter;
mod memory;
mod query;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use codec::CodecError;
pub use db::{
    DocStore, DocStoreBuilder, DocStoreConfig, QueryResult, StoreError, StoreResult,
};
pub use filter::{compare_values, matches};
pub use memory::{MemoryError, MemoryStore};
pub use query::{
    CanonicalQuery, CursorOps, QueryError, QueryOutcome, WhereEvaluator, CURSOR_OPERATORS,
    META_OPERATORS,
};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteConfig, SqliteError, SqliteStore};
pub use traits::*;
