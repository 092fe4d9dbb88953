//! # docsync
//!
//! Path-addressed operations on JSON documents, for replicated, versioned
//! document sync.
//!
//! Local mutations are translated into a closed set of [`Operation`]s and
//! applied to an in-memory snapshot straight away. The operations are
//! committed to an op log by a store (see `docsync-store`); operations
//! committed elsewhere are replayed in version order and turned into
//! [`DocEvent`]s for subscribers.
//!
//! This crate does not reorder concurrent operations. Every document is
//! assumed to have a single total order of operations by the time they
//! reach it.
//!
//! ## Quick Start
//!
//! ```
//! use docsync::prelude::*;
//! use serde_json::json;
//!
//! // Local edits queue operations.
//! let mut alice = RemoteDoc::new("todos", "t1");
//! alice.insert(&Path::parse("items"), 0, vec![json!("milk")]).unwrap();
//! alice.increment(&Path::parse("count"), 1.into()).unwrap();
//!
//! // Pretend a store committed them at versions 0 and 1.
//! let mut log = Vec::new();
//! while let Some(op) = alice.next_pending().cloned() {
//!     log.push(OpLogEntry { collection: "todos".into(), id: "t1".into(), version: alice.version(), op });
//!     alice.acknowledge();
//! }
//!
//! // Another replica replays them and sees events.
//! let mut bob = RemoteDoc::new("todos", "t1");
//! for entry in &log {
//!     bob.apply_remote(entry).unwrap();
//! }
//! assert_eq!(bob.snapshot(), alice.snapshot());
//! assert_eq!(bob.version(), 2);
//! ```
//!
//! ## Operations
//!
//! | Operation | Wire fields | Effect |
//! |-----------|-------------|--------|
//! | [`Operation::ObjectInsert`] / `ObjectReplace` / `ObjectDelete` | `oi`, `od` | write or remove a mapping entry |
//! | [`Operation::ListInsert`] / `ListReplace` / `ListRemove` | `li`, `ld` | edit a sequence element |
//! | [`Operation::ListMove`] | `lm` | move one sequence element |
//! | [`Operation::StringInsert`] / `StringRemove` | `si`, `sd` | splice text |
//! | [`Operation::Increment`] | `na` | add to a number |

#![warn(missing_docs)]

mod apply;
mod document;
mod error;
mod events;
mod local;
mod op;
mod path;
mod remote;
mod translate;

pub mod prelude;
pub mod text;

pub use apply::{apply, lookup};
pub use document::{Document, JSON0};
pub use error::DocError;
pub use events::{derive_event, DocEvent, TextDelta};
pub use local::LocalDoc;
pub use op::{OpLogEntry, Operation};
pub use path::{Path, Segment};
pub use remote::RemoteDoc;
pub use translate::DocMutator;
