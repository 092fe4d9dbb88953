//! Convenient re-exports for common usage.
//!
//! ```
//! use docsync::prelude::*;
//! ```

pub use crate::DocError;
pub use crate::DocEvent;
pub use crate::DocMutator;
pub use crate::Document;
pub use crate::LocalDoc;
pub use crate::OpLogEntry;
pub use crate::Operation;
pub use crate::Path;
pub use crate::RemoteDoc;
