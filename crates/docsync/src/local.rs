use serde_json::Value;

use crate::translate::sealed::Body;
use crate::Operation;

/// A document that lives only in memory.
///
/// Mutations follow the same rules as on a [`RemoteDoc`](crate::RemoteDoc)
/// but produce no operations and are never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDoc {
    collection: String,
    id: String,
    body: Value,
}

impl LocalDoc {
    /// An empty local document.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            body: Value::Null,
        }
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Document id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The whole body, `null` until something is set.
    pub fn snapshot(&self) -> &Value {
        &self.body
    }
}

impl Body for LocalDoc {
    fn body(&self) -> &Value {
        &self.body
    }

    fn body_mut(&mut self) -> &mut Value {
        &mut self.body
    }

    fn is_created(&self) -> bool {
        !self.body.is_null()
    }

    fn record(&mut self, _ops: Vec<Operation>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocMutator, Path};
    use serde_json::json;

    #[test]
    fn behaves_like_a_plain_tree() {
        let mut doc = LocalDoc::new("_session", "s1");
        assert_eq!(doc.get(&Path::parse("user")), None);
        doc.set(&Path::parse("user.name"), json!("ada")).unwrap();
        doc.increment(&Path::parse("user.visits"), 1.into()).unwrap();
        assert_eq!(doc.snapshot(), &json!({"user": {"name": "ada", "visits": 1}}));
        doc.del(&Path::root()).unwrap();
        assert!(doc.snapshot().is_null());
    }
}
