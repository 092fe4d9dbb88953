//! Addressing inside a document body.
//!
//! A [`Path`] is an ordered list of [`Segment`]s. Keys address fields of a
//! mapping, indices address elements of a sequence (or, for string
//! operations, a character offset). The empty path is the whole document.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DocError;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// A mapping key.
    Key(String),
    /// A sequence index or string offset.
    Index(usize),
}

impl Segment {
    /// Parse a textual segment, casting canonical non-negative integers
    /// (`"0"`, `"12"`, but not `"01"` or `"-1"`) to [`Segment::Index`].
    pub fn parse(raw: &str) -> Self {
        let canonical = !raw.is_empty()
            && raw.bytes().all(|b| b.is_ascii_digit())
            && (raw == "0" || !raw.starts_with('0'));
        if canonical {
            if let Ok(index) = raw.parse::<usize>() {
                return Self::Index(index);
            }
        }
        Self::Key(raw.to_string())
    }

    /// The index, if this is an index segment.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Key(_) => None,
        }
    }

    /// Returns `true` for [`Segment::Index`].
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }

    /// The segment as a mapping key. Indices are rendered in decimal.
    pub fn to_key(&self) -> String {
        match self {
            Self::Key(key) => key.clone(),
            Self::Index(index) => index.to_string(),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Key(key) => Value::String(key.clone()),
            Self::Index(index) => Value::from(*index as u64),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl Serialize for Segment {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Key(key) => serializer.serialize_str(key),
            Self::Index(index) => serializer.serialize_u64(*index as u64),
        }
    }
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(u64),
            Key(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Index(index) => usize::try_from(index)
                .map(Segment::Index)
                .map_err(serde::de::Error::custom),
            Raw::Key(key) => Ok(Segment::Key(key)),
        }
    }
}

/// An ordered sequence of segments addressing a value inside a document.
///
/// # Example
///
/// ```
/// use docsync::{Path, Segment};
///
/// let path = Path::parse("items.0.title");
/// assert_eq!(path.len(), 3);
/// assert_eq!(path.segments()[1], Segment::Index(0));
/// assert_eq!(path.to_string(), "items.0.title");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<Segment>);

impl Path {
    /// The empty path, addressing the whole document.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from segments.
    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// Parse a dotted path such as `"items.0.title"`. The empty string is the
    /// root path.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        Self(dotted.split('.').map(Segment::parse).collect())
    }

    /// Decode the wire form: an array of strings and non-negative integers.
    pub fn from_value(value: &Value) -> Result<Self, DocError> {
        let items = value
            .as_array()
            .ok_or_else(|| DocError::Decode(format!("path must be an array, got {value}")))?;
        items
            .iter()
            .map(|item| match item {
                Value::String(key) => Ok(Segment::Key(key.clone())),
                Value::Number(n) => n
                    .as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .map(Segment::Index)
                    .ok_or_else(|| DocError::Decode(format!("invalid path index {n}"))),
                other => Err(DocError::Decode(format!("invalid path segment {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Encode as the wire form.
    pub fn to_value(&self) -> Value {
        Value::Array(self.0.iter().map(Segment::to_value).collect())
    }

    /// The segments of this path.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The final segment, if any.
    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// The path without its final segment. `None` for the root path.
    pub fn parent(&self) -> Option<Path> {
        self.0
            .split_last()
            .map(|(_, parent)| Self(parent.to_vec()))
    }

    /// A new path with `segment` appended.
    pub fn child(&self, segment: impl Into<Segment>) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
