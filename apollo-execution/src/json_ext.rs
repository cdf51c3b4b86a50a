//! Performance-oriented JSON aliases and response paths.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

pub(crate) trait ValueExt {
    /// Compact JSON text of the value, used in error messages.
    fn inspect(&self) -> String;
}

impl ValueExt for Value {
    fn inspect(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "<unserializable>".to_string())
    }
}

/// One step of a [`Path`] into the response data.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index within an array.
    Index(usize),

    /// A key within an object.
    Key(String),
}

/// A path into the result document.
///
/// Serialized as a JSON array of keys and indexes, as used in the `path` of
/// GraphQL errors.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Default::default())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    /// Parses a `/` separated path, numeric segments being indexes.
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| match segment.parse::<usize>() {
                    Ok(index) => PathElement::Index(index),
                    Err(_) => PathElement::Key(segment.to_string()),
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum Segment {
    Key(Name),
    Index(usize),
}

#[derive(Debug)]
struct PathNode {
    segment: Segment,
    parent: ResponsePath,
    depth: usize,
    field_depth: usize,
}

/// The position of a value under construction.
///
/// Each node points at its parent, so extending a path is constant time and
/// siblings share their common prefix. A [`Path`] is only materialized when
/// an error needs to report it.
#[derive(Clone, Debug, Default)]
pub(crate) struct ResponsePath(Option<Arc<PathNode>>);

impl ResponsePath {
    pub(crate) fn root() -> Self {
        Self(None)
    }

    pub(crate) fn key(&self, key: &Name) -> Self {
        self.push(Segment::Key(key.clone()))
    }

    pub(crate) fn index(&self, index: usize) -> Self {
        self.push(Segment::Index(index))
    }

    fn push(&self, segment: Segment) -> Self {
        let field_depth = self.field_depth() + usize::from(matches!(segment, Segment::Key(_)));
        Self(Some(Arc::new(PathNode {
            segment,
            parent: self.clone(),
            depth: self.depth() + 1,
            field_depth,
        })))
    }

    pub(crate) fn depth(&self) -> usize {
        self.0.as_ref().map_or(0, |node| node.depth)
    }

    /// Number of keys in the path, ignoring list indexes.
    pub(crate) fn field_depth(&self) -> usize {
        self.0.as_ref().map_or(0, |node| node.field_depth)
    }

    pub(crate) fn to_path(&self) -> Path {
        let mut elements = Vec::with_capacity(self.depth());
        let mut current = self.0.as_deref();
        while let Some(node) = current {
            elements.push(match &node.segment {
                Segment::Key(key) => PathElement::Key(key.as_str().to_owned()),
                Segment::Index(index) => PathElement::Index(*index),
            });
            current = node.parent.0.as_deref();
        }
        elements.reverse();
        Path(elements)
    }
}
