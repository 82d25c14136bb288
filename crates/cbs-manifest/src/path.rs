//! Field paths for addressing values inside form and manifest trees
//!
//! A [`FieldPath`] is the dotted address the UI uses for path-addressed
//! setters (`streams.0.paginator.strategy.page_size`). Array elements are
//! addressed by their decimal index. Every path converts losslessly to an
//! RFC 6901 JSON pointer for use with `serde_json::Value::pointer`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Path within a form or manifest tree
///
/// # Examples
/// - `["global", "url_base"]` → `global.url_base`
/// - `["streams", "0", "incremental_sync"]` → `streams.0.incremental_sync`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Create new path from segments
    #[inline]
    #[must_use]
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Create path from a single segment
    #[inline]
    #[must_use]
    pub fn single(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    /// Empty path (root)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if path is empty (root)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parent path (if not root)
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Last segment (if not root)
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// First segment (if not root)
    #[inline]
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Segment at `position`
    #[inline]
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&str> {
        self.0.get(position).map(String::as_str)
    }

    /// Segment at `position` read as an array index
    #[inline]
    #[must_use]
    pub fn index_at(&self, position: usize) -> Option<usize> {
        self.get(position).and_then(|s| s.parse().ok())
    }

    /// Append a segment, returning new path
    #[inline]
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.0.push(segment.into());
        new
    }

    /// Append an array index, returning new path
    #[inline]
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.child(index.to_string())
    }

    /// Append every segment of `other`
    #[inline]
    #[must_use]
    pub fn join_path(&self, other: &Self) -> Self {
        let mut new = self.clone();
        new.0.extend(other.0.iter().cloned());
        new
    }

    /// Check if this path is a prefix of another (or equal to it)
    #[inline]
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        if self.0.len() > other.0.len() {
            return false;
        }
        self.0 == other.0[..self.0.len()]
    }

    /// Iterator over segments from root to leaf
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// RFC 6901 JSON pointer (`/streams/0/name`)
    #[must_use]
    pub fn to_pointer(&self) -> String {
        self.0
            .iter()
            .map(|seg| format!("/{}", seg.replace('~', "~0").replace('/', "~1")))
            .collect()
    }

    /// Parse an RFC 6901 JSON pointer
    ///
    /// # Errors
    /// Returns error if the pointer does not start with `/`
    pub fn from_pointer(pointer: &str) -> Result<Self, PathError> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            return Err(PathError::InvalidPointer(pointer.to_string()));
        };
        Ok(Self(
            rest.split('/')
                .map(|seg| seg.replace("~1", "/").replace("~0", "~"))
                .collect(),
        ))
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }

        let segments: Vec<String> = s
            .split('.')
            .map(|seg| {
                if seg.is_empty() {
                    Err(PathError::EmptySegment)
                } else if seg
                    .contains(|c: char| !c.is_alphanumeric() && !matches!(c, '_' | '-' | '$'))
                {
                    Err(PathError::InvalidSegment(seg.to_string()))
                } else {
                    Ok(seg.to_string())
                }
            })
            .collect::<Result<_, _>>()?;

        Ok(Self(segments))
    }
}

impl From<Vec<String>> for FieldPath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl From<&[&str]> for FieldPath {
    fn from(segments: &[&str]) -> Self {
        Self(segments.iter().map(|s| (*s).to_string()).collect())
    }
}

impl Default for FieldPath {
    fn default() -> Self {
        Self::root()
    }
}

impl serde::Serialize for FieldPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for FieldPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors related to field paths
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Empty segment in path
    #[error("path contains empty segment")]
    EmptySegment,

    /// Invalid segment characters
    #[error("invalid segment: {0} (must be alphanumeric, '_', '-' or '$')")]
    InvalidSegment(String),

    /// Malformed JSON pointer
    #[error("invalid JSON pointer: {0}")]
    InvalidPointer(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_parent_and_child() {
        let path: FieldPath = "streams.0.paginator".parse().unwrap();
        assert_eq!(path.parent().unwrap().to_string(), "streams.0");
        assert_eq!(path.child("strategy").to_string(), "streams.0.paginator.strategy");
        assert!(FieldPath::root().parent().is_none());
    }

    #[test]
    fn path_index_helpers() {
        let path = FieldPath::single("streams").index(3).child("name");
        assert_eq!(path.to_string(), "streams.3.name");
        assert_eq!(path.index_at(1), Some(3));
        assert_eq!(path.index_at(2), None);
    }

    #[test]
    fn path_prefix_relations() {
        let a: FieldPath = "streams.0".parse().unwrap();
        let b: FieldPath = "streams.0.incremental_sync.cursor_field".parse().unwrap();
        let c: FieldPath = "streams.1".parse().unwrap();

        assert!(a.is_prefix_of(&b));
        assert!(a.is_prefix_of(&a));
        assert!(!b.is_prefix_of(&a));
        assert!(!a.is_prefix_of(&c));
    }

    #[test]
    fn path_pointer_roundtrip() {
        let path: FieldPath = "streams.0.retriever.requester".parse().unwrap();
        assert_eq!(path.to_pointer(), "/streams/0/retriever/requester");
        assert_eq!(FieldPath::from_pointer(&path.to_pointer()).unwrap(), path);
        assert!(FieldPath::from_pointer("").unwrap().is_empty());
    }

    #[test]
    fn path_pointer_escapes() {
        let path = FieldPath::new(vec!["a/b".into(), "c~d".into()]);
        assert_eq!(path.to_pointer(), "/a~1b/c~0d");
        assert_eq!(FieldPath::from_pointer("/a~1b/c~0d").unwrap(), path);
        assert!(matches!(
            FieldPath::from_pointer("streams"),
            Err(PathError::InvalidPointer(_))
        ));
    }

    #[test]
    fn path_from_str_accepts_input_keys() {
        let path: FieldPath = "testing_values.api-key_v2".parse().unwrap();
        assert_eq!(path.last(), Some("api-key_v2"));
        let params: FieldPath = "streams.0.$parameters".parse().unwrap();
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn path_from_str_rejects_bad_segments() {
        assert!(matches!("a..b".parse::<FieldPath>(), Err(PathError::EmptySegment)));
        assert!(matches!(
            "a.b c".parse::<FieldPath>(),
            Err(PathError::InvalidSegment(_))
        ));
        assert!("".parse::<FieldPath>().unwrap().is_empty());
    }
}
