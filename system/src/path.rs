use crate::types::{BufferKey, WorkspaceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid path segment {0:?}")]
    InvalidSegment(String),
}

/// A slash separated location in the store tree. The empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, PathError> {
        let mut segments = Vec::new();
        for segment in s.split('/').filter(|s| !s.is_empty()) {
            Self::validate_segment(segment)?;
            segments.push(segment.to_owned());
        }
        Ok(Self { segments })
    }

    pub fn validate_segment(segment: &str) -> Result<(), PathError> {
        let forbidden = |c: char| matches!(c, '/' | '.' | '#' | '$' | '[' | ']') || c.is_control();
        if segment.is_empty() || segment.chars().any(forbidden) {
            Err(PathError::InvalidSegment(segment.to_owned()))
        } else {
            Ok(())
        }
    }

    pub fn try_child(&self, segment: &str) -> Result<Self, PathError> {
        Self::validate_segment(segment)?;
        Ok(self.child(segment))
    }

    /// Callers pass segments that are already known to be valid (ids, constants).
    pub fn child(&self, segment: impl fmt::Display) -> Self {
        let mut segments = self.segments.clone();
        let segment = segment.to_string();
        debug_assert!(Self::validate_segment(&segment).is_ok(), "{:?}", segment);
        segments.push(segment);
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    pub fn is_ancestor_of(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// A write at one path is visible to a subscriber of the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Segments of `self` below `ancestor`, if it is one.
    pub fn strip_prefix(&self, ancestor: &StorePath) -> Option<&[String]> {
        if ancestor.is_ancestor_of(self) {
            Some(&self.segments[ancestor.segments.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for StorePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StorePath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StorePath> for String {
    fn from(path: StorePath) -> Self {
        path.to_string()
    }
}

/// An atomic multi-path update. Each entry replaces the subtree at its path; `None` deletes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    entries: BTreeMap<StorePath, Option<Value>>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: StorePath, value: impl Into<Value>) -> &mut Self {
        self.entries.insert(path, Some(value.into()));
        self
    }

    pub fn delete(&mut self, path: StorePath) -> &mut Self {
        self.entries.insert(path, None);
        self
    }

    pub fn put(&mut self, path: StorePath, value: Option<Value>) -> &mut Self {
        self.entries.insert(path, value);
        self
    }

    pub fn merge(&mut self, other: Patch) -> &mut Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn retain(&mut self, mut f: impl FnMut(&StorePath, &Option<Value>) -> bool) {
        self.entries.retain(|path, value| f(path, value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, path: &StorePath) -> Option<&Option<Value>> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StorePath, &Option<Value>)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &StorePath> {
        self.entries.keys()
    }
}

/// Where a workspace keeps its things.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    root: StorePath,
}

impl WorkspacePaths {
    pub fn new(workspace_id: &WorkspaceId) -> Self {
        Self {
            root: StorePath::root().child("workspace").child(workspace_id),
        }
    }

    pub fn root(&self) -> &StorePath {
        &self.root
    }

    pub fn settings(&self) -> StorePath {
        self.root.child("settings")
    }

    pub fn setting(&self, field: &str) -> StorePath {
        self.settings().child(field)
    }

    pub fn users(&self) -> StorePath {
        self.root.child("users")
    }

    pub fn user(&self, identity_id: &str) -> StorePath {
        self.users().child(identity_id)
    }

    pub fn connections(&self, identity_id: &str) -> StorePath {
        self.user(identity_id).child("connections")
    }

    pub fn results(&self) -> StorePath {
        self.root.child("state").child("results")
    }

    pub fn chat(&self) -> StorePath {
        self.root.child("chat")
    }

    pub fn buffer(&self, key: &BufferKey) -> StorePath {
        self.root.child("buffers").child(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_and_prints_paths() {
        let path = StorePath::parse("/workspace/abc/users/").expect("");
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.to_string(), "workspace/abc/users");
        assert!(StorePath::parse("").expect("").is_root());
        assert!(StorePath::parse("a/b.c").is_err());
        assert!(StorePath::root().try_child("x$y").is_err());
    }

    #[test]
    fn it_detects_overlapping_paths() {
        let users = StorePath::parse("workspace/abc/users").expect("");
        let name = StorePath::parse("workspace/abc/users/u1/name").expect("");
        let settings = StorePath::parse("workspace/abc/settings").expect("");
        assert!(users.overlaps(&name));
        assert!(name.overlaps(&users));
        assert!(!users.overlaps(&settings));
        assert!(StorePath::root().overlaps(&settings));
        assert_eq!(
            name.strip_prefix(&users).map(|s| s.to_vec()),
            Some(vec!["u1".to_owned(), "name".to_owned()])
        );
        assert_eq!(settings.strip_prefix(&users), None);
    }

    #[test]
    fn patches_serialize_with_string_keys() {
        let mut patch = Patch::new();
        patch
            .set(StorePath::parse("a/b").expect(""), 1)
            .delete(StorePath::parse("a/c").expect(""));
        let json = serde_json::to_string(&patch).expect("");
        let back: Patch = serde_json::from_str(&json).expect("");
        assert_eq!(back, patch);
    }
}
