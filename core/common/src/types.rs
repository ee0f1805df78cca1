//! Common types used throughout skiff.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Whether a path names a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    File,
    Directory,
}

/// An absolute path on a remote backend.
///
/// Paths carry their entry type: the same components denote different
/// ciphertext locations inside a vault depending on whether they name a file
/// or a directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    components: Vec<String>,
    kind: EntryType,
}

impl RemotePath {
    /// Create the root directory path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
            kind: EntryType::Directory,
        }
    }

    /// Create a path from string components.
    ///
    /// # Preconditions
    /// - Components must not contain path separators
    /// - Components must not be empty strings
    ///
    /// # Errors
    /// - Returns error if any component is invalid
    /// - Returns error if a file path has no components
    pub fn from_components(components: Vec<String>, kind: EntryType) -> crate::Result<Self> {
        for comp in &components {
            validate_component(comp)?;
        }
        if components.is_empty() && kind == EntryType::File {
            return Err(crate::Error::InvalidInput(
                "Root cannot be a file".to_string(),
            ));
        }
        Ok(Self { components, kind })
    }

    /// Parse a path string, inferring the entry type.
    ///
    /// Uses '/' as separator. A trailing separator or the bare root denotes a
    /// directory; anything else is a file.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let kind = if path.is_empty() || path.ends_with('/') {
            EntryType::Directory
        } else {
            EntryType::File
        };
        Self::parse_as(path, kind)
    }

    /// Parse a path string naming a file.
    pub fn file(path: &str) -> crate::Result<Self> {
        Self::parse_as(path, EntryType::File)
    }

    /// Parse a path string naming a directory.
    pub fn directory(path: &str) -> crate::Result<Self> {
        Self::parse_as(path, EntryType::Directory)
    }

    fn parse_as(path: &str, kind: EntryType) -> crate::Result<Self> {
        let trimmed = path.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Self::from_components(Vec::new(), kind);
        }
        let components: Vec<String> = trimmed.split('/').map(String::from).collect();
        Self::from_components(components, kind)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Entry type of this path.
    pub fn kind(&self) -> EntryType {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryType::File
    }

    /// Same components, different entry type.
    pub fn with_kind(&self, kind: EntryType) -> crate::Result<Self> {
        Self::from_components(self.components.clone(), kind)
    }

    /// Get the parent directory, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self {
                components,
                kind: EntryType::Directory,
            })
        }
    }

    /// Get the file/directory name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component of the given type.
    pub fn join(&self, child: &str, kind: EntryType) -> crate::Result<Self> {
        validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components, kind })
    }

    pub fn join_file(&self, child: &str) -> crate::Result<Self> {
        self.join(child, EntryType::File)
    }

    pub fn join_dir(&self, child: &str) -> crate::Result<Self> {
        self.join(child, EntryType::Directory)
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Number of components below the root.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Whether `ancestor` is this path or one of its parents.
    ///
    /// Only components are compared; the entry type is ignored.
    pub fn starts_with(&self, ancestor: &RemotePath) -> bool {
        self.components.starts_with(&ancestor.components)
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

fn validate_component(component: &str) -> crate::Result<()> {
    if component.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Path component cannot be empty".to_string(),
        ));
    }
    if component.contains('/') || component.contains('\\') {
        return Err(crate::Error::InvalidInput(
            "Path component cannot contain separators".to_string(),
        ));
    }
    if component == "." || component == ".." {
        return Err(crate::Error::InvalidInput(
            "Relative path components are not allowed".to_string(),
        ));
    }
    Ok(())
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SensitiveBytes {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_remote_path_root() {
        let path = RemotePath::root();
        assert!(path.is_root());
        assert!(path.is_directory());
        assert_eq!(path.to_string_path(), "/");
    }

    #[test]
    fn test_remote_path_parse_infers_kind() {
        let file = RemotePath::parse("/foo/bar/baz").unwrap();
        assert_eq!(file.components(), &["foo", "bar", "baz"]);
        assert!(file.is_file());

        let dir = RemotePath::parse("/foo/bar/").unwrap();
        assert!(dir.is_directory());
        assert_eq!(dir.to_string_path(), "/foo/bar");
    }

    #[test]
    fn test_root_cannot_be_file() {
        assert!(RemotePath::file("/").is_err());
    }

    #[test]
    fn test_remote_path_join() {
        let path = RemotePath::root().join_dir("foo").unwrap().join_file("bar").unwrap();
        assert_eq!(path.to_string_path(), "/foo/bar");
        assert!(path.is_file());
    }

    #[test]
    fn test_remote_path_rejects_relative_components() {
        assert!(RemotePath::file("/a/../b").is_err());
        assert!(RemotePath::root().join_file(".").is_err());
    }

    #[test]
    fn test_remote_path_parent_is_directory() {
        let path = RemotePath::file("/foo/bar").unwrap();
        let parent = path.parent().unwrap();
        assert_eq!(parent.to_string_path(), "/foo");
        assert!(parent.is_directory());
    }

    #[test]
    fn test_starts_with_ignores_kind() {
        let root = RemotePath::directory("/vault").unwrap();
        let inside = RemotePath::file("/vault/a/b").unwrap();
        let sibling = RemotePath::file("/vaulted/a").unwrap();

        assert!(inside.starts_with(&root));
        assert!(root.starts_with(&root));
        assert!(!sibling.starts_with(&root));
    }

    #[test]
    fn test_sensitive_bytes_debug_is_redacted() {
        let secret = SensitiveBytes::from("hunter2");
        assert_eq!(format!("{:?}", secret), "SensitiveBytes([REDACTED; 7 bytes])");
    }

    proptest! {
        #[test]
        fn prop_parse_display_roundtrip(parts in prop::collection::vec("[a-zA-Z0-9 _-]{1,12}", 1..6)) {
            let rendered = format!("/{}", parts.join("/"));
            let path = RemotePath::file(&rendered).unwrap();
            prop_assert_eq!(path.to_string_path(), rendered);
        }
    }
}
