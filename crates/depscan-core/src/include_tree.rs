//! Include-tree records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cas_id::CasId;

/// One entered file and everything it included, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeTree {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Content id of the file's bytes.
    pub contents: CasId,
    /// Files included while this file was active.
    pub includes: Vec<IncludeTree>,
    /// Results of `__has_include` probes evaluated in this file.
    pub has_include_checks: Vec<bool>,
}

impl IncludeTree {
    /// Create a leaf node.
    pub fn new(path: impl Into<PathBuf>, contents: CasId) -> Self {
        Self {
            path: path.into(),
            contents,
            includes: Vec::new(),
            has_include_checks: Vec::new(),
        }
    }

    /// Number of files in this tree, counting repeated inclusions.
    pub fn file_count(&self) -> usize {
        1 + self.includes.iter().map(IncludeTree::file_count).sum::<usize>()
    }

    /// Visit every node depth-first, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a IncludeTree)) {
        visit(self);
        for child in &self.includes {
            child.walk(visit);
        }
    }
}

/// A committed include tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeTreeRoot {
    /// Object id under which the tree was stored.
    pub id: CasId,
    /// Prebuilt header the translation unit was compiled against, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pch: Option<PathBuf>,
    /// Tree rooted at the main file.
    pub main_file: IncludeTree,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_count_and_walk() {
        let id = CasId::new([1; 32]);
        let mut root = IncludeTree::new("/a.c", id);
        let mut b = IncludeTree::new("/b.h", id);
        b.includes.push(IncludeTree::new("/c.h", id));
        root.includes.push(b);
        root.includes.push(IncludeTree::new("/c.h", id));

        assert_eq!(root.file_count(), 4);

        let mut order = Vec::new();
        root.walk(&mut |node| order.push(node.path.clone()));
        assert_eq!(
            order,
            vec![
                PathBuf::from("/a.c"),
                PathBuf::from("/b.h"),
                PathBuf::from("/c.h"),
                PathBuf::from("/c.h")
            ]
        );
    }
}
