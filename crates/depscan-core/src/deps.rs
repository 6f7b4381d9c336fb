//! Translation-unit level dependency results.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cas_id::CasId;
use crate::module::{Command, ModuleDeps, ModuleId, PrebuiltModuleDep};

/// The full dependencies of one scanned translation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullDependencies {
    /// Identity of the module this translation unit exports.
    ///
    /// `module_name` is empty when the translation unit is not a module.
    pub id: ModuleId,

    /// Absolute paths of files the translation unit directly depends on.
    pub file_deps: Vec<PathBuf>,

    /// Prebuilt modules the translation unit directly depends on.
    pub prebuilt_module_deps: Vec<PrebuiltModuleDep>,

    /// Modules the translation unit directly imports.
    ///
    /// Modules filtered from `discovered_modules` as already seen are still
    /// listed here.
    pub clang_module_deps: Vec<ModuleId>,

    /// Root of the content-addressed tree of every file the scan touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_file_system_root_id: Option<CasId>,

    /// Commands that build the translation unit. They must run in order.
    pub commands: Vec<Command>,

    /// Driver command line with explicit module arguments; only filled by
    /// the legacy driver-command entry point.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub driver_command_line: Vec<String>,
}

/// Dependencies of a translation unit plus newly discovered modules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullDependenciesResult {
    /// The translation unit's own record.
    pub full_deps: FullDependencies,
    /// Every module reachable from the translation unit that was not in the
    /// caller's [`AlreadySeen`] set, dependencies before dependents.
    pub discovered_modules: Vec<ModuleDeps>,
}

/// Caller-owned record of modules already reported during one build.
///
/// Share one instance across every scan of a single worker and clear it
/// between builds. It is not synchronised: concurrent scans need one set
/// each, merged by the caller afterwards.
#[derive(Debug, Clone, Default)]
pub struct AlreadySeen {
    ids: HashSet<ModuleId>,
}

impl AlreadySeen {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` has already been reported.
    pub fn contains(&self, id: &ModuleId) -> bool {
        self.ids.contains(id)
    }

    /// Record `id`. Returns `true` if it was not present yet.
    pub fn insert(&mut self, id: ModuleId) -> bool {
        self.ids.insert(id)
    }

    /// Number of recorded modules.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Forget every recorded module.
    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Iterate over recorded modules in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleId> {
        self.ids.iter()
    }
}

impl Extend<ModuleId> for AlreadySeen {
    fn extend<T: IntoIterator<Item = ModuleId>>(&mut self, iter: T) {
        self.ids.extend(iter);
    }
}

impl FromIterator<ModuleId> for AlreadySeen {
    fn from_iter<T: IntoIterator<Item = ModuleId>>(iter: T) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_seen() {
        let mut seen = AlreadySeen::new();
        let id = ModuleId::new("M", "H");
        assert!(seen.insert(id.clone()));
        assert!(!seen.insert(id.clone()));
        assert!(seen.contains(&id));
        assert!(!seen.contains(&ModuleId::new("M", "other")));
        assert_eq!(seen.len(), 1);
        seen.clear();
        assert!(seen.is_empty());
    }
}
