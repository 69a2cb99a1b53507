//! Forward and reverse dependency maps for invalidation lookups.

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

/// Root file to dependency edges, kept with their transpose.
///
/// Both maps are mutated together through [`DependencyIndex::replace`], so the
/// reverse map is always the exact transpose of the forward map. Callers hold
/// one lock around the whole index.
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    /// Forward edges: root file -> files it was built from
    forward: HashMap<String, Vec<String>>,
    /// Reverse edges: file -> roots that were built from it
    reverse: HashMap<String, HashSet<String>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dependency list of `root`.
    ///
    /// Reverse entries left over from the previous list are dropped and empty
    /// reverse sets are pruned.
    pub fn replace(&mut self, root: &str, dependencies: &[String]) {
        if let Some(old) = self.forward.remove(root) {
            for dep in old {
                if let Some(parents) = self.reverse.get_mut(&dep) {
                    parents.remove(root);
                    if parents.is_empty() {
                        self.reverse.remove(&dep);
                    }
                }
            }
        }

        for dep in dependencies {
            self.reverse
                .entry(dep.clone())
                .or_default()
                .insert(root.to_string());
        }
        self.forward.insert(root.to_string(), dependencies.to_vec());
    }

    /// Roots whose last build read `dependency`, sorted.
    pub fn parents(&self, dependency: &str) -> Vec<String> {
        let mut parents: Vec<String> = self
            .reverse
            .get(dependency)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        parents.sort();
        parents
    }

    /// Dependencies recorded for `root`.
    pub fn dependencies(&self, root: &str) -> Option<&[String]> {
        self.forward.get(root).map(Vec::as_slice)
    }

    /// Number of roots with a recorded dependency list.
    pub fn root_count(&self) -> usize {
        self.forward.len()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// True when the reverse map is the exact transpose of the forward map.
    pub fn is_consistent(&self) -> bool {
        let mut expected: HashMap<&str, HashSet<&str>> = HashMap::default();
        for (root, deps) in &self.forward {
            for dep in deps {
                expected.entry(dep.as_str()).or_default().insert(root.as_str());
            }
        }

        expected.len() == self.reverse.len()
            && expected.iter().all(|(dep, roots)| {
                self.reverse.get(*dep).is_some_and(|actual| {
                    actual.len() == roots.len()
                        && actual.iter().all(|r| roots.contains(r.as_str()))
                })
            })
    }
}
