use ahash::AHashSet as HashSet;

/// The names of all live namespaces.
#[derive(Debug, Default)]
pub struct NamespaceIndex {
    names: HashSet<String>,
}

impl NamespaceIndex {
    /// Returns true if the namespace was not already known.
    pub fn apply(&mut self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self.names.iter().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}
