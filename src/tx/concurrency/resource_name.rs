/// Hierarchical name of a lockable resource: an ordered sequence of segments
/// from the root of the hierarchy down, e.g. `database/students/3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName {
    names: Vec<String>,
}

impl ResourceName {
    pub fn new(root: &str) -> ResourceName {
        ResourceName {
            names: vec![root.to_string()],
        }
    }

    pub fn child(&self, name: &str) -> ResourceName {
        let mut names = self.names.clone();
        names.push(name.to_string());
        ResourceName { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// True iff `other` is a strict prefix of this name.
    pub fn is_descendant_of(&self, other: &ResourceName) -> bool {
        self.names.len() > other.names.len() && self.names[..other.names.len()] == other.names[..]
    }
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.names.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descendant_is_strict_prefix() {
        let db = ResourceName::new("database");
        let table = db.child("students");
        let page = table.child("3");

        assert!(table.is_descendant_of(&db));
        assert!(page.is_descendant_of(&db));
        assert!(page.is_descendant_of(&table));

        assert!(!db.is_descendant_of(&db));
        assert!(!db.is_descendant_of(&table));
        assert!(!table.is_descendant_of(&page));
    }

    #[test]
    fn sibling_is_not_descendant() {
        let db = ResourceName::new("database");
        let a = db.child("a");
        let b = db.child("b");
        assert!(!a.is_descendant_of(&b));
        assert!(!b.is_descendant_of(&a));
    }

    #[test]
    fn to_string() {
        let name = ResourceName::new("database").child("students").child("3");
        assert_eq!(name.to_string(), "database/students/3");
    }
}
