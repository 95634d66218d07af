//! Classifying catalog objects.
//!
//! Objects are matched by `(kind, name)`, ignoring ASCII case in names, and
//! compared by definition text.
//! This is only sound because definitions are produced deterministically:
//! the target and live catalogs both come out of `sqlite_master` through the
//! same canonicalizing reader.

use serde::Serialize;

use crate::catalog::{Catalog, CatalogObject, ObjectKind};

/// Classification of one object kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindDiff {
    /// The kind compared.
    pub kind: ObjectKind,
    /// Target objects with no live counterpart.
    pub create: Vec<CatalogObject>,
    /// Target objects whose live definition differs.
    pub update: Vec<CatalogObject>,
    /// Target objects whose live definition is identical.
    pub unchanged: Vec<CatalogObject>,
    /// Live objects with no target counterpart.
    pub extraneous: Vec<CatalogObject>,
}

impl KindDiff {
    /// Returns true if nothing needs to change for this kind.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.extraneous.is_empty()
    }
}

/// Compares `target` against `live` for one kind.
///
/// Every list comes out in ascending name order. `update` and `unchanged`
/// carry the target object.
#[must_use]
pub fn diff(target: &Catalog, live: &Catalog, kind: ObjectKind) -> KindDiff {
    let mut result = KindDiff {
        kind,
        create: Vec::new(),
        update: Vec::new(),
        unchanged: Vec::new(),
        extraneous: Vec::new(),
    };

    for wanted in target.of_kind(kind) {
        match live.get(kind, &wanted.name) {
            None => result.create.push(wanted.clone()),
            Some(existing) if existing.definition == wanted.definition => {
                result.unchanged.push(wanted.clone());
            }
            Some(_) => result.update.push(wanted.clone()),
        }
    }

    result.extraneous = live
        .of_kind(kind)
        .filter(|existing| target.get(kind, &existing.name).is_none())
        .cloned()
        .collect();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, body: &str) -> CatalogObject {
        CatalogObject::new(
            ObjectKind::Table,
            name,
            name,
            format!("CREATE TABLE \"{name}\" ({body})"),
        )
    }

    fn index(name: &str, on: &str) -> CatalogObject {
        CatalogObject::new(
            ObjectKind::Index,
            name,
            on,
            format!("CREATE INDEX {name} ON {on} (id)"),
        )
    }

    #[test]
    fn test_classification() {
        let target = Catalog::new(vec![
            table("c_new", "id"),
            table("a_same", "id"),
            table("b_changed", "id, name"),
        ]);
        let live = Catalog::new(vec![
            table("b_changed", "id"),
            table("a_same", "id"),
            table("z_old", "id"),
        ]);

        let d = diff(&target, &live, ObjectKind::Table);
        let names = |v: &[CatalogObject]| v.iter().map(|o| o.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&d.create), vec!["c_new"]);
        assert_eq!(names(&d.update), vec!["b_changed"]);
        assert_eq!(names(&d.unchanged), vec!["a_same"]);
        assert_eq!(names(&d.extraneous), vec!["z_old"]);
        assert!(!d.is_empty());

        // update carries the target definition
        assert!(d.update[0].definition.contains("id, name"));
    }

    #[test]
    fn test_kinds_are_compared_separately() {
        let target = Catalog::new(vec![table("t", "id"), index("idx_t", "t")]);
        let live = Catalog::new(vec![table("t", "id")]);

        assert!(diff(&target, &live, ObjectKind::Table).is_empty());
        let indexes = diff(&target, &live, ObjectKind::Index);
        assert_eq!(indexes.create.len(), 1);
        assert!(indexes.extraneous.is_empty());
    }

    #[test]
    fn test_names_match_case_insensitively() {
        let target = Catalog::new(vec![table("Users", "id, x")]);
        let live = Catalog::new(vec![table("users", "id")]);

        let d = diff(&target, &live, ObjectKind::Table);
        assert!(d.create.is_empty());
        assert!(d.extraneous.is_empty());
        assert_eq!(d.update.len(), 1);
        assert_eq!(d.update[0].name, "Users");
    }

    #[test]
    fn test_ordering_is_stable() {
        let target = Catalog::new(vec![table("b", "id"), table("a", "id"), table("c", "id")]);
        let live = Catalog::default();

        let first = diff(&target, &live, ObjectKind::Table);
        let second = diff(&target, &live, ObjectKind::Table);
        assert_eq!(first, second);
        let names: Vec<&str> = first.create.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
