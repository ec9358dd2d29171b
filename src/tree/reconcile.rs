//! Keyed reconciliation of an in-memory child list against a fresh listing.

use std::collections::HashMap;
use std::ffi::OsStr;

/// Anything with a file name that is unique among its siblings.
pub trait Keyed {
    fn key(&self) -> &OsStr;
}

impl Keyed for String {
    fn key(&self) -> &OsStr {
        OsStr::new(self)
    }
}

/// Result of [`reconcile`].
#[derive(Debug)]
pub struct Reconciled<T> {
    /// The new child list, in listing order.
    pub children: Vec<T>,
    /// Entries created for names that had no reusable child.
    pub added: Vec<T>,
    /// Old children that are not part of `children`.
    pub removed: Vec<T>,
}

/// Diff `old` against `listing` by key.
///
/// An old child whose key is still listed and for which `reusable` holds is
/// carried over as-is; every other listed entry is built with `create`. Old
/// children not carried over end up in `removed`. Keys in `listing` must be
/// unique.
pub fn reconcile<T, L, E>(
    old: &[T],
    listing: Vec<L>,
    mut reusable: impl FnMut(&T, &L) -> bool,
    mut create: impl FnMut(L) -> Result<T, E>,
) -> Result<Reconciled<T>, E>
where
    T: Keyed + Clone,
    L: Keyed,
{
    let mut by_key: HashMap<&OsStr, &T> = old.iter().map(|c| (c.key(), c)).collect();
    let mut children = Vec::with_capacity(listing.len());
    let mut added = Vec::new();
    let mut removed = Vec::new();

    for entry in listing {
        match by_key.remove(entry.key()) {
            Some(existing) if reusable(existing, &entry) => children.push(existing.clone()),
            stale => {
                if let Some(stale) = stale {
                    removed.push(stale.clone());
                }
                let child = create(entry)?;
                added.push(child.clone());
                children.push(child);
            }
        }
    }

    // Whatever is left was not listed at all. Walk `old` to keep its order.
    removed.extend(
        old.iter()
            .filter(|c| by_key.contains_key(c.key()))
            .cloned(),
    );

    Ok(Reconciled {
        children,
        added,
        removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[derive(Debug, Clone, PartialEq)]
    struct Node {
        name: String,
        serial: u32,
    }

    impl Keyed for Node {
        fn key(&self) -> &OsStr {
            OsStr::new(&self.name)
        }
    }

    fn nodes(names: &[&str]) -> Vec<Node> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| Node {
                name: n.to_string(),
                serial: i as u32,
            })
            .collect()
    }

    fn listing(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn run(old: &[Node], names: &[&str]) -> Reconciled<Node> {
        let mut next = 100;
        reconcile(
            old,
            listing(names),
            |_, _| true,
            |name| {
                next += 1;
                Ok::<_, Infallible>(Node { name, serial: next })
            },
        )
        .unwrap()
    }

    #[test]
    fn unchanged_listing_reuses_everything() {
        let old = nodes(&["a", "b", "c"]);
        let result = run(&old, &["a", "b", "c"]);
        assert_eq!(result.children, old);
        assert!(result.added.is_empty());
        assert!(result.removed.is_empty());
    }

    #[test]
    fn new_and_vanished_names_are_reported() {
        let old = nodes(&["a", "b", "c"]);
        let result = run(&old, &["a", "c", "d"]);

        let names: Vec<_> = result.children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["a", "c", "d"]);
        assert_eq!(result.children[0].serial, 0);
        assert_eq!(result.children[1].serial, 2);
        assert_eq!(result.added.len(), 1);
        assert_eq!(result.added[0].name, "d");
        assert_eq!(result.removed, vec![old[1].clone()]);
    }

    #[test]
    fn non_reusable_child_is_replaced() {
        let old = nodes(&["a", "b"]);
        let result = reconcile(
            &old,
            listing(&["a", "b"]),
            |node, _| node.name != "b",
            |name| Ok::<_, Infallible>(Node { name, serial: 9 }),
        )
        .unwrap();

        assert_eq!(result.children[1].serial, 9);
        assert_eq!(result.removed, vec![old[1].clone()]);
        assert_eq!(result.added.len(), 1);
    }

    #[test]
    fn create_failure_aborts() {
        let result = reconcile(
            &nodes(&[]),
            listing(&["x"]),
            |_, _| true,
            |_| Err::<Node, _>("boom"),
        );
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[test]
    fn empty_listing_removes_all() {
        let old = nodes(&["a", "b"]);
        let result = run(&old, &[]);
        assert!(result.children.is_empty());
        assert_eq!(result.removed, old);
    }
}
