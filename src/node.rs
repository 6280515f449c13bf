use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::action::ActionSet;
use crate::reference::Ref;
use crate::value::Test;

/// An FDD node: either a terminal action set or a decision on one test.
///
/// # Structure
///
/// A branch reads as
/// ```text
/// if field = value then tru else fls
/// ```
/// with both children's root tests strictly greater than `test` in the
/// manager's test order.
///
/// Nodes are immutable once interned; the manager guarantees that equal
/// structures share one handle, so `Ref` equality is diagram equality.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum NodeKind {
    Leaf(ActionSet),
    Branch { test: Test, tru: Ref, fls: Ref },
}

/// A node plus its precomputed structural hash.
///
/// Leaf payloads are whole action sets, so comparing nodes during an
/// intern lookup can mean walking a `BTreeSet` of `BTreeMap`s. Hashing
/// the content once at construction lets every later lookup reject
/// mismatches on a single `u64` compare, and lets the intern map rehash
/// entries without touching the payload again.
#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    hash: u64,
}

fn content_hash(kind: &NodeKind) -> u64 {
    let mut hasher = DefaultHasher::new();
    kind.hash(&mut hasher);
    hasher.finish()
}

impl Node {
    pub fn leaf(actions: ActionSet) -> Self {
        let kind = NodeKind::Leaf(actions);
        let hash = content_hash(&kind);
        Node { kind, hash }
    }

    pub fn branch(test: Test, tru: Ref, fls: Ref) -> Self {
        let kind = NodeKind::Branch { test, tru, fls };
        let hash = content_hash(&kind);
        Node { kind, hash }
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    /// The root test, or `None` for leaves.
    pub fn test(&self) -> Option<&Test> {
        match &self.kind {
            NodeKind::Leaf(_) => None,
            NodeKind::Branch { test, .. } => Some(test),
        }
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.kind == other.kind
    }
}

impl Eq for Node {}
