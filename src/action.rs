//! The action algebra: simultaneous header assignments and multicast sets.
//!
//! An [`Action`] is one simultaneous assignment of values to fields --- what a
//! single copy of a packet undergoes. An [`ActionSet`] is an unordered set
//! of actions, read as "emit one copy per action"; the empty set drops the
//! packet and the singleton empty action passes it through untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::field::Field;
use crate::value::Value;

/// One simultaneous assignment: at most one value per field.
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Action {
    writes: BTreeMap<Field, Value>,
}

impl Action {
    /// The identity action (no writes).
    pub fn id() -> Self {
        Action::default()
    }

    /// A single-field assignment.
    pub fn set(field: Field, value: Value) -> Self {
        let mut writes = BTreeMap::new();
        writes.insert(field, value);
        Action { writes }
    }

    pub fn is_id(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.writes.get(&field)
    }

    pub fn insert(&mut self, field: Field, value: Value) {
        self.writes.insert(field, value);
    }

    pub fn remove(&mut self, field: Field) -> Option<Value> {
        self.writes.remove(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &Value)> {
        self.writes.iter()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Sequential composition `self ; other` --- the later write wins:
    /// `(a ; b)[f] = b[f]` if `b` assigns `f`, else `a[f]`.
    pub fn seq(&self, other: &Action) -> Action {
        let mut writes = self.writes.clone();
        for (f, v) in other.writes.iter() {
            writes.insert(*f, v.clone());
        }
        Action { writes }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_id() {
            return write!(f, "id");
        }
        write!(f, "{{")?;
        for (i, (field, value)) in self.writes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} := {}", field, value)?;
        }
        write!(f, "}}")
    }
}

/// An unordered set of actions: one output copy per member.
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ActionSet {
    actions: BTreeSet<Action>,
}

impl ActionSet {
    /// `drop` --- the empty set, no copies emitted.
    pub fn drop() -> Self {
        ActionSet::default()
    }

    /// `id` --- the singleton containing the empty action.
    pub fn id() -> Self {
        ActionSet::singleton(Action::id())
    }

    pub fn singleton(action: Action) -> Self {
        let mut actions = BTreeSet::new();
        actions.insert(action);
        ActionSet { actions }
    }

    pub fn is_drop(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn is_id(&self) -> bool {
        self.actions.len() == 1 && self.actions.iter().next().unwrap().is_id()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    pub fn insert(&mut self, action: Action) {
        self.actions.insert(action);
    }

    /// Parallel composition: set union.
    pub fn par(&self, other: &ActionSet) -> ActionSet {
        let actions = self.actions.union(&other.actions).cloned().collect();
        ActionSet { actions }
    }

    /// `{ a ; t | t ∈ set }` --- prepend one action to every member.
    pub fn seq_set(a: &Action, set: &ActionSet) -> ActionSet {
        let actions = set.actions.iter().map(|t| a.seq(t)).collect();
        ActionSet { actions }
    }

    /// `⋃_{s ∈ self} seq_set(s, other)` --- pointwise sequential composition.
    pub fn seq_sets(&self, other: &ActionSet) -> ActionSet {
        let mut actions = BTreeSet::new();
        for s in self.actions.iter() {
            for t in other.actions.iter() {
                actions.insert(s.seq(t));
            }
        }
        ActionSet { actions }
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        ActionSet {
            actions: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_drop() {
            return write!(f, "drop");
        }
        if self.is_id() {
            return write!(f, "id");
        }
        write!(f, "{{")?;
        for (i, a) in self.actions.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, "}}")
    }
}
