//! Per-field values: constants, IPv4 prefixes, and symbolic locations.
//!
//! A [`Value`] is what a test compares against and what a modification
//! writes. Numeric headers use [`Value::Const`]; the IPv4 address fields
//! additionally admit [`Value::Mask`] prefixes; the location field admits
//! the symbolic [`Value::Pipe`], [`Value::Query`], and [`Value::FastFail`]
//! forms consumed by the controller and the group table.
//!
//! Two properties matter to the diagram engine:
//!
//! - `subset_eq` is a containment test, and prefix values are *laminar*:
//!   any two are nested or disjoint, never partially overlapping.
//! - The total order places more specific values first, so that along a
//!   same-field false-edge chain the more specific test sits higher and a
//!   true edge can only imply (never refine) a test further down.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::field::Field;

/// A per-field value.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Value {
    /// An exact value of the field's width.
    Const(u64),
    /// An IPv4 prefix: value plus prefix length in `0..=32`.
    Mask(u64, u32),
    /// A controller pipe endpoint (location only).
    Pipe(Arc<str>),
    /// A query/measurement endpoint (location only).
    Query(Arc<str>),
    /// A fast-failover port group (location only).
    FastFail(Arc<[u32]>),
}

impl Value {
    pub fn pipe(name: &str) -> Self {
        Value::Pipe(Arc::from(name))
    }

    pub fn query(name: &str) -> Self {
        Value::Query(Arc::from(name))
    }

    pub fn fastfail(ports: &[u32]) -> Self {
        Value::FastFail(Arc::from(ports))
    }

    fn tag(&self) -> u8 {
        match self {
            Value::Const(_) => 0,
            Value::Mask(_, _) => 1,
            Value::Pipe(_) => 2,
            Value::Query(_) => 3,
            Value::FastFail(_) => 4,
        }
    }

    /// True when the value pins the field to a single point (a successful
    /// equality test determines the field completely).
    pub fn is_exact(&self) -> bool {
        match self {
            Value::Mask(_, m) => *m == 32,
            _ => true,
        }
    }

    /// `self ⊆ other`: every packet value matching `self` matches `other`.
    ///
    /// `Const` is the fully specific prefix; symbolic values only contain
    /// themselves.
    pub fn subset_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Const(a), Value::Const(b)) => a == b,
            (Value::Const(a), Value::Mask(b, m)) => prefix_contains(*b, *m, *a),
            (Value::Mask(a, m), Value::Const(b)) => *m == 32 && a == b,
            (Value::Mask(a, ma), Value::Mask(b, mb)) => ma >= mb && prefix_contains(*b, *mb, *a),
            _ => self == other,
        }
    }

    /// True when no packet value matches both. Relies on laminarity: two
    /// prefix values overlap iff one contains the other.
    pub fn disjoint(&self, other: &Value) -> bool {
        !self.subset_eq(other) && !other.subset_eq(self)
    }
}

/// Does the prefix `(value, len)` contain the point `x`?
fn prefix_contains(value: u64, len: u32, x: u64) -> bool {
    debug_assert!(len <= 32);
    if len == 0 {
        return true;
    }
    (value ^ x) >> (32 - len) == 0
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Const(a), Value::Const(b)) => a.cmp(b),
            // Longer prefixes (more specific) first.
            (Value::Mask(a, ma), Value::Mask(b, mb)) => mb.cmp(ma).then(a.cmp(b)),
            (Value::Pipe(a), Value::Pipe(b)) => a.cmp(b),
            (Value::Query(a), Value::Query(b)) => a.cmp(b),
            (Value::FastFail(a), Value::FastFail(b)) => a.cmp(b),
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Const(v) => write!(f, "{}", v),
            Value::Mask(v, m) => write!(f, "{}/{}", v, m),
            Value::Pipe(name) => write!(f, "pipe({})", name),
            Value::Query(name) => write!(f, "query({})", name),
            Value::FastFail(ports) => {
                write!(f, "fastfail[")?;
                for (i, p) in ports.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A test: "field equals value", with prefix semantics for IP fields.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Test {
    pub field: Field,
    pub value: Value,
}

impl Test {
    pub fn new(field: Field, value: Value) -> Self {
        Test { field, value }
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.field, self.value)
    }
}
