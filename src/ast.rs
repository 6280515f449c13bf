//! The surface policy language: predicates and policies.
//!
//! The compiler consumes this tree; construction and parsing live with the
//! caller. Smart constructors fold the obvious constants so that trees
//! built programmatically stay small, and [`Policy::optimize`] applies the
//! full set of Boolean/regular identities on demand.

use std::fmt;

use crate::field::Field;
use crate::value::Value;

/// A packet predicate.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Pred {
    True,
    False,
    Test(Field, Value),
    Neg(Box<Pred>),
    And(Box<Pred>, Box<Pred>),
    Or(Box<Pred>, Box<Pred>),
}

impl Pred {
    pub fn test(field: Field, value: Value) -> Self {
        Pred::Test(field, value)
    }

    pub fn neg(p: Pred) -> Self {
        match p {
            Pred::True => Pred::False,
            Pred::False => Pred::True,
            Pred::Neg(inner) => *inner,
            _ => Pred::Neg(Box::new(p)),
        }
    }

    pub fn and(a: Pred, b: Pred) -> Self {
        match (a, b) {
            (Pred::True, p) | (p, Pred::True) => p,
            (Pred::False, _) | (_, Pred::False) => Pred::False,
            (a, b) => Pred::And(Box::new(a), Box::new(b)),
        }
    }

    pub fn or(a: Pred, b: Pred) -> Self {
        match (a, b) {
            (Pred::False, p) | (p, Pred::False) => p,
            (Pred::True, _) | (_, Pred::True) => Pred::True,
            (a, b) => Pred::Or(Box::new(a), Box::new(b)),
        }
    }

    /// Bottom-up constant folding through the smart constructors.
    pub fn simplify(&self) -> Pred {
        match self {
            Pred::True | Pred::False | Pred::Test(_, _) => self.clone(),
            Pred::Neg(p) => Pred::neg(p.simplify()),
            Pred::And(a, b) => Pred::and(a.simplify(), b.simplify()),
            Pred::Or(a, b) => Pred::or(a.simplify(), b.simplify()),
        }
    }

    /// Rewrite switch tests against a concrete switch id.
    fn specialize(&self, switch: u64) -> Pred {
        match self {
            Pred::Test(Field::Switch, v) => {
                if Value::Const(switch).subset_eq(v) {
                    Pred::True
                } else {
                    Pred::False
                }
            }
            Pred::Neg(p) => Pred::neg(p.specialize(switch)),
            Pred::And(a, b) => Pred::and(a.specialize(switch), b.specialize(switch)),
            Pred::Or(a, b) => Pred::or(a.specialize(switch), b.specialize(switch)),
            _ => self.clone(),
        }
    }

    fn count_tests(&self, counts: &mut [usize; Field::COUNT]) {
        match self {
            Pred::Test(field, _) => counts[field.index()] += 1,
            Pred::Neg(p) => p.count_tests(counts),
            Pred::And(a, b) | Pred::Or(a, b) => {
                a.count_tests(counts);
                b.count_tests(counts);
            }
            Pred::True | Pred::False => {}
        }
    }
}

impl fmt::Display for Pred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pred::True => write!(f, "true"),
            Pred::False => write!(f, "false"),
            Pred::Test(field, value) => write!(f, "{} = {}", field, value),
            Pred::Neg(p) => write!(f, "!({})", p),
            Pred::And(a, b) => write!(f, "({} and {})", a, b),
            Pred::Or(a, b) => write!(f, "({} or {})", a, b),
        }
    }
}

/// A network policy.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Policy {
    Filter(Pred),
    Mod(Field, Value),
    Union(Box<Policy>, Box<Policy>),
    Seq(Box<Policy>, Box<Policy>),
    Star(Box<Policy>),
    Link {
        src_switch: u64,
        src_port: u64,
        dst_switch: u64,
        dst_port: u64,
    },
}

impl Policy {
    /// `filter true` --- the identity policy.
    pub fn id() -> Self {
        Policy::Filter(Pred::True)
    }

    /// `filter false` --- the empty policy.
    pub fn drop() -> Self {
        Policy::Filter(Pred::False)
    }

    pub fn filter(pred: Pred) -> Self {
        Policy::Filter(pred)
    }

    pub fn modify(field: Field, value: Value) -> Self {
        Policy::Mod(field, value)
    }

    pub fn union(a: Policy, b: Policy) -> Self {
        match (a, b) {
            (Policy::Filter(Pred::False), p) | (p, Policy::Filter(Pred::False)) => p,
            (a, b) => Policy::Union(Box::new(a), Box::new(b)),
        }
    }

    pub fn seq(a: Policy, b: Policy) -> Self {
        match (a, b) {
            (Policy::Filter(Pred::False), _) | (_, Policy::Filter(Pred::False)) => Policy::drop(),
            (Policy::Filter(Pred::True), p) | (p, Policy::Filter(Pred::True)) => p,
            (a, b) => Policy::Seq(Box::new(a), Box::new(b)),
        }
    }

    pub fn star(p: Policy) -> Self {
        match p {
            Policy::Filter(Pred::True) | Policy::Filter(Pred::False) => Policy::id(),
            p => Policy::Star(Box::new(p)),
        }
    }

    pub fn link(src_switch: u64, src_port: u64, dst_switch: u64, dst_port: u64) -> Self {
        Policy::Link {
            src_switch,
            src_port,
            dst_switch,
            dst_port,
        }
    }

    /// Union of all given policies (`drop` for none).
    pub fn union_all(policies: impl IntoIterator<Item = Policy>) -> Self {
        policies
            .into_iter()
            .fold(Policy::drop(), |acc, p| Policy::union(acc, p))
    }

    /// Sequence of all given policies (`id` for none).
    pub fn seq_all(policies: impl IntoIterator<Item = Policy>) -> Self {
        policies
            .into_iter()
            .fold(Policy::id(), |acc, p| Policy::seq(acc, p))
    }

    /// Algebraic simplification: constants short-circuit through
    /// `And`/`Or`, absorb through `Seq`/`Union`, and `Star` of a constant
    /// folds to `id`.
    pub fn optimize(&self) -> Policy {
        match self {
            Policy::Filter(pred) => Policy::Filter(pred.simplify()),
            Policy::Mod(_, _) | Policy::Link { .. } => self.clone(),
            Policy::Union(a, b) => Policy::union(a.optimize(), b.optimize()),
            Policy::Seq(a, b) => Policy::seq(a.optimize(), b.optimize()),
            Policy::Star(p) => Policy::star(p.optimize()),
        }
    }

    /// Partially evaluate switch tests against a concrete switch.
    pub fn specialize(&self, switch: u64) -> Policy {
        match self {
            Policy::Filter(pred) => Policy::Filter(pred.specialize(switch)),
            Policy::Mod(_, _) | Policy::Link { .. } => self.clone(),
            Policy::Union(a, b) => Policy::union(a.specialize(switch), b.specialize(switch)),
            Policy::Seq(a, b) => Policy::seq(a.specialize(switch), b.specialize(switch)),
            Policy::Star(p) => Policy::star(p.specialize(switch)),
        }
    }

    /// Per-field test counts, for the heuristic field order.
    pub fn test_counts(&self) -> [usize; Field::COUNT] {
        let mut counts = [0usize; Field::COUNT];
        self.count_tests(&mut counts);
        counts
    }

    fn count_tests(&self, counts: &mut [usize; Field::COUNT]) {
        match self {
            Policy::Filter(pred) => pred.count_tests(counts),
            Policy::Mod(_, _) | Policy::Link { .. } => {}
            Policy::Union(a, b) | Policy::Seq(a, b) => {
                a.count_tests(counts);
                b.count_tests(counts);
            }
            Policy::Star(p) => p.count_tests(counts),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Filter(pred) => write!(f, "filter {}", pred),
            Policy::Mod(field, value) => write!(f, "{} := {}", field, value),
            Policy::Union(a, b) => write!(f, "({} | {})", a, b),
            Policy::Seq(a, b) => write!(f, "({} ; {})", a, b),
            Policy::Star(p) => write!(f, "({})*", p),
            Policy::Link {
                src_switch,
                src_port,
                dst_switch,
                dst_port,
            } => write!(f, "{}@{} => {}@{}", src_switch, src_port, dst_switch, dst_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlan_test(v: u64) -> Pred {
        Pred::test(Field::Vlan, Value::Const(v))
    }

    #[test]
    fn test_pred_constant_folding() {
        assert_eq!(Pred::and(Pred::True, vlan_test(1)), vlan_test(1));
        assert_eq!(Pred::and(Pred::False, vlan_test(1)), Pred::False);
        assert_eq!(Pred::or(Pred::False, vlan_test(1)), vlan_test(1));
        assert_eq!(Pred::or(Pred::True, vlan_test(1)), Pred::True);
        assert_eq!(Pred::neg(Pred::neg(vlan_test(1))), vlan_test(1));
        assert_eq!(Pred::neg(Pred::True), Pred::False);
    }

    #[test]
    fn test_policy_absorption() {
        let p = Policy::modify(Field::Vlan, Value::Const(7));
        assert_eq!(Policy::seq(Policy::id(), p.clone()), p);
        assert_eq!(Policy::seq(Policy::drop(), p.clone()), Policy::drop());
        assert_eq!(Policy::union(Policy::drop(), p.clone()), p);
        assert_eq!(Policy::star(Policy::id()), Policy::id());
        assert_eq!(Policy::star(Policy::drop()), Policy::id());
    }

    #[test]
    fn test_optimize_rebuilds_deep_constants() {
        // Built with raw constructors, so nothing is folded yet.
        let raw = Policy::Seq(
            Box::new(Policy::Filter(Pred::And(
                Box::new(Pred::True),
                Box::new(vlan_test(1)),
            ))),
            Box::new(Policy::Filter(Pred::True)),
        );
        assert_eq!(raw.optimize(), Policy::Filter(vlan_test(1)));
    }

    #[test]
    fn test_specialize_switch_tests() {
        let p = Policy::Seq(
            Box::new(Policy::Filter(Pred::test(Field::Switch, Value::Const(3)))),
            Box::new(Policy::modify(Field::Vlan, Value::Const(7))),
        );
        assert_eq!(
            p.specialize(3),
            Policy::modify(Field::Vlan, Value::Const(7))
        );
        assert_eq!(p.specialize(4), Policy::drop());
    }

    #[test]
    fn test_test_counts() {
        let p = Policy::union(
            Policy::Filter(Pred::and(vlan_test(1), vlan_test(2))),
            Policy::Filter(Pred::test(Field::EthSrc, Value::Const(9))),
        );
        let counts = p.test_counts();
        assert_eq!(counts[Field::Vlan.index()], 2);
        assert_eq!(counts[Field::EthSrc.index()], 1);
        assert_eq!(counts[Field::Switch.index()], 0);
    }
}
