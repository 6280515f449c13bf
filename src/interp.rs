//! A reference interpreter over diagrams, for testing and debugging.
//!
//! [`eval`] walks a diagram with a concrete packet and produces the output
//! packet set --- the denotation the flow-table emitters must preserve.
//! [`pipes`] and [`queries`] collect the observation points a controller
//! needs to subscribe to.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::action::Action;
use crate::fdd::Fdd;
use crate::field::Field;
use crate::node::NodeKind;
use crate::reference::Ref;
use crate::value::{Test, Value};

/// A concrete packet: a partial assignment of values to fields.
///
/// A test on an absent field does not match.
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Packet {
    headers: BTreeMap<Field, Value>,
}

impl Packet {
    pub fn new() -> Self {
        Packet::default()
    }

    pub fn with(mut self, field: Field, value: Value) -> Self {
        self.headers.insert(field, value);
        self
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.headers.get(&field)
    }

    pub fn set(&mut self, field: Field, value: Value) {
        self.headers.insert(field, value);
    }

    pub fn matches(&self, test: &Test) -> bool {
        match self.get(test.field) {
            Some(v) => v.subset_eq(&test.value),
            None => false,
        }
    }

    /// The packet after one action's writes.
    pub fn apply(&self, action: &Action) -> Packet {
        let mut out = self.clone();
        for (field, value) in action.iter() {
            out.set(*field, value.clone());
        }
        out
    }
}

/// Run a packet through a diagram: one output packet per leaf action.
pub fn eval(fdd: &Fdd, packet: &Packet, root: Ref) -> BTreeSet<Packet> {
    let mut node = root;
    loop {
        match fdd.node(node).kind() {
            NodeKind::Branch { test, tru, fls } => {
                node = if packet.matches(test) { *tru } else { *fls };
            }
            NodeKind::Leaf(actions) => {
                return actions.iter().map(|a| packet.apply(a)).collect();
            }
        }
    }
}

/// Outputs of [`eval_pipes`], partitioned by the location tag.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct PartitionedOutput {
    /// Packets sent to a controller pipe, with the pipe name.
    pub pipes: BTreeSet<(String, Packet)>,
    /// Packets recorded against a query, with the query name.
    pub queries: BTreeSet<(String, Packet)>,
    /// Packets leaving on a physical location.
    pub physical: BTreeSet<Packet>,
}

/// Like [`eval`], but split the output by where each copy goes.
pub fn eval_pipes(fdd: &Fdd, packet: &Packet, root: Ref) -> PartitionedOutput {
    let mut out = PartitionedOutput::default();
    for pkt in eval(fdd, packet, root) {
        match pkt.get(Field::Location) {
            Some(Value::Pipe(name)) => {
                out.pipes.insert((name.to_string(), pkt));
            }
            Some(Value::Query(name)) => {
                out.queries.insert((name.to_string(), pkt));
            }
            _ => {
                out.physical.insert(pkt);
            }
        }
    }
    out
}

/// All pipe names mentioned by leaf actions reachable from `root`.
pub fn pipes(fdd: &Fdd, root: Ref) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for r in fdd.descendants([root]) {
        if let NodeKind::Leaf(actions) = fdd.node(r).kind() {
            for action in actions.iter() {
                if let Some(Value::Pipe(name)) = action.get(Field::Location) {
                    names.insert(name.to_string());
                }
            }
        }
    }
    names
}

/// All query names with their guarding predicates.
///
/// A query's predicate is the disjunction of the path predicates whose leaf
/// mentions it, rebuilt as a well-ordered predicate diagram.
pub fn queries(fdd: &mut Fdd, root: Ref) -> Vec<(String, Ref)> {
    let mut names = BTreeSet::new();
    for r in fdd.descendants([root]) {
        if let NodeKind::Leaf(actions) = fdd.node(r).kind() {
            for action in actions.iter() {
                if let Some(Value::Query(name)) = action.get(Field::Location) {
                    names.insert(name.to_string());
                }
            }
        }
    }

    names
        .into_iter()
        .map(|name| {
            let mut memo = HashMap::new();
            let pred = query_pred(fdd, root, &name, &mut memo);
            (name, pred)
        })
        .collect()
}

fn query_pred(fdd: &mut Fdd, node: Ref, name: &str, memo: &mut HashMap<Ref, Ref>) -> Ref {
    if let Some(&res) = memo.get(&node) {
        return res;
    }
    let res = match fdd.node(node).kind() {
        NodeKind::Leaf(actions) => {
            let mentioned = actions.iter().any(|action| {
                matches!(action.get(Field::Location), Some(Value::Query(n)) if n.as_ref() == name)
            });
            if mentioned {
                Ref::ID
            } else {
                Ref::DROP
            }
        }
        NodeKind::Branch { test, tru, fls } => {
            let (test, tru, fls) = (test.clone(), *tru, *fls);
            let tru = query_pred(fdd, tru, name, memo);
            let fls = query_pred(fdd, fls, name, memo);
            fdd.cond(test, tru, fls)
        }
    };
    memo.insert(node, res);
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionSet;
    use crate::ast::{Policy, Pred};
    use crate::compile::of_policy;

    fn vlan_pkt(v: u64) -> Packet {
        Packet::new().with(Field::Vlan, Value::Const(v))
    }

    #[test]
    fn test_eval_terminals() {
        let fdd = Fdd::default();
        let pkt = vlan_pkt(1);
        assert!(eval(&fdd, &pkt, Ref::DROP).is_empty());
        assert_eq!(eval(&fdd, &pkt, Ref::ID), BTreeSet::from([pkt]));
    }

    #[test]
    fn test_eval_branch_and_modification() {
        let mut fdd = Fdd::default();
        let p = Policy::seq(
            Policy::filter(Pred::test(Field::Vlan, Value::Const(1))),
            Policy::modify(Field::Vlan, Value::Const(2)),
        );
        let r = of_policy(&mut fdd, &p).unwrap();

        assert_eq!(
            eval(&fdd, &vlan_pkt(1), r),
            BTreeSet::from([vlan_pkt(2)])
        );
        assert!(eval(&fdd, &vlan_pkt(3), r).is_empty());
        // Absent field: the test does not match.
        assert!(eval(&fdd, &Packet::new(), r).is_empty());
    }

    #[test]
    fn test_eval_multicast() {
        let mut fdd = Fdd::default();
        let p = Policy::union(
            Policy::modify(Field::Location, Value::Const(1)),
            Policy::modify(Field::Location, Value::Const(2)),
        );
        let r = of_policy(&mut fdd, &p).unwrap();

        let out = eval(&fdd, &Packet::new(), r);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_eval_prefix_match() {
        let mut fdd = Fdd::default();
        let p = Policy::filter(Pred::test(Field::IP4Dst, Value::Mask(0x0A00_0000, 8)));
        let r = of_policy(&mut fdd, &p).unwrap();

        let inside = Packet::new().with(Field::IP4Dst, Value::Const(0x0A01_0203));
        let outside = Packet::new().with(Field::IP4Dst, Value::Const(0xC0A8_0001));
        assert_eq!(eval(&fdd, &inside, r).len(), 1);
        assert!(eval(&fdd, &outside, r).is_empty());
    }

    #[test]
    fn test_eval_pipes_partitions() {
        let mut fdd = Fdd::default();
        let p = Policy::union_all([
            Policy::modify(Field::Location, Value::pipe("learn")),
            Policy::modify(Field::Location, Value::query("stats")),
            Policy::modify(Field::Location, Value::Const(3)),
        ]);
        let r = of_policy(&mut fdd, &p).unwrap();

        let out = eval_pipes(&fdd, &Packet::new(), r);
        assert_eq!(out.pipes.len(), 1);
        assert_eq!(out.queries.len(), 1);
        assert_eq!(out.physical.len(), 1);
        assert_eq!(out.pipes.iter().next().unwrap().0, "learn");
    }

    #[test]
    fn test_pipes_collects_names() {
        let mut fdd = Fdd::default();
        let p = Policy::union(
            Policy::seq(
                Policy::filter(Pred::test(Field::Vlan, Value::Const(1))),
                Policy::modify(Field::Location, Value::pipe("a")),
            ),
            Policy::modify(Field::Location, Value::pipe("b")),
        );
        let r = of_policy(&mut fdd, &p).unwrap();
        assert_eq!(
            pipes(&fdd, r),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_queries_predicates() {
        let mut fdd = Fdd::default();
        let p = Policy::seq(
            Policy::filter(Pred::test(Field::Vlan, Value::Const(1))),
            Policy::modify(Field::Location, Value::query("count")),
        );
        let r = of_policy(&mut fdd, &p).unwrap();

        let qs = queries(&mut fdd, r);
        assert_eq!(qs.len(), 1);
        let (name, pred) = &qs[0];
        assert_eq!(name, "count");
        // The guard is exactly `vlan = 1`.
        let vlan1 = of_policy(
            &mut fdd,
            &Policy::filter(Pred::test(Field::Vlan, Value::Const(1))),
        )
        .unwrap();
        assert_eq!(*pred, vlan1);
    }

    #[test]
    fn test_eval_matches_leaf_actions() {
        let mut fdd = Fdd::default();
        let mut multi = ActionSet::drop();
        multi.insert(Action::set(Field::Vlan, Value::Const(5)));
        multi.insert(Action::id());
        let leaf = fdd.leaf(multi);

        let pkt = vlan_pkt(1);
        let out = eval(&fdd, &pkt, leaf);
        assert_eq!(out, BTreeSet::from([vlan_pkt(1), vlan_pkt(5)]));
    }
}
