//! Single-table flow rule emission.
//!
//! A diagram specialized to one switch becomes an ordered rule list: one
//! rule per root-to-leaf path, pattern = the positive tests along the
//! path's true edges, action = the leaf's action set. The emission order is
//! the diagram's depth-first order with true edges first, which realizes
//! the negative constraints by shadowing: every refinement of a pattern is
//! emitted before the generalizations that would otherwise capture it, so
//! first-match semantics reproduce the diagram exactly.
//!
//! Rules are installed with strictly descending priority in list order.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;

use crate::action::{Action, ActionSet};
use crate::error::{Error, Result};
use crate::fdd::Fdd;
use crate::field::Field;
use crate::node::NodeKind;
use crate::options::{Adherence, CompilerOptions};
use crate::reference::Ref;
use crate::value::Value;

/// A wire match: a conjunction of per-field equalities/prefixes. No native
/// negation exists; negative path constraints are realized by rule order.
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Pattern {
    matches: BTreeMap<Field, Value>,
}

impl Pattern {
    pub fn any() -> Self {
        Pattern::default()
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.matches.get(&field)
    }

    pub fn insert(&mut self, field: Field, value: Value) {
        self.matches.insert(field, value);
    }

    pub fn remove(&mut self, field: Field) {
        self.matches.remove(&field);
    }

    pub fn is_any(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &Value)> {
        self.matches.iter()
    }

    /// `self ⊆ other`: every packet matched by `self` is matched by
    /// `other` (`other` shadows `self` if installed above it).
    pub fn subset_eq(&self, other: &Pattern) -> bool {
        other.matches.iter().all(|(field, v)| match self.get(*field) {
            Some(mine) => mine.subset_eq(v),
            None => false,
        })
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return write!(f, "{{*}}");
        }
        write!(f, "{{")?;
        for (i, (field, value)) in self.matches.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", field, value)?;
        }
        write!(f, "}}")
    }
}

/// Where an output copy goes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PseudoPort {
    Physical(u64),
    Pipe(std::sync::Arc<str>),
    Query(std::sync::Arc<str>),
}

/// One primitive wire action.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WireAction {
    SetField(Field, Value),
    Output(PseudoPort),
}

/// One bucket: the action list applied to one output copy.
pub type Bucket = Vec<WireAction>;

/// A rule's action: inline buckets, or a reference into the group table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RuleAction {
    Direct(Vec<Bucket>),
    Group(u32),
}

impl RuleAction {
    pub fn drop() -> Self {
        RuleAction::Direct(Vec::new())
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, RuleAction::Direct(buckets) if buckets.is_empty())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Timeout {
    Permanent,
    ExpireAfter(u32),
}

/// One prioritized flow rule. Priority is positional: earlier in the
/// emitted list means higher priority on the switch.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FlowRule {
    pub pattern: Pattern,
    pub action: RuleAction,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
}

impl FlowRule {
    fn new(pattern: Pattern, action: RuleAction) -> Self {
        FlowRule {
            pattern,
            action,
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
        }
    }
}

/// Group-table entry kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GroupType {
    /// Replicate to every bucket (multicast).
    All,
    /// First live bucket wins.
    FastFailover,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GroupEntry {
    pub id: u32,
    pub group_type: GroupType,
    pub buckets: Vec<Bucket>,
}

/// The shared group table: multicast fan-out and fast-failover buckets are
/// hoisted here and referenced by id from flow rules.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct GroupTable {
    next_id: u32,
    entries: Vec<GroupEntry>,
}

impl GroupTable {
    pub fn new() -> Self {
        GroupTable::default()
    }

    pub fn entries(&self) -> &[GroupEntry] {
        &self.entries
    }

    pub fn add(&mut self, group_type: GroupType, buckets: Vec<Bucket>) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(GroupEntry {
            id,
            group_type,
            buckets,
        });
        id
    }
}

/// Emit the ordered single-table rules for `root` on switch `switch`.
///
/// The diagram is first restricted to the switch; the output then never
/// matches on the switch field. For every packet, the first matching rule
/// applies exactly the action set [`crate::interp::eval`] would produce.
pub fn to_table(
    fdd: &mut Fdd,
    switch: u64,
    root: Ref,
    options: &CompilerOptions,
    mut group_table: Option<&mut GroupTable>,
) -> Result<Vec<FlowRule>> {
    let local = fdd.restrict(Field::Switch, Value::Const(switch), root);
    debug!("to_table(switch = {}, root = {}): local diagram {}", switch, root, local);

    let mut rules = Vec::new();
    let mut pattern = Pattern::any();
    emit(fdd, local, &mut pattern, options, &mut group_table, &mut rules)?;

    if options.dedup_flows {
        dedup_flows(&mut rules);
    }
    if options.remove_tail_drops {
        while rules.last().is_some_and(|r| r.action.is_drop()) {
            rules.pop();
        }
    }
    Ok(rules)
}

fn emit(
    fdd: &Fdd,
    node: Ref,
    pattern: &mut Pattern,
    options: &CompilerOptions,
    group_table: &mut Option<&mut GroupTable>,
    rules: &mut Vec<FlowRule>,
) -> Result<()> {
    match fdd.node(node).kind() {
        NodeKind::Leaf(actions) => {
            let action = lower_action_set(actions, options.openflow_adherence, group_table)?;
            rules.push(FlowRule::new(pattern.clone(), action));
            Ok(())
        }
        NodeKind::Branch { test, tru, fls } => {
            let previous = pattern.get(test.field).cloned();
            pattern.insert(test.field, test.value.clone());
            emit(fdd, *tru, pattern, options, group_table, rules)?;
            match previous {
                Some(v) => pattern.insert(test.field, v),
                None => pattern.remove(test.field),
            }
            emit(fdd, *fls, pattern, options, group_table, rules)
        }
    }
}

/// Lower one action set to a rule action, hoisting into the group table
/// when the set needs multicast or fast-failover.
pub(crate) fn lower_action_set(
    actions: &ActionSet,
    adherence: Adherence,
    group_table: &mut Option<&mut GroupTable>,
) -> Result<RuleAction> {
    let mut buckets = Vec::new();
    let mut fastfail: Option<Vec<u64>> = None;

    for action in actions.iter() {
        match action.get(Field::Location) {
            Some(Value::FastFail(ports)) => {
                fastfail = Some(ports.iter().map(|p| *p as u64).collect());
            }
            _ => match lower_action(action, adherence)? {
                Some(bucket) => buckets.push(bucket),
                None => {}
            },
        }
    }

    if let Some(ports) = fastfail {
        let Some(gt) = group_table.as_deref_mut() else {
            return match adherence {
                Adherence::Strict => Err(Error::UnsupportedAction {
                    reason: "fast-failover requires a group table".to_string(),
                }),
                Adherence::Sloppy => Ok(if buckets.is_empty() {
                    RuleAction::drop()
                } else {
                    RuleAction::Direct(buckets)
                }),
            };
        };
        let mut ff_buckets: Vec<Bucket> = ports
            .into_iter()
            .map(|p| vec![WireAction::Output(PseudoPort::Physical(p))])
            .collect();
        ff_buckets.extend(buckets);
        let id = gt.add(GroupType::FastFailover, ff_buckets);
        return Ok(RuleAction::Group(id));
    }

    if buckets.len() > 1 {
        if let Some(gt) = group_table.as_deref_mut() {
            let id = gt.add(GroupType::All, buckets);
            return Ok(RuleAction::Group(id));
        }
        if adherence == Adherence::Strict {
            return Err(Error::UnsupportedAction {
                reason: "multicast requires a group table".to_string(),
            });
        }
    }
    Ok(RuleAction::Direct(buckets))
}

/// Lower one action to a bucket.
///
/// The location write becomes the output; the identity action is the empty
/// bucket. A non-identity action with no output port is meaningless on the
/// wire: an error under strict adherence, skipped under sloppy.
fn lower_action(action: &Action, adherence: Adherence) -> Result<Option<Bucket>> {
    let mut bucket = Vec::new();

    for (field, value) in action.iter() {
        if *field == Field::Location {
            continue;
        }
        if field.is_virtual() || *field == Field::Switch {
            match adherence {
                Adherence::Strict => {
                    return Err(Error::UnsupportedAction {
                        reason: format!("cannot write {} on the wire", field),
                    })
                }
                Adherence::Sloppy => continue,
            }
        }
        if let Value::Mask(_, m) = value {
            if *m != 32 {
                match adherence {
                    Adherence::Strict => {
                        return Err(Error::UnsupportedAction {
                            reason: format!("partial-prefix write to {}", field),
                        })
                    }
                    Adherence::Sloppy => continue,
                }
            }
        }
        bucket.push(WireAction::SetField(*field, value.clone()));
    }

    match action.get(Field::Location) {
        Some(Value::Const(port)) => {
            bucket.push(WireAction::Output(PseudoPort::Physical(*port)));
            Ok(Some(bucket))
        }
        Some(Value::Pipe(name)) => {
            bucket.push(WireAction::Output(PseudoPort::Pipe(name.clone())));
            Ok(Some(bucket))
        }
        Some(Value::Query(name)) => {
            bucket.push(WireAction::Output(PseudoPort::Query(name.clone())));
            Ok(Some(bucket))
        }
        Some(_) => Err(Error::UnsupportedAction {
            reason: "location written with a non-port value".to_string(),
        }),
        None if action.is_id() => Ok(Some(bucket)),
        None => match adherence {
            Adherence::Strict => Err(Error::IndeterminatePort),
            Adherence::Sloppy => Ok(None),
        },
    }
}

/// Merge an earlier rule into an adjacent later rule that has the same
/// action and a pattern subsuming it: the packets of the earlier rule fall
/// through to the later one with identical behavior.
fn dedup_flows(rules: &mut Vec<FlowRule>) {
    let mut i = 0;
    while i + 1 < rules.len() {
        let merge = {
            let (a, b) = (&rules[i], &rules[i + 1]);
            a.action == b.action && a.pattern.subset_eq(&b.pattern)
        };
        if merge {
            rules.remove(i);
        } else {
            i += 1;
        }
    }
}
