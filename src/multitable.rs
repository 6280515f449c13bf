//! Multi-table pipeline emission.
//!
//! A [`Layout`] partitions fields across successive flow tables. The
//! diagram is sliced into horizontal slabs: table `i` holds the branches on
//! the fields of slab `i`; where a path crosses into a later slab, the
//! sub-diagram at the boundary is cut out, deduplicated by handle, and
//! reached through a `GotoTable` instruction carrying a metadata id. Each
//! sub-diagram's rules appear once in the next table, guarded by that
//! metadata --- structural sharing in the diagram becomes rule sharing in the
//! pipeline.

use std::fmt;

use hashbrown::HashMap;
use log::debug;

use crate::error::{Error, Result};
use crate::fdd::Fdd;
use crate::field::Field;
use crate::node::NodeKind;
use crate::options::CompilerOptions;
use crate::reference::Ref;
use crate::table::{GroupTable, Pattern, RuleAction};
use crate::value::Value;

/// An ordered partition of fields across pipeline tables.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Layout {
    slabs: Vec<Vec<Field>>,
}

impl Layout {
    /// Build a layout from ordered, disjoint field subsets.
    pub fn new(slabs: Vec<Vec<Field>>) -> Layout {
        Layout { slabs }
    }

    /// Everything in one table.
    pub fn single() -> Layout {
        Layout {
            slabs: vec![Field::ALL.to_vec()],
        }
    }

    pub fn len(&self) -> usize {
        self.slabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slabs.is_empty()
    }

    /// The slab index holding `field`, if any.
    pub fn slab_of(&self, field: Field) -> Option<usize> {
        self.slabs.iter().position(|slab| slab.contains(&field))
    }
}

/// Identifies a guarded rule block: `(tableId, metaId)`. Rules with the
/// same flow id are the expansion of one sub-diagram, reached by `Goto`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FlowId {
    pub table: u32,
    pub meta: u32,
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.meta)
    }
}

/// What a multi-table rule does on match.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Instruction {
    Apply(RuleAction),
    Goto(FlowId),
}

/// One rule of one pipeline table, guarded by its flow id's metadata.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MultiRule {
    pub flow_id: FlowId,
    pub pattern: Pattern,
    pub instruction: Instruction,
    pub cookie: u64,
}

/// The emitted pipeline: `tables[i]` is the ordered rule list of table `i`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MultiTable {
    pub tables: Vec<Vec<MultiRule>>,
}

/// Emit a multi-table pipeline for `root` on switch `switch` under the
/// given layout. Fails with [`Error::FieldOutOfLayout`] if the diagram
/// branches on a field the remaining slabs cannot host.
pub fn to_multitable(
    fdd: &mut Fdd,
    switch: u64,
    layout: &Layout,
    root: Ref,
    options: &CompilerOptions,
    group_table: &mut GroupTable,
) -> Result<MultiTable> {
    let local = fdd.restrict(Field::Switch, Value::Const(switch), root);
    debug!(
        "to_multitable(switch = {}, {} slabs): local diagram {}",
        switch,
        layout.len(),
        local
    );

    let mut tables = Vec::with_capacity(layout.len());
    let mut frontier: Vec<(u32, Ref)> = vec![(0, local)];

    for (index, slab) in layout.slabs.iter().enumerate() {
        let mut rules = Vec::new();
        let mut next_frontier: Vec<(u32, Ref)> = Vec::new();
        let mut next_meta: HashMap<Ref, u32> = HashMap::new();

        for (meta, sub_root) in frontier {
            let flow_id = FlowId {
                table: index as u32,
                meta,
            };
            let mut pattern = Pattern::any();
            emit_slab(
                fdd,
                sub_root,
                flow_id,
                index,
                slab,
                layout,
                options,
                group_table,
                &mut pattern,
                &mut rules,
                &mut next_frontier,
                &mut next_meta,
            )?;
        }

        tables.push(rules);
        frontier = next_frontier;
    }

    // A non-empty frontier after the last table means the layout ran out.
    if let Some((_, sub_root)) = frontier.into_iter().next() {
        let field = fdd
            .branch(sub_root)
            .map(|(test, _, _)| test.field)
            .unwrap_or(Field::Switch);
        return Err(Error::FieldOutOfLayout { field });
    }

    Ok(MultiTable { tables })
}

#[allow(clippy::too_many_arguments)]
fn emit_slab(
    fdd: &Fdd,
    node: Ref,
    flow_id: FlowId,
    slab_index: usize,
    slab: &[Field],
    layout: &Layout,
    options: &CompilerOptions,
    group_table: &mut GroupTable,
    pattern: &mut Pattern,
    rules: &mut Vec<MultiRule>,
    next_frontier: &mut Vec<(u32, Ref)>,
    next_meta: &mut HashMap<Ref, u32>,
) -> Result<()> {
    match fdd.node(node).kind() {
        NodeKind::Leaf(actions) => {
            let mut gt = Some(group_table);
            let action = crate::table::lower_action_set(actions, options.openflow_adherence, &mut gt)?;
            rules.push(MultiRule {
                flow_id,
                pattern: pattern.clone(),
                instruction: Instruction::Apply(action),
                cookie: 0,
            });
            Ok(())
        }
        NodeKind::Branch { test, tru, fls } => {
            if slab.contains(&test.field) {
                let previous = pattern.get(test.field).cloned();
                pattern.insert(test.field, test.value.clone());
                emit_slab(
                    fdd,
                    *tru,
                    flow_id,
                    slab_index,
                    slab,
                    layout,
                    options,
                    group_table,
                    pattern,
                    rules,
                    next_frontier,
                    next_meta,
                )?;
                match previous {
                    Some(v) => pattern.insert(test.field, v),
                    None => pattern.remove(test.field),
                }
                return emit_slab(
                    fdd,
                    *fls,
                    flow_id,
                    slab_index,
                    slab,
                    layout,
                    options,
                    group_table,
                    pattern,
                    rules,
                    next_frontier,
                    next_meta,
                );
            }

            // Slab boundary: the sub-diagram continues in a later table.
            match layout.slab_of(test.field) {
                Some(position) if position > slab_index => {}
                _ => return Err(Error::FieldOutOfLayout { field: test.field }),
            }
            let meta = match next_meta.get(&node) {
                Some(&meta) => meta,
                None => {
                    let meta = next_meta.len() as u32;
                    next_meta.insert(node, meta);
                    next_frontier.push((meta, node));
                    meta
                }
            };
            rules.push(MultiRule {
                flow_id,
                pattern: pattern.clone(),
                instruction: Instruction::Goto(FlowId {
                    table: flow_id.table + 1,
                    meta,
                }),
                cookie: 0,
            });
            Ok(())
        }
    }
}
