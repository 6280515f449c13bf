use std::collections::BTreeMap;

use crate::fdd::Fdd;
use crate::node::NodeKind;
use crate::reference::Ref;

impl Fdd {
    /// GraphViz export: branches clustered by field rank, leaves as boxes
    /// labeled with their action set, solid true edges and dashed false
    /// edges.
    pub fn to_dot(&self, roots: &[Ref]) -> Result<String, std::fmt::Error> {
        use std::fmt::Write as _;

        let mut dot = String::new();
        writeln!(dot, "digraph fdd {{")?;
        writeln!(dot, "node [shape=circle];")?;

        let all_nodes = self.descendants(roots.iter().copied());

        // Leaves
        writeln!(dot, "{{ rank=sink")?;
        for &id in all_nodes.iter() {
            if let NodeKind::Leaf(actions) = self.node(id).kind() {
                writeln!(dot, "{} [shape=box, label=\"{}\"];", id.index(), actions)?;
            }
        }
        writeln!(dot, "}}")?;

        // Branches per level
        let mut levels = BTreeMap::<u8, Vec<Ref>>::new();
        for &id in all_nodes.iter() {
            if let NodeKind::Branch { test, .. } = self.node(id).kind() {
                levels.entry(self.order().rank(test.field)).or_default().push(id);
            }
        }
        for level in levels.values() {
            writeln!(dot, "{{ rank=same")?;
            for &id in level.iter() {
                let test = self.node(id).test().expect("branch");
                writeln!(dot, "{} [label=\"{}\"];", id.index(), test)?;
            }
            writeln!(dot, "}}")?;
        }

        // Edges
        for &id in all_nodes.iter() {
            if let NodeKind::Branch { tru, fls, .. } = self.node(id).kind() {
                writeln!(dot, "{} -> {};", id.index(), tru.index())?;
                writeln!(dot, "{} -> {} [style=dashed];", id.index(), fls.index())?;
            }
        }

        // Roots
        writeln!(dot, "{{ rank=source")?;
        for (i, root) in roots.iter().enumerate() {
            writeln!(dot, "r{} [shape=rect, label=\"{}\"];", i, root)?;
        }
        writeln!(dot, "}}")?;
        for (i, root) in roots.iter().enumerate() {
            writeln!(dot, "r{} -> {};", i, root.index())?;
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}
