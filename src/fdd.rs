//! The forwarding decision diagram manager.
//!
//! All diagram construction and algebra goes through the [`Fdd`] manager:
//! it owns the intern table (hash consing), the per-operator memo caches,
//! and the field order. Equal structures share one handle, so handle
//! equality is extensional equality and every operator can memoize on
//! handles alone.
//!
//! # Canonical form
//!
//! - Along any root-to-leaf path, tests strictly increase in the
//!   `(field rank, value)` order; a field repeats only across false edges
//!   with pairwise-distinct values.
//! - No branch has identical children.
//! - The paths into any leaf partition exactly the packets the policy maps
//!   to that leaf's action set.
//!
//! # Basic usage
//!
//! ```
//! use fdd_rs::action::{Action, ActionSet};
//! use fdd_rs::fdd::Fdd;
//! use fdd_rs::field::Field;
//! use fdd_rs::reference::Ref;
//! use fdd_rs::value::{Test, Value};
//!
//! let mut fdd = Fdd::default();
//!
//! // vlan = 7 ? id : drop
//! let test = Test::new(Field::Vlan, Value::Const(7));
//! let filter = fdd.mk(test, Ref::ID, Ref::DROP);
//!
//! // vlan := 7
//! let modify = fdd.leaf(ActionSet::singleton(Action::set(Field::Vlan, Value::Const(7))));
//!
//! let either = fdd.union(filter, modify);
//! assert_eq!(fdd.union(either, filter), either); // idempotent
//! ```

use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt::Debug;

use hashbrown::{HashMap, HashSet};
use log::debug;

use crate::action::{Action, ActionSet};
use crate::error::{Error, Result};
use crate::field::{Field, FieldOrder};
use crate::node::{Node, NodeKind};
use crate::options::CachePrepare;
use crate::reference::Ref;
use crate::value::{Test, Value};

/// Memo table for one binary diagram operator.
///
/// Operator results are keyed by the two argument handles. Handles are
/// dense interned indices, so the pair packs losslessly into one word:
/// the slot index is a Fibonacci mix of that word, and a probe is two
/// `u32` compares. A colliding insert simply evicts the resident entry
/// --- every operator is a pure function of its arguments, so the worst
/// case is recomputing a result, never a wrong one. Direct mapping also
/// keeps `clear` allocation-free for the cache lifecycle option.
struct BinopCache {
    slots: Vec<Option<(Ref, Ref, Ref)>>,
    shift: u32,
    hits: Cell<usize>,
    misses: Cell<usize>,
}

impl BinopCache {
    /// Create a table of `2^bits` slots.
    fn new(bits: u32) -> Self {
        BinopCache {
            slots: vec![None; 1usize << bits],
            shift: 64 - bits,
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    fn slot(&self, x: Ref, y: Ref) -> usize {
        let packed = ((x.index() as u64) << 32) | y.index() as u64;
        (packed.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> self.shift) as usize
    }

    fn lookup(&self, x: Ref, y: Ref) -> Option<Ref> {
        match self.slots[self.slot(x, y)] {
            Some((a, b, res)) if a == x && b == y => {
                self.hits.set(self.hits.get() + 1);
                Some(res)
            }
            _ => {
                self.misses.set(self.misses.get() + 1);
                None
            }
        }
    }

    fn store(&mut self, x: Ref, y: Ref, res: Ref) {
        let slot = self.slot(x, y);
        self.slots[slot] = Some((x, y, res));
    }

    fn clear(&mut self) {
        self.slots.fill(None);
    }

    fn hits(&self) -> usize {
        self.hits.get()
    }

    fn misses(&self) -> usize {
        self.misses.get()
    }
}

pub struct Fdd {
    order: FieldOrder,
    nodes: Vec<Node>,
    table: HashMap<Node, Ref>,
    union_cache: BinopCache,
    seq_cache: BinopCache,
    prod_cache: BinopCache,
}

const CACHE_BITS: u32 = 16;

impl Fdd {
    pub fn new(order: FieldOrder) -> Self {
        let mut fdd = Self {
            order,
            nodes: Vec::new(),
            table: HashMap::new(),
            union_cache: BinopCache::new(CACHE_BITS),
            seq_cache: BinopCache::new(CACHE_BITS),
            prod_cache: BinopCache::new(CACHE_BITS),
        };
        fdd.seed_terminals();
        fdd
    }

    fn seed_terminals(&mut self) {
        let drop = self.intern(Node::leaf(ActionSet::drop()));
        let id = self.intern(Node::leaf(ActionSet::id()));
        assert_eq!(drop, Ref::DROP);
        assert_eq!(id, Ref::ID);
    }

    pub fn order(&self) -> &FieldOrder {
        &self.order
    }

    /// Number of interned nodes (live and dead alike).
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for Fdd {
    fn default() -> Self {
        Fdd::new(FieldOrder::default_order())
    }
}

impl Debug for Fdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fdd")
            .field("nodes", &self.nodes.len())
            .field("union_cache_hits", &self.union_cache.hits())
            .field("union_cache_misses", &self.union_cache.misses())
            .field("seq_cache_hits", &self.seq_cache.hits())
            .finish()
    }
}

// ─── Construction ──────────────────────────────────────────────────────────

impl Fdd {
    pub(crate) fn node(&self, r: Ref) -> &Node {
        &self.nodes[r.index()]
    }

    /// The leaf action set, if `r` is a leaf.
    pub fn leaf_actions(&self, r: Ref) -> Option<&ActionSet> {
        match self.node(r).kind() {
            NodeKind::Leaf(actions) => Some(actions),
            NodeKind::Branch { .. } => None,
        }
    }

    /// Root test and children, if `r` is a branch.
    pub fn branch(&self, r: Ref) -> Option<(&Test, Ref, Ref)> {
        match self.node(r).kind() {
            NodeKind::Leaf(_) => None,
            NodeKind::Branch { test, tru, fls } => Some((test, *tru, *fls)),
        }
    }

    fn intern(&mut self, node: Node) -> Ref {
        if let Some(&r) = self.table.get(&node) {
            return r;
        }
        let r = Ref::new(self.nodes.len() as u32);
        self.nodes.push(node.clone());
        self.table.insert(node, r);
        debug!("intern: created new node {}", r);
        r
    }

    /// Intern a terminal with the given action set.
    pub fn leaf(&mut self, actions: ActionSet) -> Ref {
        self.intern(Node::leaf(actions))
    }

    /// The hash-consing constructor.
    ///
    /// Reduces `mk(t, c, c)` to `c`, and elides a branch whose positive
    /// behavior coincides with the false child's same-field continuation
    /// (the test decides nothing). Otherwise interns the branch. The
    /// caller must guarantee both children's root tests are strictly
    /// greater than `test`; use [`Fdd::cond`] when that does not hold.
    pub fn mk(&mut self, test: Test, tru: Ref, fls: Ref) -> Ref {
        if tru == fls {
            return tru;
        }
        debug_assert!(self.root_above(&test, tru), "mk: unordered true child");
        debug_assert!(self.root_above(&test, fls), "mk: unordered false child");
        if self.chain_positive(fls, &test) == tru {
            return fls;
        }
        self.intern(Node::branch(test, tru, fls))
    }

    /// The order-safe constructor: `if test then tru else fls`, correct
    /// even when a child's root test is not greater than `test`. Falls
    /// back to `union(test · tru, ¬test · fls)` in that case.
    pub fn cond(&mut self, test: Test, tru: Ref, fls: Ref) -> Ref {
        if tru == fls {
            return tru;
        }
        if self.root_strictly_below(&test, tru) && self.root_above(&test, fls) {
            return self.mk(test, tru, fls);
        }
        let pos = self.mk(test.clone(), Ref::ID, Ref::DROP);
        let neg = self.mk(test, Ref::DROP, Ref::ID);
        let then_part = self.prod(pos, tru);
        let else_part = self.prod(neg, fls);
        self.union(then_part, else_part)
    }

    /// A single-test predicate diagram.
    pub fn atom(&mut self, test: Test) -> Ref {
        self.mk(test, Ref::ID, Ref::DROP)
    }

    fn test_cmp(&self, a: &Test, b: &Test) -> Ordering {
        self.order
            .rank(a.field)
            .cmp(&self.order.rank(b.field))
            .then_with(|| a.value.cmp(&b.value))
    }

    /// Is `n` a leaf, or rooted strictly below `test` (lexicographically)?
    fn root_above(&self, test: &Test, n: Ref) -> bool {
        match self.node(n).test() {
            None => true,
            Some(root) => self.test_cmp(test, root) == Ordering::Less,
        }
    }

    /// Like `root_above`, but additionally requires a true-side child not
    /// to test the same field at all (pinned by the parent's true edge).
    fn root_strictly_below(&self, test: &Test, n: Ref) -> bool {
        match self.node(n).test() {
            None => true,
            Some(root) => root.field != test.field && self.test_cmp(test, root) == Ordering::Less,
        }
    }
}

// ─── Cofactors and the apply engine ────────────────────────────────────────

impl Fdd {
    /// Cofactors of `n` with respect to the minimum test `t` of the current
    /// apply step.
    ///
    /// When `n` branches on the same field with a different (necessarily
    /// greater) value, the positive cofactor resolves the whole same-field
    /// false-edge chain: under `field = t.value`, each chained test is
    /// implied (`t.value ⊆ v'`) or refuted (disjoint). The negative
    /// cofactor leaves `n` intact --- `field ≠ t.value` decides nothing.
    fn cofactors(&self, n: Ref, t: &Test) -> (Ref, Ref) {
        match self.node(n).kind() {
            NodeKind::Leaf(_) => (n, n),
            NodeKind::Branch { test, tru, fls } => {
                if test == t {
                    (*tru, *fls)
                } else if test.field != t.field {
                    (n, n)
                } else {
                    (self.chain_positive(n, t), n)
                }
            }
        }
    }

    fn chain_positive(&self, mut n: Ref, t: &Test) -> Ref {
        while let NodeKind::Branch { test, tru, fls } = self.node(n).kind() {
            if test.field != t.field {
                break;
            }
            if t.value.subset_eq(&test.value) {
                n = *tru;
            } else {
                debug_assert!(t.value.disjoint(&test.value));
                n = *fls;
            }
        }
        n
    }

    /// The minimum root test of two nodes, at least one of which branches.
    fn min_test(&self, x: Ref, y: Ref) -> Test {
        match (self.node(x).test(), self.node(y).test()) {
            (Some(a), Some(b)) => {
                if self.test_cmp(a, b) == Ordering::Greater {
                    b.clone()
                } else {
                    a.clone()
                }
            }
            (Some(a), None) => a.clone(),
            (None, Some(b)) => b.clone(),
            (None, None) => unreachable!("min_test on two leaves"),
        }
    }

    /// Parallel composition: leaf-combine is action-set union.
    pub fn union(&mut self, x: Ref, y: Ref) -> Ref {
        if x == y {
            return x;
        }
        if x.is_drop() {
            return y;
        }
        if y.is_drop() {
            return x;
        }
        // Commutative: normalize the cache key.
        let key = if x <= y { (x, y) } else { (y, x) };
        if let Some(res) = self.union_cache.lookup(key.0, key.1) {
            return res;
        }

        let res = if let (NodeKind::Leaf(a), NodeKind::Leaf(b)) =
            (self.node(x).kind(), self.node(y).kind())
        {
            let combined = a.par(b);
            self.leaf(combined)
        } else {
            let t = self.min_test(x, y);
            let (xt, xf) = self.cofactors(x, &t);
            let (yt, yf) = self.cofactors(y, &t);
            let tru = self.union(xt, yt);
            let fls = self.union(xf, yf);
            self.mk(t, tru, fls)
        };
        debug!("union({}, {}) -> {}", x, y, res);

        self.union_cache.store(key.0, key.1, res);
        res
    }

    /// Predicate product: `p` must be a predicate diagram; the result
    /// restricts `t` to the packets `p` accepts. Internal building block
    /// for [`Fdd::cond`] and query extraction.
    pub(crate) fn prod(&mut self, p: Ref, t: Ref) -> Ref {
        if p.is_id() || t.is_drop() {
            return t;
        }
        if p.is_drop() {
            return Ref::DROP;
        }
        if t.is_id() {
            return p;
        }
        if let Some(res) = self.prod_cache.lookup(p, t) {
            return res;
        }

        // A predicate's leaves are the interned terminals, so after the
        // shortcuts above `p` is a branch and `min_test` is well-defined.
        debug_assert!(!p.is_terminal());
        let m = self.min_test(p, t);
        let (pt, pf) = self.cofactors(p, &m);
        let (tt, tf) = self.cofactors(t, &m);
        let tru = self.prod(pt, tt);
        let fls = self.prod(pf, tf);
        let res = self.mk(m, tru, fls);

        self.prod_cache.store(p, t, res);
        res
    }
}

// ─── Sequential composition ────────────────────────────────────────────────

impl Fdd {
    /// Sequential composition `x ; y`.
    ///
    /// At each leaf of `x`, every action specializes `y` (tests on assigned
    /// fields become constants), is prepended to the specialized diagram,
    /// and the per-action results are unioned. Branches rebuild with
    /// [`Fdd::cond`] because the specialized tail may be rooted on an
    /// earlier field than the branch itself.
    pub fn seq(&mut self, x: Ref, y: Ref) -> Ref {
        if x.is_id() {
            return y;
        }
        if y.is_id() {
            return x;
        }
        if x.is_drop() || y.is_drop() {
            return Ref::DROP;
        }
        if let Some(res) = self.seq_cache.lookup(x, y) {
            return res;
        }

        let res = match self.node(x).kind() {
            NodeKind::Leaf(actions) => {
                let actions = actions.clone();
                self.seq_leaf(&actions, y)
            }
            NodeKind::Branch { test, tru, fls } => {
                let (test, tru, fls) = (test.clone(), *tru, *fls);
                let tru = self.seq(tru, y);
                let fls = self.seq(fls, y);
                self.cond(test, tru, fls)
            }
        };
        debug!("seq({}, {}) -> {}", x, y, res);

        self.seq_cache.store(x, y, res);
        res
    }

    fn seq_leaf(&mut self, actions: &ActionSet, y: Ref) -> Ref {
        let mut acc = Ref::DROP;
        for a in actions.iter() {
            let specialized = self.restrict_by_action(y, a);
            let grafted = self.prepend(a, specialized);
            acc = self.union(acc, grafted);
        }
        acc
    }

    /// Map every leaf `T` of `z` to `{ a ; t | t ∈ T }`.
    fn prepend(&mut self, a: &Action, z: Ref) -> Ref {
        let mut memo = HashMap::new();
        self.prepend_rec(a, z, &mut memo)
    }

    fn prepend_rec(&mut self, a: &Action, z: Ref, memo: &mut HashMap<Ref, Ref>) -> Ref {
        if let Some(&res) = memo.get(&z) {
            return res;
        }
        let res = match self.node(z).kind() {
            NodeKind::Leaf(t) => {
                let mapped = ActionSet::seq_set(a, t);
                self.leaf(mapped)
            }
            NodeKind::Branch { test, tru, fls } => {
                let (test, tru, fls) = (test.clone(), *tru, *fls);
                let tru = self.prepend_rec(a, tru, memo);
                let fls = self.prepend_rec(a, fls, memo);
                self.mk(test, tru, fls)
            }
        };
        memo.insert(z, res);
        res
    }

    fn restrict_by_action(&mut self, y: Ref, a: &Action) -> Ref {
        let mut memo = HashMap::new();
        self.restrict_rec(y, a, &mut memo)
    }

    fn restrict_rec(&mut self, y: Ref, a: &Action, memo: &mut HashMap<Ref, Ref>) -> Ref {
        if let Some(&res) = memo.get(&y) {
            return res;
        }
        let res = match self.node(y).kind() {
            NodeKind::Leaf(_) => y,
            NodeKind::Branch { test, tru, fls } => {
                let (test, tru, fls) = (test.clone(), *tru, *fls);
                match a.get(test.field).cloned() {
                    Some(w) if w.subset_eq(&test.value) => self.restrict_rec(tru, a, memo),
                    Some(w) if w.disjoint(&test.value) => self.restrict_rec(fls, a, memo),
                    // Partial prefix overlap: the assignment carries the
                    // whole prefix, so the narrower test stays undecided.
                    _ => {
                        let tru = self.restrict_rec(tru, a, memo);
                        let fls = self.restrict_rec(fls, a, memo);
                        self.cond(test, tru, fls)
                    }
                }
            }
        };
        memo.insert(y, res);
        res
    }

    /// Partial evaluation under the assumption `field = value`.
    pub fn restrict(&mut self, field: Field, value: Value, x: Ref) -> Ref {
        let binding = Action::set(field, value);
        self.restrict_by_action(x, &binding)
    }
}

// ─── Star, negation, dedup ─────────────────────────────────────────────────

impl Fdd {
    /// Kleene star by incremental fixed point.
    ///
    /// Terminates because the diagrams reachable from `id` under
    /// `union(id, seq(·, x))` form a finite lattice and the iteration is
    /// monotone; convergence is detected by handle equality.
    pub fn star(&mut self, x: Ref) -> Ref {
        let mut acc = Ref::ID;
        let mut power = Ref::ID;
        let mut iterations = 0usize;
        loop {
            power = self.seq(power, x);
            let next = self.union(acc, power);
            iterations += 1;
            if next == acc {
                debug!("star({}) converged after {} iterations -> {}", x, iterations, acc);
                return acc;
            }
            acc = next;
        }
    }

    /// Boolean negation of a predicate diagram (`id` and `drop` leaves
    /// swapped). Errors on any other leaf.
    pub fn negate(&mut self, x: Ref) -> Result<Ref> {
        let mut memo = HashMap::new();
        self.negate_rec(x, &mut memo)
    }

    fn negate_rec(&mut self, x: Ref, memo: &mut HashMap<Ref, Ref>) -> Result<Ref> {
        if let Some(&res) = memo.get(&x) {
            return Ok(res);
        }
        let res = match self.node(x).kind() {
            NodeKind::Leaf(actions) => {
                if actions.is_drop() {
                    Ref::ID
                } else if actions.is_id() {
                    Ref::DROP
                } else {
                    return Err(Error::NonPredicateNegation { node: x });
                }
            }
            NodeKind::Branch { test, tru, fls } => {
                let (test, tru, fls) = (test.clone(), *tru, *fls);
                let tru = self.negate_rec(tru, memo)?;
                let fls = self.negate_rec(fls, memo)?;
                self.mk(test, tru, fls)
            }
        };
        memo.insert(x, res);
        Ok(res)
    }

    /// Is every leaf of `x` either `id` or `drop`?
    pub fn is_predicate(&self, x: Ref) -> bool {
        self.descendants([x])
            .into_iter()
            .all(|r| match self.node(r).kind() {
                NodeKind::Leaf(actions) => actions.is_drop() || actions.is_id(),
                NodeKind::Branch { .. } => true,
            })
    }

    /// Remove leaf assignments already pinned by an exact test on the path.
    ///
    /// `vlan = 7 ? {vlan := 7, port := 2} : ...` canonicalizes the true
    /// branch to `{port := 2}`; two syntactically different but
    /// path-equivalent action sets then share a leaf.
    pub fn dedup(&mut self, x: Ref) -> Ref {
        let mut path = Vec::new();
        self.dedup_rec(x, &mut path)
    }

    fn dedup_rec(&mut self, x: Ref, path: &mut Vec<(Field, Value)>) -> Ref {
        match self.node(x).kind() {
            NodeKind::Leaf(actions) => {
                let actions = actions.clone();
                let mut reduced = ActionSet::drop();
                for action in actions.iter() {
                    let mut action = action.clone();
                    for (field, value) in path.iter() {
                        if action.get(*field) == Some(value) {
                            action.remove(*field);
                        }
                    }
                    reduced.insert(action);
                }
                self.leaf(reduced)
            }
            NodeKind::Branch { test, tru, fls } => {
                let (test, tru, fls) = (test.clone(), *tru, *fls);
                let pins = test.value.is_exact();
                if pins {
                    path.push((test.field, test.value.clone()));
                }
                let tru = self.dedup_rec(tru, path);
                if pins {
                    path.pop();
                }
                let fls = self.dedup_rec(fls, path);
                self.cond(test, tru, fls)
            }
        }
    }
}

// ─── Inspection ────────────────────────────────────────────────────────────

impl Fdd {
    /// All nodes reachable from `roots`, without duplicates.
    pub fn descendants(&self, roots: impl IntoIterator<Item = Ref>) -> Vec<Ref> {
        let mut seen = HashSet::new();
        let mut stack: Vec<Ref> = roots.into_iter().collect();
        let mut out = Vec::new();
        while let Some(r) = stack.pop() {
            if !seen.insert(r) {
                continue;
            }
            out.push(r);
            if let NodeKind::Branch { tru, fls, .. } = self.node(r).kind() {
                stack.push(*tru);
                stack.push(*fls);
            }
        }
        out
    }

    /// Count of reachable nodes (leaves included).
    pub fn size(&self, x: Ref) -> usize {
        self.descendants([x]).len()
    }

    /// `(shared, expanded)`: reachable node count versus the node count of
    /// the same diagram expanded to a tree.
    pub fn compression_ratio(&self, x: Ref) -> (usize, u64) {
        let shared = self.size(x);
        let mut memo = HashMap::new();
        let expanded = self.expanded_size(x, &mut memo);
        (shared, expanded)
    }

    fn expanded_size(&self, x: Ref, memo: &mut HashMap<Ref, u64>) -> u64 {
        if let Some(&n) = memo.get(&x) {
            return n;
        }
        let n = match self.node(x).kind() {
            NodeKind::Leaf(_) => 1,
            NodeKind::Branch { tru, fls, .. } => {
                1 + self.expanded_size(*tru, memo) + self.expanded_size(*fls, memo)
            }
        };
        memo.insert(x, n);
        n
    }

    /// Nested `(test ? tru : fls)` textual form.
    pub fn to_string(&self, x: Ref) -> String {
        match self.node(x).kind() {
            NodeKind::Leaf(actions) => actions.to_string(),
            NodeKind::Branch { test, tru, fls } => {
                format!("({} ? {} : {})", test, self.to_string(*tru), self.to_string(*fls))
            }
        }
    }
}

// ─── Cache lifecycle ───────────────────────────────────────────────────────

impl Fdd {
    /// Apply the session retention policy before a compilation.
    ///
    /// `Empty` resets the manager (the distinguished leaves are re-interned
    /// at their fixed handles); `Preserve` clears the memo caches and
    /// evicts intern entries unreachable from the given root, keeping all
    /// existing handles valid; `Keep` does nothing.
    pub fn prepare(&mut self, prepare: &CachePrepare) {
        match prepare {
            CachePrepare::Keep => {}
            CachePrepare::Empty => {
                self.nodes.clear();
                self.table.clear();
                self.union_cache.clear();
                self.seq_cache.clear();
                self.prod_cache.clear();
                self.seed_terminals();
            }
            CachePrepare::Preserve(root) => {
                let root = Ref::new(*root);
                let keep: HashSet<Ref> = self
                    .descendants([root, Ref::DROP, Ref::ID])
                    .into_iter()
                    .collect();
                self.table.retain(|_, r| keep.contains(r));
                self.union_cache.clear();
                self.seq_cache.clear();
                self.prod_cache.clear();
            }
        }
    }
}
