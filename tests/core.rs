//! Core tests for the policy compiler.
//!
//! Covers the diagram algebra laws, compilation scenarios, table emission
//! soundness against the reference interpreter, and the options surface.

use std::collections::BTreeSet;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use fdd_rs::ast::{Policy, Pred};
use fdd_rs::compile::{of_policy, Compiler};
use fdd_rs::error::Error;
use fdd_rs::fdd::Fdd;
use fdd_rs::field::{Field, FieldOrder};
use fdd_rs::interp::{eval, Packet};
use fdd_rs::multitable::{to_multitable, Instruction, Layout};
use fdd_rs::options::{CompilerOptions, FieldOrderSpec};
use fdd_rs::reference::Ref;
use fdd_rs::table::{to_table, GroupTable, PseudoPort, RuleAction, WireAction};
use fdd_rs::value::Value;

fn vlan(v: u64) -> Pred {
    Pred::test(Field::Vlan, Value::Const(v))
}

fn eth_src(v: u64) -> Pred {
    Pred::test(Field::EthSrc, Value::Const(v))
}

fn out(port: u64) -> Policy {
    Policy::modify(Field::Location, Value::Const(port))
}

fn compile(fdd: &mut Fdd, p: &Policy) -> Ref {
    of_policy(fdd, p).expect("compiles")
}

// ─── Algebraic Laws ────────────────────────────────────────────────────────────

#[test]
fn union_identities() {
    let mut fdd = Fdd::default();
    let x = compile(&mut fdd, &Policy::seq(Policy::filter(vlan(1)), out(2)));

    assert_eq!(fdd.union(x, x), x);
    assert_eq!(fdd.union(x, Ref::DROP), x);
    assert_eq!(fdd.union(Ref::DROP, x), x);
}

#[test]
fn seq_identities() {
    let mut fdd = Fdd::default();
    let x = compile(&mut fdd, &Policy::seq(Policy::filter(vlan(1)), out(2)));
    let pred = compile(&mut fdd, &Policy::filter(eth_src(3)));

    assert_eq!(fdd.seq(Ref::ID, x), x);
    assert_eq!(fdd.seq(x, Ref::ID), x);
    assert_eq!(fdd.seq(Ref::DROP, x), Ref::DROP);
    assert_eq!(fdd.seq(pred, Ref::DROP), Ref::DROP);
}

#[test]
fn union_commutes() {
    let mut fdd = Fdd::default();
    let x = compile(&mut fdd, &Policy::seq(Policy::filter(vlan(1)), out(2)));
    let y = compile(&mut fdd, &Policy::seq(Policy::filter(eth_src(3)), out(4)));

    assert_eq!(fdd.union(x, y), fdd.union(y, x));
}

#[test]
fn union_and_seq_associate() {
    let mut fdd = Fdd::default();
    let x = compile(&mut fdd, &Policy::seq(Policy::filter(vlan(1)), out(2)));
    let y = compile(&mut fdd, &Policy::seq(Policy::filter(eth_src(3)), out(4)));
    let z = compile(&mut fdd, &out(5));

    let xy = fdd.union(x, y);
    let left = fdd.union(xy, z);
    let yz = fdd.union(y, z);
    let right = fdd.union(x, yz);
    assert_eq!(left, right);

    let f = compile(&mut fdd, &Policy::filter(vlan(1)));
    let g = compile(&mut fdd, &Policy::filter(eth_src(3)));
    let fg = fdd.seq(f, g);
    let left = fdd.seq(fg, z);
    let gz = fdd.seq(g, z);
    let right = fdd.seq(f, gz);
    assert_eq!(left, right);
}

#[test]
fn seq_distributes_over_union() {
    let mut fdd = Fdd::default();
    let x = compile(&mut fdd, &Policy::filter(vlan(1)));
    let y = compile(&mut fdd, &Policy::filter(vlan(2)));
    let z = compile(&mut fdd, &out(9));

    // (x ∪ y) ; z = x;z ∪ y;z
    let xy = fdd.union(x, y);
    let left = fdd.seq(xy, z);
    let xz = fdd.seq(x, z);
    let yz = fdd.seq(y, z);
    let right = fdd.union(xz, yz);
    assert_eq!(left, right);

    // z' ; (x ∪ y) = z';x ∪ z';y
    let zp = compile(&mut fdd, &Policy::filter(eth_src(7)));
    let left = fdd.seq(zp, xy);
    let zx = fdd.seq(zp, x);
    let zy = fdd.seq(zp, y);
    let right = fdd.union(zx, zy);
    assert_eq!(left, right);
}

#[test]
fn star_unfolds_both_ways() {
    let mut fdd = Fdd::default();
    let x = compile(
        &mut fdd,
        &Policy::seq(Policy::filter(vlan(1)), Policy::modify(Field::Vlan, Value::Const(2))),
    );

    let star = fdd.star(x);
    let tail = fdd.seq(x, star);
    assert_eq!(star, fdd.union(Ref::ID, tail));
    let head = fdd.seq(star, x);
    assert_eq!(star, fdd.union(Ref::ID, head));
}

#[test]
fn star_terminates_and_is_idempotent() {
    let mut fdd = Fdd::default();
    // vlan := (vlan + 1) mod 3, expressed as three guarded rewrites.
    let rotate = Policy::union_all([
        Policy::seq(Policy::filter(vlan(0)), Policy::modify(Field::Vlan, Value::Const(1))),
        Policy::seq(Policy::filter(vlan(1)), Policy::modify(Field::Vlan, Value::Const(2))),
        Policy::seq(Policy::filter(vlan(2)), Policy::modify(Field::Vlan, Value::Const(0))),
    ]);
    let x = compile(&mut fdd, &rotate);

    let star = fdd.star(x);
    // star(star(x)) = star(x)
    assert_eq!(fdd.star(star), star);

    // Semantics: from vlan = 0, the closure reaches all three values.
    let pkt = Packet::new().with(Field::Vlan, Value::Const(0));
    let outputs = eval(&fdd, &pkt, star);
    assert_eq!(outputs.len(), 3);
}

#[test]
fn canonicalization_gives_equal_handles() {
    let mut fdd = Fdd::default();

    // Same function, three different shapes.
    let a = compile(
        &mut fdd,
        &Policy::filter(Pred::and(vlan(1), eth_src(2))),
    );
    let b = compile(
        &mut fdd,
        &Policy::filter(Pred::and(eth_src(2), vlan(1))),
    );
    let c = compile(
        &mut fdd,
        &Policy::seq(Policy::filter(vlan(1)), Policy::filter(eth_src(2))),
    );
    assert_eq!(a, b);
    assert_eq!(b, c);

    // De Morgan.
    let d = compile(
        &mut fdd,
        &Policy::filter(Pred::neg(Pred::or(Pred::neg(vlan(1)), Pred::neg(eth_src(2))))),
    );
    assert_eq!(a, d);
}

#[test]
fn restrict_law() {
    let mut fdd = Fdd::default();
    let p = Policy::union(
        Policy::seq(Policy::filter(vlan(1)), out(2)),
        Policy::seq(Policy::filter(Pred::and(vlan(1), eth_src(3))), out(4)),
    );
    let x = compile(&mut fdd, &p);
    let restricted = fdd.restrict(Field::Vlan, Value::Const(1), x);

    for eth in 0..5u64 {
        let pkt = Packet::new()
            .with(Field::Vlan, Value::Const(1))
            .with(Field::EthSrc, Value::Const(eth));
        assert_eq!(eval(&fdd, &pkt, restricted), eval(&fdd, &pkt, x));
    }
}

// ─── Fuzzed Round-Trip ─────────────────────────────────────────────────────────

/// Denotational semantics of a link-free policy, used as ground truth.
fn denote(policy: &Policy, pkt: &Packet) -> BTreeSet<Packet> {
    match policy {
        Policy::Filter(pred) => {
            if denote_pred(pred, pkt) {
                BTreeSet::from([pkt.clone()])
            } else {
                BTreeSet::new()
            }
        }
        Policy::Mod(field, value) => {
            let mut out = pkt.clone();
            out.set(*field, value.clone());
            BTreeSet::from([out])
        }
        Policy::Union(a, b) => {
            let mut outs = denote(a, pkt);
            outs.extend(denote(b, pkt));
            outs
        }
        Policy::Seq(a, b) => denote(a, pkt)
            .iter()
            .flat_map(|mid| denote(b, mid))
            .collect(),
        Policy::Star(p) => {
            let mut outs = BTreeSet::from([pkt.clone()]);
            loop {
                let step: BTreeSet<Packet> =
                    outs.iter().flat_map(|q| denote(p, q)).collect();
                let before = outs.len();
                outs.extend(step);
                if outs.len() == before {
                    return outs;
                }
            }
        }
        Policy::Link { .. } => unreachable!("links are lowered before evaluation"),
    }
}

fn denote_pred(pred: &Pred, pkt: &Packet) -> bool {
    match pred {
        Pred::True => true,
        Pred::False => false,
        Pred::Test(field, value) => pkt
            .get(*field)
            .is_some_and(|v| v.subset_eq(value)),
        Pred::Neg(p) => !denote_pred(p, pkt),
        Pred::And(a, b) => denote_pred(a, pkt) && denote_pred(b, pkt),
        Pred::Or(a, b) => denote_pred(a, pkt) || denote_pred(b, pkt),
    }
}

fn random_pred(rng: &mut ChaCha8Rng, depth: usize) -> Pred {
    if depth == 0 {
        return match rng.gen_range(0..4) {
            0 => Pred::True,
            1 => Pred::False,
            2 => vlan(rng.gen_range(0..3)),
            _ => eth_src(rng.gen_range(0..3)),
        };
    }
    match rng.gen_range(0..3) {
        0 => Pred::neg(random_pred(rng, depth - 1)),
        1 => Pred::and(random_pred(rng, depth - 1), random_pred(rng, depth - 1)),
        _ => Pred::or(random_pred(rng, depth - 1), random_pred(rng, depth - 1)),
    }
}

/// Random policies testing vlan/ethsrc and writing only the output port,
/// so strict table emission is always possible.
fn random_policy(rng: &mut ChaCha8Rng, depth: usize) -> Policy {
    if depth == 0 {
        return if rng.gen_bool(0.5) {
            Policy::filter(random_pred(rng, 1))
        } else {
            out(rng.gen_range(0..3))
        };
    }
    match rng.gen_range(0..4) {
        0 => Policy::union(random_policy(rng, depth - 1), random_policy(rng, depth - 1)),
        1 => Policy::seq(random_policy(rng, depth - 1), random_policy(rng, depth - 1)),
        2 => Policy::star(random_policy(rng, depth - 1)),
        _ => Policy::filter(random_pred(rng, depth)),
    }
}

fn random_packet(rng: &mut ChaCha8Rng) -> Packet {
    Packet::new()
        .with(Field::Vlan, Value::Const(rng.gen_range(0..3)))
        .with(Field::EthSrc, Value::Const(rng.gen_range(0..3)))
        .with(Field::Location, Value::Const(rng.gen_range(0..3)))
}

#[test]
fn compiled_diagrams_match_denotational_semantics() {
    let mut rng = ChaCha8Rng::seed_from_u64(0xF00D);
    for _ in 0..200 {
        let policy = random_policy(&mut rng, 3);
        let mut fdd = Fdd::default();
        let r = compile(&mut fdd, &policy);
        for _ in 0..8 {
            let pkt = random_packet(&mut rng);
            assert_eq!(
                eval(&fdd, &pkt, r),
                denote(&policy, &pkt),
                "policy {} on {:?}",
                policy,
                pkt
            );
        }
    }
}

/// First-match rule application, resolving group references.
fn apply_rules(
    rules: &[fdd_rs::table::FlowRule],
    gt: &GroupTable,
    pkt: &Packet,
) -> BTreeSet<Packet> {
    let matched = rules.iter().find(|rule| {
        rule.pattern
            .iter()
            .all(|(f, v)| pkt.get(*f).is_some_and(|pv| pv.subset_eq(v)))
    });
    let buckets: Vec<_> = match matched {
        None => return BTreeSet::new(),
        Some(rule) => match &rule.action {
            RuleAction::Direct(buckets) => buckets.clone(),
            RuleAction::Group(id) => gt.entries()[*id as usize].buckets.clone(),
        },
    };
    buckets
        .iter()
        .map(|bucket| {
            let mut out = pkt.clone();
            for wa in bucket {
                match wa {
                    WireAction::SetField(field, value) => out.set(*field, value.clone()),
                    WireAction::Output(PseudoPort::Physical(port)) => {
                        out.set(Field::Location, Value::Const(*port))
                    }
                    WireAction::Output(PseudoPort::Pipe(name)) => {
                        out.set(Field::Location, Value::Pipe(name.clone()))
                    }
                    WireAction::Output(PseudoPort::Query(name)) => {
                        out.set(Field::Location, Value::Query(name.clone()))
                    }
                }
            }
            out
        })
        .collect()
}

#[test]
fn tables_are_sound_for_fuzzed_policies() {
    let mut rng = ChaCha8Rng::seed_from_u64(0xBEEF);
    let options = CompilerOptions::default();
    for _ in 0..150 {
        let policy = random_policy(&mut rng, 3);
        let mut fdd = Fdd::default();
        let r = compile(&mut fdd, &policy);
        let mut gt = GroupTable::new();
        let rules = to_table(&mut fdd, 0, r, &options, Some(&mut gt)).expect("emits");

        for _ in 0..8 {
            let pkt = random_packet(&mut rng);
            assert_eq!(
                apply_rules(&rules, &gt, &pkt),
                eval(&fdd, &pkt, r),
                "policy {} on {:?}",
                policy,
                pkt
            );
        }
    }
}

// ─── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn scenario_single_test_filter() {
    // S1: one rule matching EthSrc = 1 with the identity action; the drop
    // tail is implied by the switch default.
    let p = Policy::filter(eth_src(1));
    let mut fdd = Fdd::default();
    let r = compile(&mut fdd, &p);

    let options = CompilerOptions {
        remove_tail_drops: true,
        ..Default::default()
    };
    let rules = to_table(&mut fdd, 0, r, &options, None).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].pattern.get(Field::EthSrc), Some(&Value::Const(1)));
    assert_eq!(rules[0].action, RuleAction::Direct(vec![vec![]]));
}

#[test]
fn scenario_port_swap() {
    // S2: two disjoint rules, either order.
    let p = Policy::union(
        Policy::seq(Policy::filter(Pred::test(Field::Location, Value::Const(1))), out(2)),
        Policy::seq(Policy::filter(Pred::test(Field::Location, Value::Const(2))), out(1)),
    );
    let mut fdd = Fdd::default();
    let r = compile(&mut fdd, &p);

    let options = CompilerOptions {
        remove_tail_drops: true,
        ..Default::default()
    };
    let rules = to_table(&mut fdd, 0, r, &options, None).unwrap();
    assert_eq!(rules.len(), 2);
    for (match_port, out_port) in [(1u64, 2u64), (2, 1)] {
        let rule = rules
            .iter()
            .find(|r| r.pattern.get(Field::Location) == Some(&Value::Const(match_port)))
            .expect("swap rule");
        assert_eq!(
            rule.action,
            RuleAction::Direct(vec![vec![WireAction::Output(PseudoPort::Physical(out_port))]])
        );
    }
}

#[test]
fn scenario_star_of_mod_stabilizes_small() {
    // S3: star(vlan := 7) = id ∪ vlan := 7, within three nodes.
    let p = Policy::star(Policy::modify(Field::Vlan, Value::Const(7)));
    let mut fdd = Fdd::default();
    let r = compile(&mut fdd, &p);

    let modify = compile(&mut fdd, &Policy::modify(Field::Vlan, Value::Const(7)));
    let expected = fdd.union(Ref::ID, modify);
    assert_eq!(r, expected);
    assert!(fdd.size(r) <= 3);
}

#[test]
fn scenario_restrict_discharges_guard() {
    // S4: restricting the compiled guard recovers the body.
    let p = Policy::seq(
        Policy::filter(Pred::test(Field::EthType, Value::Const(0x800))),
        Policy::modify(Field::Vlan, Value::Const(100)),
    );
    let mut fdd = Fdd::default();
    let r = compile(&mut fdd, &p);

    let restricted = fdd.restrict(Field::EthType, Value::Const(0x800), r);
    let body = compile(&mut fdd, &Policy::modify(Field::Vlan, Value::Const(100)));
    assert_eq!(restricted, body);
}

#[test]
fn scenario_negation_of_non_predicate() {
    // S5: negating a diagram with a modification leaf is a type error.
    let mut fdd = Fdd::default();
    let r = compile(&mut fdd, &Policy::modify(Field::Vlan, Value::Const(1)));
    assert!(matches!(
        fdd.negate(r),
        Err(Error::NonPredicateNegation { .. })
    ));
}

#[test]
fn scenario_three_slab_pipeline() {
    // S6: the layout [[EthSrc], [Vlan], [Location]] splits a three-field
    // policy into three tables; table 0 forwards through GotoTable and the
    // pipeline reproduces the single-table semantics.
    let mut fields = vec![Field::EthSrc, Field::Vlan, Field::Location];
    let rest: Vec<Field> = Field::ALL
        .iter()
        .copied()
        .filter(|f| !fields.contains(f))
        .collect();
    fields.extend(rest);
    let order = FieldOrder::from_list(&fields).unwrap();

    let p = Policy::seq_all([
        Policy::filter(eth_src(1)),
        Policy::filter(vlan(2)),
        Policy::filter(Pred::test(Field::Location, Value::Const(3))),
        out(9),
    ]);
    let mut fdd = Fdd::new(order);
    let r = compile(&mut fdd, &p);

    let layout = Layout::new(vec![
        vec![Field::EthSrc],
        vec![Field::Vlan],
        vec![Field::Location],
    ]);
    let mut gt = GroupTable::new();
    let mt = to_multitable(&mut fdd, 0, &layout, r, &CompilerOptions::default(), &mut gt).unwrap();

    assert_eq!(mt.tables.len(), 3);
    // Every matched packet in table 0 continues into table 1.
    assert!(mt.tables[0].iter().any(|rule| matches!(
        rule.instruction,
        Instruction::Goto(flow_id) if flow_id.table == 1
    )));
}

// ─── Sessions & Options ────────────────────────────────────────────────────────

#[test]
fn compiler_session_specializes_and_emits() {
    let p = Policy::union(
        Policy::seq(
            Policy::filter(Pred::and(
                Pred::test(Field::Switch, Value::Const(1)),
                vlan(10),
            )),
            out(1),
        ),
        Policy::seq(
            Policy::filter(Pred::and(
                Pred::test(Field::Switch, Value::Const(2)),
                vlan(10),
            )),
            out(2),
        ),
    );

    let mut compiler = Compiler::new(CompilerOptions::default(), &p).unwrap();
    let r1 = compiler.compile_local(&p, Some(1)).unwrap();
    let r2 = compiler.compile_local(&p, Some(2)).unwrap();
    assert_ne!(r1, r2);

    let options = compiler.options().clone();
    let rules = to_table(compiler.fdd_mut(), 1, r1, &options, None).unwrap();
    let forward = rules.iter().find(|r| !r.action.is_drop()).expect("forward rule");
    assert_eq!(forward.pattern.get(Field::Vlan), Some(&Value::Const(10)));
}

#[test]
fn static_field_order_changes_diagram_shape() {
    let p = Policy::filter(Pred::and(vlan(1), eth_src(2)));

    let mut order = vec![Field::EthSrc];
    order.extend(Field::ALL.iter().filter(|f| **f != Field::EthSrc));
    let options = CompilerOptions {
        field_order: FieldOrderSpec::Static(order),
        ..Default::default()
    };

    let mut compiler = Compiler::new(options, &p).unwrap();
    let r = compiler.compile_local(&p, None).unwrap();
    let (test, _, _) = compiler.fdd().branch(r).expect("branch");
    assert_eq!(test.field, Field::EthSrc);
}

#[test]
fn global_compilation_lowers_links() {
    let topo = Policy::link(1, 2, 3, 4);
    let mut compiler = Compiler::new(CompilerOptions::default(), &topo).unwrap();

    assert!(matches!(
        compiler.compile_local(&topo, None),
        Err(Error::NonLocal { .. })
    ));
    let r = compiler.compile_global(&topo, None).unwrap();
    assert_ne!(r, Ref::DROP);

    // At switch 1 port 2, the packet is rewritten to switch 3 port 4.
    let pkt = Packet::new()
        .with(Field::Switch, Value::Const(1))
        .with(Field::Location, Value::Const(2));
    let outputs = eval(compiler.fdd(), &pkt, r);
    let expected = Packet::new()
        .with(Field::Switch, Value::Const(3))
        .with(Field::Location, Value::Const(4));
    assert_eq!(outputs, BTreeSet::from([expected]));
}
