//! Compilation from the policy AST to forwarding decision diagrams.
//!
//! [`of_policy`] is the structural recursion at the core; [`Compiler`]
//! wraps it in a session that owns the diagram manager, resolves the field
//! order from the options, applies the cache retention policy, and handles
//! switch specialization and link lowering.

use log::debug;

use crate::action::{Action, ActionSet};
use crate::ast::{Policy, Pred};
use crate::error::{Error, Result};
use crate::fdd::Fdd;
use crate::field::Field;
use crate::options::CompilerOptions;
use crate::reference::Ref;
use crate::value::{Test, Value};

/// Compile a predicate to a diagram whose leaves are `id`/`drop`.
pub fn of_pred(fdd: &mut Fdd, pred: &Pred) -> Result<Ref> {
    match pred {
        Pred::True => Ok(Ref::ID),
        Pred::False => Ok(Ref::DROP),
        Pred::Test(field, value) => Ok(fdd.atom(Test::new(*field, value.clone()))),
        Pred::Neg(p) => {
            let inner = of_pred(fdd, p)?;
            fdd.negate(inner)
        }
        Pred::And(a, b) => {
            let a = of_pred(fdd, a)?;
            let b = of_pred(fdd, b)?;
            Ok(fdd.seq(a, b))
        }
        Pred::Or(a, b) => {
            let a = of_pred(fdd, a)?;
            let b = of_pred(fdd, b)?;
            Ok(fdd.union(a, b))
        }
    }
}

/// Compile a policy to a diagram. Fails with [`Error::NonLocal`] on any
/// `Link` --- links must be lowered first (see [`Compiler::compile_global`]).
pub fn of_policy(fdd: &mut Fdd, policy: &Policy) -> Result<Ref> {
    match policy {
        Policy::Filter(pred) => of_pred(fdd, pred),
        Policy::Mod(field, value) => {
            let action = Action::set(*field, value.clone());
            Ok(fdd.leaf(ActionSet::singleton(action)))
        }
        Policy::Union(a, b) => {
            let a = of_policy(fdd, a)?;
            let b = of_policy(fdd, b)?;
            Ok(fdd.union(a, b))
        }
        Policy::Seq(a, b) => {
            let a = of_policy(fdd, a)?;
            let b = of_policy(fdd, b)?;
            Ok(fdd.seq(a, b))
        }
        Policy::Star(p) => {
            let p = of_policy(fdd, p)?;
            Ok(fdd.star(p))
        }
        Policy::Link {
            src_switch,
            src_port,
            dst_switch,
            dst_port,
        } => Err(Error::NonLocal {
            src_switch: *src_switch,
            src_port: *src_port,
            dst_switch: *dst_switch,
            dst_port: *dst_port,
        }),
    }
}

/// Lower every `Link(s1, p1, s2, p2)` to the one-hop encoding
/// `filter (switch = s1 and location = p1); switch := s2; location := p2`.
pub fn lower_links(policy: &Policy) -> Policy {
    match policy {
        Policy::Filter(_) | Policy::Mod(_, _) => policy.clone(),
        Policy::Union(a, b) => Policy::union(lower_links(a), lower_links(b)),
        Policy::Seq(a, b) => Policy::seq(lower_links(a), lower_links(b)),
        Policy::Star(p) => Policy::star(lower_links(p)),
        Policy::Link {
            src_switch,
            src_port,
            dst_switch,
            dst_port,
        } => {
            let at_src = Pred::and(
                Pred::test(Field::Switch, Value::Const(*src_switch)),
                Pred::test(Field::Location, Value::Const(*src_port)),
            );
            Policy::seq_all([
                Policy::filter(at_src),
                Policy::modify(Field::Switch, Value::Const(*dst_switch)),
                Policy::modify(Field::Location, Value::Const(*dst_port)),
            ])
        }
    }
}

/// A compilation session: one diagram manager plus the options that shaped
/// it. Diagrams from different sessions must not be mixed --- the field
/// order is fixed per session.
pub struct Compiler {
    fdd: Fdd,
    options: CompilerOptions,
}

impl Compiler {
    /// Create a session. `Heuristic` field ordering is resolved against
    /// `policy`, the workload the session is meant for.
    pub fn new(options: CompilerOptions, policy: &Policy) -> Result<Compiler> {
        let order = options.resolve_field_order(&policy.test_counts())?;
        debug!("compiler session: field order {:?}", order.fields());
        Ok(Compiler {
            fdd: Fdd::new(order),
            options,
        })
    }

    pub fn fdd(&self) -> &Fdd {
        &self.fdd
    }

    pub fn fdd_mut(&mut self) -> &mut Fdd {
        &mut self.fdd
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compile a link-free policy, optionally specialized to one switch.
    pub fn compile_local(&mut self, policy: &Policy, switch: Option<u64>) -> Result<Ref> {
        self.fdd.prepare(&self.options.cache_prepare);

        let policy = match switch {
            Some(sw) => policy.specialize(sw),
            None => policy.clone(),
        };
        let policy = if self.options.optimize {
            policy.optimize()
        } else {
            policy
        };
        of_policy(&mut self.fdd, &policy)
    }

    /// Compile a policy that may contain links, by lowering them first.
    pub fn compile_global(&mut self, policy: &Policy, switch: Option<u64>) -> Result<Ref> {
        let lowered = lower_links(policy);
        self.compile_local(&lowered, switch)
    }
}
