//! # fdd-rs: a symbolic NetKAT policy compiler
//!
//! **`fdd-rs`** compiles algebraic network policies into per-switch
//! OpenFlow-style forwarding tables, through a canonical decision-diagram
//! intermediate form.
//!
//! ## What is an FDD?
//!
//! A Forwarding Decision Diagram is a hash-consed, ordered, reduced
//! decision diagram: internal nodes test packet header fields, leaves hold
//! *sets of actions* (multi-field assignments, one output copy per action).
//! For a fixed field order, every policy function has exactly one diagram ---
//! so checking that two policies behave identically is a handle comparison.
//!
//! ## Key pieces
//!
//! - **Manager-centric architecture**: all diagram construction and algebra
//!   go through the [`Fdd`][crate::fdd::Fdd] manager, which owns the intern
//!   table and the per-operator memo caches.
//! - **Policy algebra**: `union`, `seq`, Kleene `star` (a finite fixed
//!   point), predicate `negate`, and `restrict` (partial evaluation), all
//!   canonical by construction.
//! - **Table emission**: a diagram becomes an ordered, priority-encoded
//!   rule list ([`table`]), or a multi-table pipeline with metadata-guarded
//!   `GotoTable` rules and a shared group table ([`multitable`]).
//!
//! ## Basic usage
//!
//! ```
//! use fdd_rs::ast::{Policy, Pred};
//! use fdd_rs::compile::Compiler;
//! use fdd_rs::field::Field;
//! use fdd_rs::options::CompilerOptions;
//! use fdd_rs::table::to_table;
//! use fdd_rs::value::Value;
//!
//! // vlan = 7 ⟹ forward on port 2
//! let policy = Policy::seq(
//!     Policy::filter(Pred::test(Field::Vlan, Value::Const(7))),
//!     Policy::modify(Field::Location, Value::Const(2)),
//! );
//!
//! let mut compiler = Compiler::new(CompilerOptions::default(), &policy).unwrap();
//! let diagram = compiler.compile_local(&policy, None).unwrap();
//!
//! let options = compiler.options().clone();
//! let rules = to_table(compiler.fdd_mut(), 1, diagram, &options, None).unwrap();
//! assert_eq!(rules.len(), 2); // the vlan rule, then the default drop
//! ```
//!
//! ## Core components
//!
//! - **[`fdd`]**: the heart of the crate --- the manager and the diagram
//!   algebra.
//! - **[`compile`]**: structural recursion from the policy AST, switch
//!   specialization, link lowering.
//! - **[`table`] / [`multitable`]**: flow-rule emission.
//! - **[`interp`]**: a reference interpreter, the semantic ground truth the
//!   emitters are tested against.

pub mod action;
pub mod ast;
pub mod compile;
pub mod dot;
pub mod error;
pub mod fdd;
pub mod field;
pub mod interp;
pub mod multitable;
pub mod node;
pub mod options;
pub mod reference;
pub mod table;
pub mod value;
