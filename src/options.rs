//! Compiler options and their JSON surface.
//!
//! Every option has a single defined effect (see the field docs). The
//! struct round-trips through a JSON object whose keys correspond
//! one-to-one with the recognized options; unknown keys are rejected under
//! strict adherence and ignored under sloppy.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::field::{Field, FieldOrder};

/// Intern-table retention policy applied before a compile.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePrepare {
    /// Retain all interned nodes and memo entries.
    Keep,
    /// Reset the manager to just the distinguished leaves.
    Empty,
    /// Retain intern entries reachable from the given root handle; clear
    /// the memo caches.
    Preserve(u32),
}

/// How the total field order is fixed.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrderSpec {
    /// Declaration order.
    Default,
    /// An explicit, complete order.
    Static(Vec<Field>),
    /// Fields tested more often rank closer to the root.
    Heuristic,
}

/// Wire-protocol adherence.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adherence {
    /// Reject anything the target protocol cannot express.
    Strict,
    /// Lower best-effort, skipping what cannot be expressed.
    Sloppy,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Intern-table retention before compilation.
    pub cache_prepare: CachePrepare,
    /// Field-order selection.
    pub field_order: FieldOrderSpec,
    /// Omit trailing rules whose action is `drop` (implied by the switch
    /// default).
    pub remove_tail_drops: bool,
    /// Merge rules with redundant coverage.
    pub dedup_flows: bool,
    /// Algebraically simplify the policy before compilation.
    pub optimize: bool,
    /// Strictness of the wire-protocol lowering.
    pub openflow_adherence: Adherence,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            cache_prepare: CachePrepare::Keep,
            field_order: FieldOrderSpec::Heuristic,
            remove_tail_drops: false,
            dedup_flows: true,
            optimize: true,
            openflow_adherence: Adherence::Strict,
        }
    }
}

const KNOWN_KEYS: [&str; 6] = [
    "cache_prepare",
    "field_order",
    "remove_tail_drops",
    "dedup_flows",
    "optimize",
    "openflow_adherence",
];

impl CompilerOptions {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidOptions(e.to_string()))
    }

    /// Parse options from JSON.
    ///
    /// The `openflow_adherence` key in the object itself decides how
    /// unknown keys are treated: strict (the default) rejects them, sloppy
    /// drops them before deserializing.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| Error::InvalidOptions(e.to_string()))?;
        let serde_json::Value::Object(mut obj) = value else {
            return Err(Error::InvalidOptions("expected a JSON object".to_string()));
        };

        let adherence = match obj.get("openflow_adherence") {
            None => Adherence::Strict,
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| Error::InvalidOptions(e.to_string()))?,
        };

        match adherence {
            Adherence::Strict => {
                if let Some(key) = obj.keys().find(|k| !KNOWN_KEYS.contains(&k.as_str())) {
                    return Err(Error::InvalidOptions(format!("unknown key `{}`", key)));
                }
            }
            Adherence::Sloppy => {
                obj.retain(|k, _| KNOWN_KEYS.contains(&k.as_str()));
            }
        }

        serde_json::from_value(serde_json::Value::Object(obj))
            .map_err(|e| Error::InvalidOptions(e.to_string()))
    }

    /// Resolve the field order, given per-field test counts of the policy
    /// about to be compiled (used by `Heuristic`).
    pub fn resolve_field_order(&self, counts: &[usize; Field::COUNT]) -> Result<FieldOrder> {
        match &self.field_order {
            FieldOrderSpec::Default => Ok(FieldOrder::default_order()),
            FieldOrderSpec::Static(fields) => FieldOrder::from_list(fields).ok_or_else(|| {
                Error::InvalidOptions("static field order must mention every field once".to_string())
            }),
            FieldOrderSpec::Heuristic => Ok(FieldOrder::from_counts(counts)),
        }
    }
}
