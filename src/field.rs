//! Packet header fields and the compilation-time field ordering.
//!
//! A [`Field`] names one matchable/writable packet header. The set is closed:
//! diagrams, actions, and flow rules only ever mention these fields.
//!
//! Diagrams branch on fields in a total order that is configurable once per
//! compilation and then frozen: every diagram composed with another must have
//! been built under the same [`FieldOrder`]. The distinction mirrors the
//! variable/level split in ordered decision diagrams --- `Field` is the stable
//! identity, its rank under a `FieldOrder` is its position.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A packet header field.
///
/// The declaration order doubles as the default compilation order, with
/// `Switch` outermost so that per-switch specialization prunes the diagram
/// at the root.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Field {
    Switch,
    Location,
    From,
    VSwitch,
    VPort,
    VFabric,
    Vlan,
    VlanPcp,
    EthType,
    EthSrc,
    EthDst,
    IP4Src,
    IP4Dst,
    IPProto,
    TCPSrcPort,
    TCPDstPort,
}

impl Field {
    /// All fields, in declaration (default) order.
    pub const ALL: [Field; 16] = [
        Field::Switch,
        Field::Location,
        Field::From,
        Field::VSwitch,
        Field::VPort,
        Field::VFabric,
        Field::Vlan,
        Field::VlanPcp,
        Field::EthType,
        Field::EthSrc,
        Field::EthDst,
        Field::IP4Src,
        Field::IP4Dst,
        Field::IPProto,
        Field::TCPSrcPort,
        Field::TCPDstPort,
    ];

    /// Number of distinct fields.
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index of this field in declaration order.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// True for the IPv4 address fields, which admit prefix values.
    pub fn is_prefix_field(self) -> bool {
        matches!(self, Field::IP4Src | Field::IP4Dst)
    }

    /// True for fields with no physical wire representation.
    pub fn is_virtual(self) -> bool {
        matches!(self, Field::VSwitch | Field::VPort | Field::VFabric | Field::From)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A total order over fields, fixed for the lifetime of a diagram manager.
///
/// Internally a rank table: `rank[field.index()]` is the field's position,
/// rank 0 branching closest to the root.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FieldOrder {
    rank: [u8; Field::COUNT],
}

impl FieldOrder {
    /// The declaration order.
    pub fn default_order() -> Self {
        let mut rank = [0u8; Field::COUNT];
        for (i, f) in Field::ALL.iter().enumerate() {
            rank[f.index()] = i as u8;
        }
        FieldOrder { rank }
    }

    /// An explicit order. `fields` must mention every field exactly once.
    pub fn from_list(fields: &[Field]) -> Option<Self> {
        if fields.len() != Field::COUNT {
            return None;
        }
        let mut rank = [u8::MAX; Field::COUNT];
        for (i, f) in fields.iter().enumerate() {
            if rank[f.index()] != u8::MAX {
                return None;
            }
            rank[f.index()] = i as u8;
        }
        Some(FieldOrder { rank })
    }

    /// Order fields by decreasing test frequency, ties keeping declaration
    /// order. `counts[field.index()]` is the number of tests on that field.
    pub fn from_counts(counts: &[usize; Field::COUNT]) -> Self {
        let mut fields = Field::ALL;
        fields.sort_by_key(|f| (std::cmp::Reverse(counts[f.index()]), f.index()));
        Self::from_list(&fields).expect("sorted ALL is a permutation")
    }

    /// Position of `field` in this order.
    #[inline]
    pub fn rank(&self, field: Field) -> u8 {
        self.rank[field.index()]
    }

    /// Fields from outermost to innermost under this order.
    pub fn fields(&self) -> Vec<Field> {
        let mut fields = Field::ALL;
        fields.sort_by_key(|f| self.rank(*f));
        fields.to_vec()
    }
}

impl Default for FieldOrder {
    fn default() -> Self {
        Self::default_order()
    }
}
