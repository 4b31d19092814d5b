//! Cross-batch node classification.

use serde::Serialize;

use crate::{Address, Value};

/// Classification tiers over a node's batch slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// Present in every batch with one masked value throughout
    StaticStatic,
    /// Present in every batch, values differ between batches
    StaticNode,
    /// Absent from at least one batch
    DynamicNode,
}

/// Classify slots `0..batch_count`. Classification compares *masked*
/// values so that ingest counts and collapse tallies always agree.
pub(crate) fn classify_slots(
    slots: &[Value],
    batch_count: usize,
    mask: Option<u32>,
) -> NodeClass {
    let masked = |value: Value| mask.map_or(value, |m| value & m);
    let mut first = None;
    let mut uniform = true;
    for &slot in &slots[..batch_count] {
        if slot == 0 {
            return NodeClass::DynamicNode;
        }
        match first {
            None => first = Some(masked(slot)),
            Some(seen) => uniform &= masked(slot) == seen,
        }
    }
    if uniform {
        NodeClass::StaticStatic
    } else {
        NodeClass::StaticNode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StaticStaticEntry {
    pub address: Address,
    /// The single masked value shared by every batch
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaticNodeEntry {
    pub address: Address,
    /// One masked value per batch, all non-zero
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DynamicNodeEntry {
    pub address: Address,
    /// One masked value per batch; 0 marks absence
    pub values: Vec<Value>,
}

/// The three disjoint pools handed to detection and scanning, each sorted
/// by address. Once collapsed, the preprocessor's map is gone; these
/// vectors are the only per-batch state left.
#[derive(Debug, Default)]
pub struct CollapsedPools {
    pub batch_count: usize,
    pub static_statics: Vec<StaticStaticEntry>,
    pub static_nodes: Vec<StaticNodeEntry>,
    pub dynamic_nodes: Vec<DynamicNodeEntry>,
}

impl CollapsedPools {
    pub fn node_count(&self) -> usize {
        self.static_statics.len() + self.static_nodes.len() + self.dynamic_nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_slots() {
        let slots = [0x100, 0x100, 0x100, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(classify_slots(&slots, 3, None), NodeClass::StaticStatic);
        let slots = [0x100, 0x104, 0x100, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(classify_slots(&slots, 3, None), NodeClass::StaticNode);
        let slots = [0x100, 0, 0x100, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(classify_slots(&slots, 3, None), NodeClass::DynamicNode);
        // Only slots below batch_count are considered
        assert_eq!(classify_slots(&slots, 1, None), NodeClass::StaticStatic);
    }

    #[test]
    fn test_classify_compares_masked_values() {
        // Cached and uncached aliases of the same pointer
        let slots = [0x8000_1000, 0xA000_1000, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            classify_slots(&slots, 2, Some(0xDFFF_FFFF)),
            NodeClass::StaticStatic
        );
        assert_eq!(classify_slots(&slots, 2, None), NodeClass::StaticNode);
    }
}
