//! Snapshot ingest and classification.
//!
//! The preprocessor absorbs up to [`MAX_BATCHES`] snapshots. Each row
//! survives two per-batch filters, then lands in a per-address slot array
//! (one slot per batch, 0 = absent). `collapse` masks, classifies, and
//! hands the three pools to the pipeline; after that the map is gone.

mod classify;
mod counts;

pub use classify::{
    CollapsedPools, DynamicNodeEntry, NodeClass, StaticNodeEntry, StaticStaticEntry,
};
pub use counts::{PoolCounts, RangeTally, Recommendation};

use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::system::SystemDescriptor;
use crate::{Address, Value};
use classify::classify_slots;

/// Upper bound on snapshots per run.
pub const MAX_BATCHES: usize = 10;

/// A value pointed to by strictly more than this many distinct addresses
/// in one batch is a shared anchor (a vtable, a common sentinel), not a
/// structural pointer; all of its rows are dropped.
const VTABLE_REF_LIMIT: usize = 10;

/// Self-reference window: a row is dropped when `address - masked_value`
/// falls inside it. Covers self-loops and pointers into the node's own
/// header.
const SELF_REF_MIN: i64 = -44;
const SELF_REF_MAX: i64 = 4;

/// Default for [`crate::ScanConfig::warn_base_pointer_threshold`], used
/// when `counts` is called outside a configured run.
const DEFAULT_WARN_THRESHOLD: usize = 50_000;

/// Ingest feedback for one `add_batch` call.
#[derive(Debug, Clone, Copy)]
pub struct BatchStats {
    pub batch: usize,
    pub rows: usize,
    pub kept: usize,
    pub vtable_filtered: usize,
    pub self_ref_filtered: usize,
    /// Distinct addresses in the pool after the call
    pub pool_size: usize,
}

pub struct Preprocessor {
    system: &'static SystemDescriptor,
    batch_count: usize,
    nodes: HashMap<Address, [Value; MAX_BATCHES]>,
}

impl Preprocessor {
    pub fn new(system_id: &str) -> Result<Self> {
        Ok(Self {
            system: SystemDescriptor::lookup(system_id)?,
            batch_count: 0,
            nodes: HashMap::new(),
        })
    }

    pub fn system(&self) -> &'static SystemDescriptor {
        self.system
    }

    pub fn batch_count(&self) -> usize {
        self.batch_count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Switch to another system. All ingest state is discarded; slot
    /// arrays from one console are meaningless on another.
    pub fn switch_system(&mut self, system_id: &str) -> Result<()> {
        self.system = SystemDescriptor::lookup(system_id)?;
        self.batch_count = 0;
        self.nodes.clear();
        Ok(())
    }

    /// Absorb one snapshot. Rows are expected pre-validated (aligned,
    /// in-range); the two structural filters here are the core's own.
    /// Values are stored unmasked; masking is deferred to `collapse`.
    pub fn add_batch(&mut self, addresses: &[Address], values: &[Value]) -> Result<BatchStats> {
        if self.batch_count == MAX_BATCHES {
            return Err(Error::batch_limit());
        }
        let batch = self.batch_count;

        let mut frequency: HashMap<Value, usize> = HashMap::with_capacity(values.len());
        for &value in values {
            *frequency.entry(value).or_default() += 1;
        }

        let mut stats = BatchStats {
            batch,
            rows: addresses.len().min(values.len()),
            kept: 0,
            vtable_filtered: 0,
            self_ref_filtered: 0,
            pool_size: 0,
        };

        for (&addr, &value) in addresses.iter().zip(values) {
            if frequency[&value] > VTABLE_REF_LIMIT {
                stats.vtable_filtered += 1;
                continue;
            }
            let masked = self.system.apply_mask(value);
            let diff = addr as i64 - masked as i64;
            if (SELF_REF_MIN..=SELF_REF_MAX).contains(&diff) {
                stats.self_ref_filtered += 1;
                continue;
            }
            let slots = self.nodes.entry(addr).or_insert([0; MAX_BATCHES]);
            slots[batch] = value;
            stats.kept += 1;
        }

        self.batch_count += 1;
        stats.pool_size = self.nodes.len();
        debug!(
            "batch {}: kept {} of {} rows ({} anchor, {} self-ref), pool at {}",
            batch, stats.kept, stats.rows, stats.vtable_filtered, stats.self_ref_filtered,
            stats.pool_size
        );
        Ok(stats)
    }

    /// Drop batch `index`, shifting later batches down one slot. Addresses
    /// left with no non-zero slot are pruned.
    pub fn remove_batch(&mut self, index: usize) -> Result<()> {
        if index >= self.batch_count {
            return Err(Error::InvalidBatchIndex {
                index,
                count: self.batch_count,
            });
        }
        let remaining = self.batch_count - 1;
        for slots in self.nodes.values_mut() {
            slots.copy_within(index + 1..self.batch_count, index);
            slots[remaining] = 0;
        }
        self.batch_count = remaining;
        self.nodes
            .retain(|_, slots| slots[..remaining].iter().any(|&slot| slot != 0));
        Ok(())
    }

    /// Tally the pool per range without modifying it, and derive the soft
    /// scan-time recommendation from range 0.
    pub fn counts(&self) -> PoolCounts {
        self.counts_with_threshold(DEFAULT_WARN_THRESHOLD)
    }

    pub fn counts_with_threshold(&self, warn_threshold: usize) -> PoolCounts {
        let ranges = self.system.ranges();
        let mut per_range = vec![RangeTally::default(); ranges.len()];
        let mut static_statics = 0;
        let mut static_nodes = 0;
        let mut dynamic_nodes = 0;

        for (&addr, slots) in &self.nodes {
            let class = classify_slots(slots, self.batch_count, self.system.mask);
            let range = self.system.range_index(addr);
            match class {
                NodeClass::StaticStatic => {
                    static_statics += 1;
                    if let Some(range) = range {
                        per_range[range].static_statics += 1;
                    }
                }
                NodeClass::StaticNode => {
                    static_nodes += 1;
                    if let Some(range) = range {
                        per_range[range].static_nodes += 1;
                    }
                }
                NodeClass::DynamicNode => dynamic_nodes += 1,
            }
        }

        let recommendation = counts::recommend(&per_range, warn_threshold);
        PoolCounts {
            ranges: per_range,
            static_statics,
            static_nodes,
            dynamic_nodes,
            recommendation,
        }
    }

    /// Mask every slot, classify every address, and emit the three sorted
    /// pools. Consumes the preprocessor; the slot map is released here.
    pub fn collapse(self) -> Result<CollapsedPools> {
        let before = self.counts();
        let mask = self.system.mask;
        let batch_count = self.batch_count;
        let masked = |value: Value| {
            if value == 0 {
                0
            } else {
                mask.map_or(value, |m| value & m)
            }
        };

        let mut entries: Vec<(Address, [Value; MAX_BATCHES])> = self.nodes.into_iter().collect();
        entries.sort_unstable_by_key(|&(addr, _)| addr);

        let mut pools = CollapsedPools {
            batch_count,
            ..CollapsedPools::default()
        };
        for (address, slots) in entries {
            match classify_slots(&slots, batch_count, mask) {
                NodeClass::StaticStatic => pools.static_statics.push(StaticStaticEntry {
                    address,
                    value: masked(slots[0]),
                }),
                NodeClass::StaticNode => pools.static_nodes.push(StaticNodeEntry {
                    address,
                    values: slots[..batch_count].iter().map(|&v| masked(v)).collect(),
                }),
                NodeClass::DynamicNode => pools.dynamic_nodes.push(DynamicNodeEntry {
                    address,
                    values: slots[..batch_count].iter().map(|&v| masked(v)).collect(),
                }),
            }
        }

        if before.static_statics != pools.static_statics.len()
            || before.static_nodes != pools.static_nodes.len()
            || before.dynamic_nodes != pools.dynamic_nodes.len()
        {
            return Err(Error::invariant("collapse tallies diverge from counts"));
        }

        info!(
            "collapsed {} batches into {} static-static, {} static, {} dynamic nodes",
            batch_count,
            pools.static_statics.len(),
            pools.static_nodes.len(),
            pools.dynamic_nodes.len()
        );
        Ok(pools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn preprocessor() -> Preprocessor {
        Preprocessor::new("gamecube").unwrap()
    }

    #[test]
    fn test_unknown_system_is_fatal() {
        assert!(matches!(
            Preprocessor::new("neogeo"),
            Err(Error::UnknownSystem(_))
        ));
    }

    #[test]
    fn test_vtable_anchor_filter_drops_all_rows() {
        // Eleven addresses all pointing at one anchor value
        let addresses: Vec<Address> = (0..11).map(|i| 0x8000_1000 + i * 0x100).collect();
        let values = vec![0x8002_0000u32; 11];
        let mut pre = preprocessor();
        let stats = pre.add_batch(&addresses, &values).unwrap();
        assert_eq!(stats.vtable_filtered, 11);
        assert_eq!(stats.kept, 0);
        assert_eq!(pre.node_count(), 0);
    }

    #[test]
    fn test_ten_shared_references_survive() {
        let addresses: Vec<Address> = (0..10).map(|i| 0x8000_1000 + i * 0x100).collect();
        let values = vec![0x8002_0000u32; 10];
        let mut pre = preprocessor();
        let stats = pre.add_batch(&addresses, &values).unwrap();
        assert_eq!(stats.kept, 10);
    }

    #[test]
    fn test_self_reference_filter_window() {
        let mut pre = preprocessor();
        // Self-loop: diff 0, dropped
        // Pointer into own header: value 4 beyond the address, diff -4, dropped
        // Backward reference well clear of the window: diff 32, kept
        let addresses = [0x8000_1000, 0x8000_2000, 0x8000_3020];
        let values = [0x8000_1000, 0x8000_2004, 0x8000_3000];
        let stats = pre.add_batch(&addresses, &values).unwrap();
        assert_eq!(stats.self_ref_filtered, 2);
        assert_eq!(stats.kept, 1);

        // Window edges: diff 4 dropped, diff 8 kept; diff -44 dropped,
        // diff -48 kept
        let mut pre = preprocessor();
        let addresses = [0x8000_1004, 0x8000_1008, 0x8000_2000, 0x8000_2000 + 4];
        let values = [0x8000_1000, 0x8000_1000, 0x8000_202C, 0x8000_2034];
        let stats = pre.add_batch(&addresses, &values).unwrap();
        assert_eq!(stats.self_ref_filtered, 2);
        assert_eq!(stats.kept, 2);
    }

    #[test]
    fn test_self_reference_uses_masked_value() {
        // Uncached alias of a self-loop: raw diff is huge, masked diff is 0
        let mut pre = Preprocessor::new("ps1").unwrap();
        let stats = pre.add_batch(&[0x8000_1000], &[0xA000_1000]).unwrap();
        assert_eq!(stats.self_ref_filtered, 1);
    }

    #[test]
    fn test_batch_limit() {
        let mut pre = preprocessor();
        for _ in 0..MAX_BATCHES {
            pre.add_batch(&[0x8000_1000], &[0x8000_2000]).unwrap();
        }
        assert!(matches!(
            pre.add_batch(&[0x8000_1000], &[0x8000_2000]),
            Err(Error::BatchLimitExceeded { .. })
        ));
        // Existing state intact
        assert_eq!(pre.batch_count(), MAX_BATCHES);
        assert_eq!(pre.node_count(), 1);
    }

    #[test]
    fn test_remove_batch_shifts_and_prunes() {
        let mut pre = preprocessor();
        pre.add_batch(&[0x8000_1000], &[0x8000_2000]).unwrap();
        pre.add_batch(&[0x8000_1000, 0x8000_1100], &[0x8000_2000, 0x8000_3000])
            .unwrap();
        pre.add_batch(&[0x8000_1000], &[0x8000_2040]).unwrap();

        // Dropping the middle batch prunes 0x80001100 entirely
        pre.remove_batch(1).unwrap();
        assert_eq!(pre.batch_count(), 2);
        assert_eq!(pre.node_count(), 1);

        let pools = pre.collapse().unwrap();
        assert_eq!(pools.static_nodes.len(), 1);
        assert_eq!(pools.static_nodes[0].values, vec![0x8000_2000, 0x8000_2040]);

        let mut pre = preprocessor();
        pre.add_batch(&[0x8000_1000], &[0x8000_2000]).unwrap();
        assert!(matches!(
            pre.remove_batch(1),
            Err(Error::InvalidBatchIndex { index: 1, count: 1 })
        ));
    }

    #[test]
    fn test_remove_and_readd_commutes() {
        let batch_a = (vec![0x8000_1000, 0x8000_1004], vec![0x8000_2000, 0x8000_2100]);
        let batch_b = (vec![0x8000_1000], vec![0x8000_2040]);
        let batch_c = (vec![0x8000_1004, 0x8000_1008], vec![0x8000_2100, 0x8000_2200]);

        let mut direct = preprocessor();
        direct.add_batch(&batch_a.0, &batch_a.1).unwrap();
        direct.add_batch(&batch_c.0, &batch_c.1).unwrap();
        direct.add_batch(&batch_b.0, &batch_b.1).unwrap();
        let direct = direct.counts();

        let mut shuffled = preprocessor();
        shuffled.add_batch(&batch_a.0, &batch_a.1).unwrap();
        shuffled.add_batch(&batch_b.0, &batch_b.1).unwrap();
        shuffled.add_batch(&batch_c.0, &batch_c.1).unwrap();
        shuffled.remove_batch(1).unwrap();
        shuffled.add_batch(&batch_b.0, &batch_b.1).unwrap();
        let shuffled = shuffled.counts();

        assert_eq!(direct.static_statics, shuffled.static_statics);
        assert_eq!(direct.static_nodes, shuffled.static_nodes);
        assert_eq!(direct.dynamic_nodes, shuffled.dynamic_nodes);
    }

    #[test]
    fn test_single_batch_is_all_static_static() {
        // Spacing clear of the self-reference window
        let (addresses, values) = fixtures::ring(0x8000_0100, 6, 0x100);
        let mut pre = preprocessor();
        pre.add_batch(&addresses, &values).unwrap();
        let pools = pre.collapse().unwrap();
        assert_eq!(pools.static_statics.len(), 6);
        assert!(pools.static_nodes.is_empty());
        assert!(pools.dynamic_nodes.is_empty());
    }

    #[test]
    fn test_identical_batches_are_static_static() {
        let (addresses, values) = fixtures::ring(0x8000_0100, 6, 0x100);
        let mut pre = preprocessor();
        pre.add_batch(&addresses, &values).unwrap();
        pre.add_batch(&addresses, &values).unwrap();
        let pools = pre.collapse().unwrap();
        assert_eq!(pools.static_statics.len(), 6);
        assert!(pools.static_nodes.is_empty());
    }

    #[test]
    fn test_counts_match_collapse_and_pools_are_sorted() {
        let mut pre = preprocessor();
        pre.add_batch(
            &[0x8000_1000, 0x8000_1100, 0x8000_1200],
            &[0x8000_2000, 0x8000_2100, 0x8000_2200],
        )
        .unwrap();
        pre.add_batch(
            &[0x8000_1000, 0x8000_1100],
            &[0x8000_2000, 0x8000_2140],
        )
        .unwrap();

        let counts = pre.counts();
        assert_eq!(counts.static_statics, 1);
        assert_eq!(counts.static_nodes, 1);
        assert_eq!(counts.dynamic_nodes, 1);

        let pools = pre.collapse().unwrap();
        assert_eq!(pools.static_statics.len(), counts.static_statics);
        assert_eq!(pools.static_nodes.len(), counts.static_nodes);
        assert_eq!(pools.dynamic_nodes.len(), counts.dynamic_nodes);
        assert_eq!(pools.node_count(), 3);
        assert!(pools
            .static_nodes
            .windows(2)
            .all(|w| w[0].address < w[1].address));
    }

    #[test]
    fn test_switch_system_resets_state() {
        let mut pre = preprocessor();
        pre.add_batch(&[0x8000_1000], &[0x8000_2000]).unwrap();
        pre.switch_system("n64").unwrap();
        assert_eq!(pre.batch_count(), 0);
        assert_eq!(pre.node_count(), 0);
        assert_eq!(pre.system().name, "n64");
    }
}
