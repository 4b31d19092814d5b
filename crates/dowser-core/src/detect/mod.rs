//! Static and dynamic list detection.
//!
//! Both passes sweep build offsets 0x00..=0x3C smallest-first and feed the
//! chain walker, so structure ids come out in a reproducible order. The
//! static pass runs over the same-value pool with ghost bridging; the
//! dynamic pass runs per `(offset, batch)` over the varying-value pool
//! with no ghosts and the batch's target pool as a termination signal.

mod walker;

pub use walker::{resolve_chain_conflicts, walk_chains_at_offset, Chain, WalkOptions, WalkOutcome};

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::config::ScanConfig;
use crate::findings::{EntryPoint, Structure, StructureKind};
use crate::pool::{StaticNodeEntry, StaticStaticEntry};
use crate::{Address, Value};

/// Last build offset of the sweep, inclusive.
const SWEEP_OFFSET_LIMIT: u32 = 0x3C;

/// Sweep the same-value pool for static lists. Winning chains consume
/// their nodes from the pool so later offsets cannot re-detect them, and
/// their nodes and ghosts enter every batch's target pool. Returns the
/// leftover entries for sticky promotion (or disposal).
pub fn run_static_pass(
    static_statics: Vec<StaticStaticEntry>,
    config: &ScanConfig,
    structures: &mut Vec<Structure>,
    target_nodes: &mut [HashSet<Address>],
) -> Vec<StaticStaticEntry> {
    let mut values: HashMap<Address, Value> = static_statics
        .iter()
        .map(|entry| (entry.address, entry.value))
        .collect();
    let mut pool: BTreeSet<Address> = values.keys().copied().collect();
    let options = WalkOptions {
        min_chain_length: config.static_min_chain_length,
        max_ghost_nodes: config.max_ghost_nodes,
    };

    for offset in (0..=SWEEP_OFFSET_LIMIT).step_by(4) {
        if pool.len() < options.min_chain_length {
            break;
        }
        let outcome =
            walk_chains_at_offset(&pool, offset, |addr| values.get(&addr).copied(), options, None);
        let chains = resolve_chain_conflicts(outcome.chains);
        for chain in chains.into_iter().filter(|chain| chain.is_head) {
            for set in target_nodes.iter_mut() {
                set.extend(&chain.nodes);
                set.extend(&chain.ghosts);
            }
            for node in &chain.nodes {
                pool.remove(node);
                values.remove(node);
            }

            let mut addresses = chain.nodes;
            let root = addresses[0];
            addresses.sort_unstable();
            let mut ghosts = chain.ghosts;
            ghosts.sort_unstable();
            let structure = Structure {
                id: structures.len() as u32,
                kind: StructureKind::StaticList,
                root,
                stride: dominant_stride(&addresses),
                build_offset: offset,
                addresses,
                ghosts,
                batch: None,
            };
            debug!(
                "static list {} at offset 0x{:02X}: root 0x{:08X}, {} nodes, stride {}",
                structure.id,
                offset,
                structure.root,
                structure.node_count(),
                structure.stride
            );
            structures.push(structure);
        }
    }

    let mut leftovers: Vec<StaticStaticEntry> = values
        .into_iter()
        .map(|(address, value)| StaticStaticEntry { address, value })
        .collect();
    leftovers.sort_unstable_by_key(|entry| entry.address);
    leftovers
}

/// Sweep the varying-value pool per batch for dynamic lists and entry
/// points. Winners consume their nodes into the batch's target pool;
/// losers and entry chains just leave the working set.
pub fn run_dynamic_pass(
    static_nodes: &[StaticNodeEntry],
    batch_count: usize,
    config: &ScanConfig,
    structures: &mut Vec<Structure>,
    entry_points: &mut Vec<EntryPoint>,
    target_nodes: &mut [HashSet<Address>],
) {
    let values: HashMap<Address, &[Value]> = static_nodes
        .iter()
        .map(|entry| (entry.address, entry.values.as_slice()))
        .collect();
    let mut working: Vec<BTreeSet<Address>> = (0..batch_count)
        .map(|batch| {
            static_nodes
                .iter()
                .map(|entry| entry.address)
                .filter(|addr| !target_nodes[batch].contains(addr))
                .collect()
        })
        .collect();
    let options = WalkOptions {
        min_chain_length: config.min_chain_length,
        max_ghost_nodes: 0,
    };

    for offset in (0..=SWEEP_OFFSET_LIMIT).step_by(4) {
        for batch in 0..batch_count {
            if working[batch].is_empty() {
                continue;
            }
            let outcome = walk_chains_at_offset(
                &working[batch],
                offset,
                |addr| values.get(&addr).map(|slots| slots[batch]),
                options,
                Some(&target_nodes[batch]),
            );
            let chains = resolve_chain_conflicts(outcome.chains);
            for chain in chains {
                if chain.is_head {
                    target_nodes[batch].extend(&chain.nodes);
                }
                for node in &chain.nodes {
                    working[batch].remove(node);
                }
                if !chain.is_head {
                    continue;
                }

                let mut addresses = chain.nodes;
                let root = addresses[0];
                addresses.sort_unstable();
                let structure = Structure {
                    id: structures.len() as u32,
                    kind: StructureKind::DynamicList,
                    root,
                    stride: dominant_stride(&addresses),
                    build_offset: offset,
                    addresses,
                    ghosts: Vec::new(),
                    batch: Some(batch),
                };
                debug!(
                    "dynamic list {} at offset 0x{:02X} in batch {}: root 0x{:08X}, {} nodes",
                    structure.id,
                    offset,
                    batch,
                    structure.root,
                    structure.node_count()
                );
                structures.push(structure);
            }

            for chain in outcome.entry_chains {
                for node in &chain.nodes {
                    working[batch].remove(node);
                }
                let root = chain.nodes[0];
                let mut addresses = chain.nodes;
                addresses.sort_unstable();
                entry_points.push(EntryPoint {
                    root,
                    addresses,
                    build_offset: offset,
                    path: vec![offset],
                    batch: Some(batch),
                    target_struct: None,
                    moving: false,
                    claimed: false,
                });
            }
        }
    }
}

/// Promote leftover same-value entries to base-pointer candidates by
/// giving each batch the shared value.
pub fn promote_sticky(
    leftovers: Vec<StaticStaticEntry>,
    batch_count: usize,
    static_nodes: &mut Vec<StaticNodeEntry>,
) {
    for entry in leftovers {
        static_nodes.push(StaticNodeEntry {
            address: entry.address,
            values: vec![entry.value; batch_count],
        });
    }
    static_nodes.sort_unstable_by_key(|entry| entry.address);
}

/// Most frequent gap between consecutive members; single-node chains fall
/// back to 4, frequency ties break toward the smaller gap.
fn dominant_stride(sorted: &[Address]) -> u32 {
    if sorted.len() < 2 {
        return 4;
    }
    let mut frequency: std::collections::BTreeMap<u32, usize> = std::collections::BTreeMap::new();
    for pair in sorted.windows(2) {
        *frequency.entry(pair[1] - pair[0]).or_default() += 1;
    }
    let mut best = (4, 0);
    for (&gap, &count) in &frequency {
        if count > best.1 {
            best = (gap, count);
        }
    }
    best.0
}
