//! Forward scan from base pointers.
//!
//! Every varying-value node that no accepted structure consumed becomes a
//! base pointer. From each one, a chunked descent follows pointer hops
//! that *every* snapshot agrees on, looking for injected targets, known
//! structures, and prior entry points.

mod bitmap;
mod driver;

pub use bitmap::BitmapStore;
pub use driver::{run_scan, ScanContext, ScanFindings, ScanStats};

pub(crate) use bitmap::window_word;

use std::collections::{HashMap, HashSet};

use crate::findings::{EntryPoint, Structure};
use crate::pool::StaticNodeEntry;
use crate::{Address, Value};

/// Offset span explored per descent restart.
pub(crate) const CHUNK_BYTES: u32 = 0x80;

/// Progress/cancellation cadence, in base pointers.
pub(crate) const YIELD_BASE_INTERVAL: usize = 100;
/// Streaming cadence, in base pointers.
pub(crate) const STREAM_BASE_INTERVAL: usize = 1000;
/// Cancellation poll cadence, in descent depths.
pub(crate) const YIELD_DEPTH_INTERVAL: usize = 3;

/// Batch fraction (percent) that must agree before an entry-point hop is
/// accepted.
pub(crate) const ENTRY_VOTE_PERCENT: usize = 66;

/// One row of a rebuilt per-batch snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRow {
    pub address: Address,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct BasePointer {
    pub address: Address,
    /// One value per batch
    pub values: Vec<Value>,
}

/// Address-to-row lookup per batch, preallocated to batch size.
pub fn build_batch_indexes(batches: &[Vec<BatchRow>]) -> Vec<HashMap<Address, usize>> {
    batches
        .iter()
        .map(|batch| {
            let mut index = HashMap::with_capacity(batch.len());
            for (row, entry) in batch.iter().enumerate() {
                index.insert(entry.address, row);
            }
            index
        })
        .collect()
}

/// Varying-value nodes not consumed by any batch's target pool, in
/// address order.
pub fn promote_base_pointers(
    static_nodes: &[StaticNodeEntry],
    target_nodes: &[HashSet<Address>],
) -> Vec<BasePointer> {
    static_nodes
        .iter()
        .filter(|entry| !target_nodes.iter().any(|set| set.contains(&entry.address)))
        .map(|entry| BasePointer {
            address: entry.address,
            values: entry.values.clone(),
        })
        .collect()
}

/// What a known address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owner {
    Structure(u32),
    EntryPoint(u32),
}

/// Lookup tables from node address to owning structure/entry point,
/// rebuilt per scan. First owner wins on the rare shared address, which
/// is stable because both arenas are iterated in id order.
pub(crate) fn build_owner_map(
    structures: &[Structure],
    entry_points: &[EntryPoint],
) -> HashMap<Address, Owner> {
    let mut owners = HashMap::new();
    for structure in structures {
        for &address in &structure.addresses {
            owners.entry(address).or_insert(Owner::Structure(structure.id));
        }
    }
    for (id, entry) in entry_points.iter().enumerate() {
        for &address in &entry.addresses {
            owners.entry(address).or_insert(Owner::EntryPoint(id as u32));
        }
    }
    owners
}

/// Entry-point node set with each node's build offset, for the majority
/// vote. First entry wins shared nodes.
pub(crate) fn build_entry_offsets(entry_points: &[EntryPoint]) -> HashMap<Address, u32> {
    let mut offsets = HashMap::new();
    for entry in entry_points {
        for &address in &entry.addresses {
            offsets.entry(address).or_insert(entry.build_offset);
        }
    }
    offsets
}
