//! Chunked descent driver.
//!
//! Offset space is explored in 0x80-byte chunks; within a chunk the
//! descent repeatedly takes the smallest offset that every batch agrees
//! is a pointer hop, so one chunk yields at most one path. All emission
//! checks run on the post-hop addresses and require full batch
//! agreement; a majority vote with a modal build offset catches entry
//! points that drift between snapshots.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use super::{
    build_entry_offsets, build_owner_map, window_word, BasePointer, BatchRow, BitmapStore,
    Owner, CHUNK_BYTES, ENTRY_VOTE_PERCENT, STREAM_BASE_INTERVAL, YIELD_BASE_INTERVAL,
    YIELD_DEPTH_INTERVAL,
};
use crate::config::ScanConfig;
use crate::error::Result;
use crate::events::EventSink;
use crate::findings::{EntryPoint, Structure, TargetPath};
use crate::system::SystemDescriptor;
use crate::{Address, Value};

/// Everything the driver borrows for one scan. Owner lookup tables are
/// rebuilt inside `run_scan` from the arenas.
pub struct ScanContext<'a> {
    pub system: &'a SystemDescriptor,
    pub config: &'a ScanConfig,
    pub batches: &'a [Vec<BatchRow>],
    pub indexes: &'a [HashMap<Address, usize>],
    pub base_pointers: &'a [BasePointer],
    pub bitmaps: Option<&'a BitmapStore>,
    pub injected: &'a HashSet<Address>,
    pub target_nodes: &'a [HashSet<Address>],
    pub structures: &'a [Structure],
    pub entry_points: &'a [EntryPoint],
}

impl ScanContext<'_> {
    fn value_at(&self, batch: usize, address: Address) -> Option<Value> {
        self.indexes[batch]
            .get(&address)
            .map(|&row| self.batches[batch][row].value)
    }
}

/// Findings accumulated between streaming boundaries.
#[derive(Debug, Default)]
pub struct ScanFindings {
    pub entry_points: Vec<EntryPoint>,
    pub target_paths: Vec<TargetPath>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub bases_scanned: usize,
    pub entry_hits: usize,
    pub target_paths: usize,
    pub cancelled: bool,
}

enum Hit {
    Target(TargetPath),
    Known { owner: Owner, path: Vec<u32> },
    Entry { build_offset: u32, path: Vec<u32> },
}

/// Scan every enabled-range base pointer. `flush` is called at each
/// streaming boundary and once at the end; it drains the findings it is
/// handed.
pub fn run_scan(
    ctx: &ScanContext,
    sink: &mut dyn EventSink,
    flush: &mut dyn FnMut(&mut ScanFindings) -> Result<()>,
) -> Result<ScanStats> {
    let owners = build_owner_map(ctx.structures, ctx.entry_points);
    let entry_offsets = build_entry_offsets(ctx.entry_points);
    let total = ctx.base_pointers.len().max(1);

    let mut findings = ScanFindings::default();
    let mut stats = ScanStats::default();

    for (index, base) in ctx.base_pointers.iter().enumerate() {
        let in_enabled_range = ctx
            .system
            .range_index(base.address)
            .is_some_and(|range| ctx.config.enabled_ranges.contains(&range));
        if in_enabled_range {
            let mut had_target = false;
            let mut had_hit = false;
            for hit in descend(ctx, &owners, &entry_offsets, base, &*sink) {
                match hit {
                    Hit::Target(path) => {
                        stats.target_paths += 1;
                        had_target = true;
                        findings.target_paths.push(path);
                    }
                    Hit::Known { owner, path } => {
                        stats.entry_hits += 1;
                        had_hit = true;
                        let target_struct = match owner {
                            Owner::Structure(id) => Some(id),
                            Owner::EntryPoint(_) => None,
                        };
                        findings.entry_points.push(EntryPoint {
                            root: base.values.first().copied().unwrap_or(base.address),
                            addresses: Vec::new(),
                            build_offset: path.last().copied().unwrap_or(0),
                            path,
                            batch: None,
                            target_struct,
                            moving: true,
                            claimed: false,
                        });
                    }
                    Hit::Entry { build_offset, mut path } => {
                        stats.entry_hits += 1;
                        had_hit = true;
                        // The hit's own final hop extends the walked path
                        path.push(build_offset);
                        findings.entry_points.push(EntryPoint {
                            root: base.values.first().copied().unwrap_or(base.address),
                            addresses: Vec::new(),
                            build_offset,
                            path,
                            batch: None,
                            target_struct: None,
                            moving: false,
                            claimed: false,
                        });
                    }
                }
            }
            stats.bases_scanned += 1;

            if (ctx.config.early_out_target && had_target)
                || (ctx.config.early_out_base_pointer && (had_hit || had_target))
            {
                debug!("early out after base pointer 0x{:08X}", base.address);
                break;
            }
        }

        if (index + 1) % YIELD_BASE_INTERVAL == 0 {
            sink.progress(
                ((index + 1) * 100 / total) as u8,
                "scanning base pointers",
            );
            if sink.cancelled() {
                stats.cancelled = true;
                break;
            }
        }
        if (index + 1) % STREAM_BASE_INTERVAL == 0 {
            flush(&mut findings)?;
        }
    }

    flush(&mut findings)?;
    Ok(stats)
}

fn descend(
    ctx: &ScanContext,
    owners: &HashMap<Address, Owner>,
    entry_offsets: &HashMap<Address, u32>,
    base: &BasePointer,
    sink: &dyn EventSink,
) -> Vec<Hit> {
    let mut hits = Vec::new();
    let max_breadth = ctx.config.max_breadth;
    if max_breadth == 0 {
        return hits;
    }

    let mut chunk_start = 0u32;
    while chunk_start <= max_breadth {
        if let Some(hit) = descend_chunk(ctx, owners, entry_offsets, base, chunk_start, sink) {
            hits.push(hit);
        }
        chunk_start += CHUNK_BYTES;
    }
    hits
}

fn descend_chunk(
    ctx: &ScanContext,
    owners: &HashMap<Address, Owner>,
    entry_offsets: &HashMap<Address, u32>,
    base: &BasePointer,
    chunk_start: u32,
    sink: &dyn EventSink,
) -> Option<Hit> {
    let batch_count = ctx.batches.len();
    let chunk_index = (chunk_start / CHUNK_BYTES) as usize;
    let vote_threshold = batch_count * ENTRY_VOTE_PERCENT / 100;

    let mut current: Vec<Address> = vec![base.address; batch_count];
    let mut path: Vec<u32> = Vec::new();
    let mut depth = 1usize;

    loop {
        if !path.is_empty() {
            // Full-batch agreement on an injected target ends the chunk
            if current.iter().all(|addr| ctx.injected.contains(addr)) {
                return Some(Hit::Target(TargetPath {
                    base_pointer: base.address,
                    path,
                    target: current[0],
                }));
            }
            // Full-batch agreement on one known structure or entry point
            if let Some(&owner) = owners.get(&current[0]) {
                if current[1..]
                    .iter()
                    .all(|addr| owners.get(addr) == Some(&owner))
                {
                    return Some(Hit::Known { owner, path });
                }
            }
        }

        if depth > ctx.config.max_depth {
            return None;
        }
        if depth % YIELD_DEPTH_INTERVAL == 0 && sink.cancelled() {
            return None;
        }

        let mut word = combined_word(ctx, &current, chunk_index, chunk_start);
        // Clip bits past the breadth limit in the final chunk
        let last_bit = (max_bit(ctx.config.max_breadth, chunk_start)).min(31);
        if last_bit < 31 {
            word &= (1u32 << (last_bit + 1)) - 1;
        }
        if word == 0 {
            return None;
        }
        let chosen = chunk_start + word.trailing_zeros() * 4;

        // Majority vote: does this hop land most batches inside the
        // target pools or a prior entry point's nodes?
        let mut agreeing = 0usize;
        let mut matched_offsets: Vec<u32> = Vec::new();
        for batch in 0..batch_count {
            let Some(value) = ctx.value_at(batch, current[batch]) else {
                continue;
            };
            let next = value.wrapping_add(chosen);
            let mut agrees = ctx.target_nodes[batch].contains(&next);
            if let Some(&offset) = entry_offsets.get(&next) {
                agrees = true;
                matched_offsets.push(offset);
            }
            if agrees {
                agreeing += 1;
            }
        }
        if agreeing > vote_threshold && !matched_offsets.is_empty() {
            if let Some(build_offset) = modal_majority(&matched_offsets) {
                let mut hit_path = path;
                hit_path.push(chosen);
                return Some(Hit::Entry {
                    build_offset,
                    path: hit_path,
                });
            }
        }

        for batch in 0..batch_count {
            current[batch] = match ctx.value_at(batch, current[batch]) {
                Some(value) => value.wrapping_add(chosen),
                None => 0,
            };
        }
        path.push(chosen);
        depth += 1;
    }
}

/// Index of the last offset bit usable in a chunk clipped by the breadth
/// limit.
fn max_bit(max_breadth: u32, chunk_start: u32) -> u32 {
    (max_breadth - chunk_start) / 4
}

/// The most frequent offset, provided it holds a strict majority; ties
/// resolve toward the smallest offset.
fn modal_majority(offsets: &[u32]) -> Option<u32> {
    let mut frequency: BTreeMap<u32, usize> = BTreeMap::new();
    for &offset in offsets {
        *frequency.entry(offset).or_default() += 1;
    }
    let mut best: Option<(u32, usize)> = None;
    for (&offset, &count) in &frequency {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((offset, count));
        }
    }
    let (modal, count) = best?;
    (count * 2 > offsets.len()).then_some(modal)
}

/// AND of every batch's agreement word for this chunk, from the
/// precomputed store when it covers all current nodes, otherwise from
/// the same window routine on the fly.
fn combined_word(
    ctx: &ScanContext,
    current: &[Address],
    chunk_index: usize,
    chunk_start: u32,
) -> u32 {
    if let Some(store) = ctx.bitmaps {
        if chunk_index < store.words_per_node {
            let mut word = u32::MAX;
            let mut covered = true;
            for (batch, &address) in current.iter().enumerate() {
                match store.word(address, batch, chunk_index) {
                    Some(stored) => word &= stored,
                    None => {
                        covered = false;
                        break;
                    }
                }
            }
            if covered {
                return word;
            }
        }
    }

    let mut word = u32::MAX;
    for (batch, &address) in current.iter().enumerate() {
        word &= match ctx.value_at(batch, address) {
            Some(value) => window_word(&ctx.indexes[batch], value, chunk_start),
            None => 0,
        };
        if word == 0 {
            break;
        }
    }
    word
}
