//! Pipeline orchestration.
//!
//! Stages run strictly in sequence: classify, static detect, dynamic
//! detect, base-pointer promotion and indexing, bitmap precompute,
//! forward scan, final streaming. The orchestrator owns every pool,
//! yields to the event sink between stages, and streams findings to the
//! encoder in bounded bundles so nothing accumulates across the scan.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::ScanConfig;
use crate::detect;
use crate::error::Result;
use crate::events::{EventSink, Stage, StageStatus};
use crate::findings::{
    Encode, EntryPoint, Finding, IdAllocator, Structure, StructureKind, TargetPath,
};
use crate::pool::CollapsedPools;
use crate::scan::{
    build_batch_indexes, promote_base_pointers, run_scan, BatchRow, BitmapStore, ScanContext,
    ScanFindings,
};
use crate::system::SystemDescriptor;
use crate::Address;

/// What a finished (or cleanly cancelled) run produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct Summary {
    pub static_lists: usize,
    pub dynamic_lists: usize,
    pub entry_points: usize,
    pub target_paths: usize,
    pub findings_streamed: usize,
    pub cancelled: bool,
}

/// Run the full analysis over collapsed pools. Findings stream to
/// `encoder` as they are finalised; the summary only carries counts.
pub fn analyze(
    system: &SystemDescriptor,
    pools: CollapsedPools,
    config: &ScanConfig,
    injected_targets: &[Address],
    sink: &mut dyn EventSink,
    encoder: &mut dyn Encode,
) -> Result<Summary> {
    let config = config.clone().sanitized();
    let batch_count = pools.batch_count;
    let injected: HashSet<Address> = injected_targets.iter().copied().collect();
    let mut summary = Summary::default();

    if batch_count == 0 {
        for stage in [
            Stage::Static,
            Stage::Dynamic,
            Stage::Precompute,
            Stage::Scan,
            Stage::Generate,
        ] {
            sink.stage(stage, StageStatus::Skipped);
        }
        return Ok(summary);
    }

    info!(
        "analyzing {} nodes over {} batches on {}",
        pools.node_count(),
        batch_count,
        system.name
    );
    sink.progress(0, "classifying nodes");
    let batches = classify_nodes(&pools);

    let mut target_nodes: Vec<HashSet<Address>> = vec![injected.clone(); batch_count];
    let mut structures: Vec<Structure> = Vec::new();
    let mut entry_points: Vec<EntryPoint> = Vec::new();

    let CollapsedPools {
        static_statics,
        mut static_nodes,
        ..
    } = pools;

    // Static detection over the same-value pool
    sink.stage(Stage::Static, StageStatus::Active);
    let leftovers =
        detect::run_static_pass(static_statics, &config, &mut structures, &mut target_nodes);
    if config.skip_sticky_pointers {
        debug!("discarding {} sticky same-value leftovers", leftovers.len());
    } else {
        detect::promote_sticky(leftovers, batch_count, &mut static_nodes);
    }
    sink.stage(Stage::Static, StageStatus::Completed);
    summary.cancelled = sink.cancelled();

    // Dynamic detection per batch over the varying-value pool
    if summary.cancelled {
        sink.stage(Stage::Dynamic, StageStatus::Skipped);
    } else {
        sink.stage(Stage::Dynamic, StageStatus::Active);
        detect::run_dynamic_pass(
            &static_nodes,
            batch_count,
            &config,
            &mut structures,
            &mut entry_points,
            &mut target_nodes,
        );
        sink.stage(Stage::Dynamic, StageStatus::Completed);
        summary.cancelled = sink.cancelled();
    }

    summary.static_lists = count_kind(&structures, StructureKind::StaticList);
    summary.dynamic_lists = count_kind(&structures, StructureKind::DynamicList);
    summary.entry_points = entry_points.len();
    sink.counts(summary.static_lists, summary.dynamic_lists);

    let indexes = build_batch_indexes(&batches);
    let base_pointers = promote_base_pointers(&static_nodes, &target_nodes);
    debug!("{} base pointers promoted", base_pointers.len());

    // Bitmap precompute inside the scratch budget
    let mut bitmaps = None;
    if summary.cancelled {
        sink.stage(Stage::Precompute, StageStatus::Skipped);
    } else {
        sink.stage(Stage::Precompute, StageStatus::Active);
        let base_addresses: HashSet<Address> =
            base_pointers.iter().map(|base| base.address).collect();
        bitmaps = BitmapStore::precompute(&batches, &indexes, &base_addresses, config.max_breadth);
        let status = if bitmaps.is_some() {
            StageStatus::Completed
        } else {
            StageStatus::Skipped
        };
        sink.stage(Stage::Precompute, status);
        summary.cancelled = sink.cancelled();
    }

    let mut stream = FindingStream {
        encoder,
        ids: IdAllocator::new(),
        processed_roots: HashSet::new(),
        injected: &injected,
        streamed: 0,
    };

    // Forward scan, streaming findings every 1000 base pointers
    if summary.cancelled {
        sink.stage(Stage::Scan, StageStatus::Skipped);
    } else {
        sink.stage(Stage::Scan, StageStatus::Active);
        let context = ScanContext {
            system,
            config: &config,
            batches: &batches,
            indexes: &indexes,
            base_pointers: &base_pointers,
            bitmaps: bitmaps.as_ref(),
            injected: &injected,
            target_nodes: &target_nodes,
            structures: &structures,
            entry_points: &entry_points,
        };
        let outcome = run_scan(&context, sink, &mut |findings| {
            stream.flush(&structures, &entry_points, findings)
        });
        match outcome {
            Ok(stats) => {
                summary.entry_points += stats.entry_hits;
                summary.target_paths = stats.target_paths;
                summary.cancelled |= stats.cancelled;
                sink.stage(Stage::Scan, StageStatus::Completed);
            }
            Err(error) => {
                sink.stage(Stage::Scan, StageStatus::Error);
                return Err(error.in_stage(Stage::Scan));
            }
        }
    }

    // Final streaming: anything not yet sent (detection findings when the
    // scan was skipped, or the tail bundle)
    sink.stage(Stage::Generate, StageStatus::Active);
    let mut remainder = ScanFindings::default();
    if let Err(error) = stream.flush(&structures, &entry_points, &mut remainder) {
        sink.stage(Stage::Generate, StageStatus::Error);
        return Err(error.in_stage(Stage::Generate));
    }
    summary.findings_streamed = stream.streamed;
    sink.stage(Stage::Generate, StageStatus::Completed);
    sink.progress(100, "done");

    Ok(summary)
}

/// Rebuild the per-batch `(address, value)` views from the collapsed
/// pools: same-value nodes appear in every batch, varying nodes with that
/// batch's value, dynamic nodes only where present.
pub(crate) fn classify_nodes(pools: &CollapsedPools) -> Vec<Vec<BatchRow>> {
    let estimated =
        pools.static_statics.len() + pools.static_nodes.len() + pools.dynamic_nodes.len();
    let mut batches = vec![Vec::with_capacity(estimated); pools.batch_count];

    for entry in &pools.static_statics {
        for batch in batches.iter_mut() {
            batch.push(BatchRow {
                address: entry.address,
                value: entry.value,
            });
        }
    }
    for entry in &pools.static_nodes {
        for (batch, &value) in batches.iter_mut().zip(&entry.values) {
            batch.push(BatchRow {
                address: entry.address,
                value,
            });
        }
    }
    for entry in &pools.dynamic_nodes {
        for (batch, &value) in batches.iter_mut().zip(&entry.values) {
            if value != 0 {
                batch.push(BatchRow {
                    address: entry.address,
                    value,
                });
            }
        }
    }

    for batch in batches.iter_mut() {
        batch.sort_unstable_by_key(|row| row.address);
    }
    batches
}

fn count_kind(structures: &[Structure], kind: StructureKind) -> usize {
    structures
        .iter()
        .filter(|structure| structure.kind == kind)
        .count()
}

/// Streams findings to the encoder exactly once per root: roots enter
/// `processed_roots` as they go out, so repeated bundles never duplicate.
struct FindingStream<'a> {
    encoder: &'a mut dyn Encode,
    ids: IdAllocator,
    processed_roots: HashSet<Address>,
    injected: &'a HashSet<Address>,
    streamed: usize,
}

impl FindingStream<'_> {
    fn flush(
        &mut self,
        structures: &[Structure],
        entry_points: &[EntryPoint],
        findings: &mut ScanFindings,
    ) -> Result<()> {
        for structure in structures {
            if self.processed_roots.contains(&structure.root) {
                continue;
            }
            let finding = self.structure_finding(structure);
            self.emit(structure.root, finding)?;
        }
        for entry in entry_points {
            if self.processed_roots.contains(&entry.root) {
                continue;
            }
            let finding = self.entry_finding(entry, structures);
            self.emit(entry.root, finding)?;
        }
        for entry in std::mem::take(&mut findings.entry_points) {
            if self.processed_roots.contains(&entry.root) {
                continue;
            }
            let finding = self.entry_finding(&entry, structures);
            self.emit(entry.root, finding)?;
        }
        for path in std::mem::take(&mut findings.target_paths) {
            let finding = self.target_path_finding(&path);
            self.encoder.encode(&finding)?;
            self.streamed += 1;
        }
        Ok(())
    }

    fn emit(&mut self, root: Address, finding: Finding) -> Result<()> {
        self.encoder.encode(&finding)?;
        self.processed_roots.insert(root);
        self.streamed += 1;
        Ok(())
    }

    fn covers_target(&self, addresses: &[Address]) -> bool {
        addresses.iter().any(|address| self.injected.contains(address))
    }

    fn structure_finding(&mut self, structure: &Structure) -> Finding {
        let is_target = self.covers_target(&structure.addresses);
        Finding {
            id: self.ids.allocate(structure.kind, is_target),
            kind: structure.kind,
            root: structure.root,
            node_count: structure.node_count(),
            addresses: structure.addresses.clone(),
            ghosts: structure.ghosts.clone(),
            stride: Some(structure.stride),
            path: Vec::new(),
            build_offset: Some(structure.build_offset),
            target_address: None,
            is_target,
        }
    }

    fn entry_finding(&mut self, entry: &EntryPoint, structures: &[Structure]) -> Finding {
        // A grouped hit covers targets through its structure's addresses
        let is_target = self.covers_target(&entry.addresses)
            || entry
                .target_struct
                .and_then(|id| structures.get(id as usize))
                .is_some_and(|structure| self.covers_target(&structure.addresses));
        Finding {
            id: self.ids.allocate(StructureKind::EntryPoint, is_target),
            kind: StructureKind::EntryPoint,
            root: entry.root,
            node_count: entry.addresses.len(),
            addresses: entry.addresses.clone(),
            ghosts: Vec::new(),
            stride: None,
            path: entry.path.clone(),
            build_offset: Some(entry.build_offset),
            target_address: None,
            is_target,
        }
    }

    fn target_path_finding(&mut self, path: &TargetPath) -> Finding {
        Finding {
            id: self.ids.allocate(StructureKind::EntryPoint, true),
            kind: StructureKind::EntryPoint,
            root: path.base_pointer,
            node_count: 0,
            addresses: Vec::new(),
            ghosts: Vec::new(),
            stride: None,
            path: path.path.clone(),
            build_offset: None,
            target_address: Some(path.target),
            is_target: true,
        }
    }
}
