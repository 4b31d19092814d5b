//! Analyze command implementation.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use dowser_core::{Preprocessor, ScanConfig, SystemDescriptor};

use crate::batch::{self, load_batch_csv};
use crate::encoder::ConditionEncoder;
use crate::sink::ConsoleSink;

pub fn run(
    system_id: &str,
    batches: &[std::path::PathBuf],
    targets: Option<&str>,
    output: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<()> {
    println!("Dowser {} - Snapshot Analysis", env!("CARGO_PKG_VERSION"));

    let system = SystemDescriptor::lookup(system_id)?;
    let mut preprocessor = Preprocessor::new(system_id)?;

    for path in batches {
        let batch = load_batch_csv(path, system)?;
        let stats = preprocessor.add_batch(&batch.addresses, &batch.values)?;
        println!(
            "{}: {} rows kept ({} anchor, {} self-ref, {} invalid), pool at {}",
            path.display(),
            stats.kept,
            stats.vtable_filtered,
            stats.self_ref_filtered,
            batch.skipped,
            stats.pool_size,
        );
    }

    let config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<ScanConfig>(&content)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => ScanConfig::default(),
    };

    let counts = preprocessor.counts_with_threshold(config.warn_base_pointer_threshold);
    if let Some(warning) = &counts.recommendation.warning {
        println!("warning: {}", warning);
    }

    let injected = match targets {
        Some(text) => batch::parse_targets(text)?,
        None => Vec::new(),
    };

    let pools = preprocessor.collapse()?;
    let mut sink = ConsoleSink::default();

    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    };
    let mut encoder = ConditionEncoder::new(writer, system);

    let summary = dowser_core::analyze(system, pools, &config, &injected, &mut sink, &mut encoder)?;

    println!();
    if summary.cancelled {
        println!("Analysis cancelled; partial findings were written.");
    }
    println!(
        "{} static lists, {} dynamic lists, {} entry points, {} target paths ({} conditions written)",
        summary.static_lists,
        summary.dynamic_lists,
        summary.entry_points,
        summary.target_paths,
        summary.findings_streamed,
    );

    Ok(())
}
