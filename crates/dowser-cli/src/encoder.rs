//! Condition-line encoder.
//!
//! Turns each finding into one line of achievement-logic condition text.
//! The format is consumed by external monitoring tooling and is opaque to
//! the analysis core.

use std::io::Write;

use dowser_core::{Encode, Finding, Result, StructureKind, SystemDescriptor};

pub struct ConditionEncoder<W: Write> {
    writer: W,
    size_prefix: &'static str,
    pub lines: usize,
}

impl<W: Write> ConditionEncoder<W> {
    pub fn new(writer: W, system: &SystemDescriptor) -> Self {
        Self {
            writer,
            size_prefix: system.size_prefix(),
            lines: 0,
        }
    }

    fn kind_tag(kind: StructureKind) -> &'static str {
        match kind {
            StructureKind::StaticList => "static_list",
            StructureKind::DynamicList => "dynamic_list",
            StructureKind::EntryPoint => "entry_point",
        }
    }
}

impl<W: Write> Encode for ConditionEncoder<W> {
    fn encode(&mut self, finding: &Finding) -> Result<()> {
        let mut line = format!(
            "C{}:{} [{}] root=0x{:08X} nodes={}",
            finding.id,
            Self::kind_tag(finding.kind),
            self.size_prefix,
            finding.root,
            finding.node_count,
        );
        if let Some(stride) = finding.stride {
            line.push_str(&format!(" stride={}", stride));
        }
        if let Some(offset) = finding.build_offset {
            line.push_str(&format!(" offset=0x{:02X}", offset));
        }
        if !finding.path.is_empty() {
            let hops: Vec<String> = finding
                .path
                .iter()
                .map(|hop| format!("+0x{:X}", hop))
                .collect();
            line.push_str(&format!(" path={}", hops.join("->")));
        }
        if let Some(target) = finding.target_address {
            line.push_str(&format!(" target=0x{:08X}", target));
        }
        if !finding.ghosts.is_empty() {
            line.push_str(&format!(" ghosts={}", finding.ghosts.len()));
        }
        if finding.is_target {
            line.push_str(" !");
        }
        writeln!(self.writer, "{}", line)?;
        self.lines += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_static_list_line() {
        let system = SystemDescriptor::lookup("gamecube").unwrap();
        let mut buffer = Vec::new();
        let mut encoder = ConditionEncoder::new(&mut buffer, system);
        encoder
            .encode(&Finding {
                id: 100_000,
                kind: StructureKind::StaticList,
                root: 0x8000_0100,
                node_count: 6,
                addresses: vec![0x8000_0100],
                ghosts: vec![0x8000_0108],
                stride: Some(4),
                path: Vec::new(),
                build_offset: Some(0),
                target_address: None,
                is_target: false,
            })
            .unwrap();
        let line = String::from_utf8(buffer).unwrap();
        assert_eq!(
            line,
            "C100000:static_list [32-bit BE] root=0x80000100 nodes=6 stride=4 offset=0x00 ghosts=1\n"
        );
    }

    #[test]
    fn test_encode_target_path_line() {
        let system = SystemDescriptor::lookup("ps1").unwrap();
        let mut buffer = Vec::new();
        let mut encoder = ConditionEncoder::new(&mut buffer, system);
        encoder
            .encode(&Finding {
                id: 1_000,
                kind: StructureKind::EntryPoint,
                root: 0x8010_0000,
                node_count: 0,
                addresses: Vec::new(),
                ghosts: Vec::new(),
                stride: None,
                path: vec![0x4, 0x10],
                build_offset: None,
                target_address: Some(0x8020_0004),
                is_target: true,
            })
            .unwrap();
        let line = String::from_utf8(buffer).unwrap();
        assert_eq!(
            line,
            "C1000:entry_point [32-bit] root=0x80100000 nodes=0 path=+0x4->+0x10 target=0x80200004 !\n"
        );
    }
}
