//! Finding records and the encoder-facing surface.
//!
//! Structures and entry points live in plain vectors owned by the
//! pipeline; anything that needs to refer to one does so by its small
//! integer id, never by reference. The encoder consumes flattened
//! [`Finding`] records and turns each into one opaque condition
//! expression; what those expressions look like is not this crate's
//! concern.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    StaticList,
    DynamicList,
    EntryPoint,
}

/// A detected list: an array of objects or a linked chain found at a fixed
/// build offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Structure {
    /// Arena id; stable for the run, assigned in detection order
    pub id: u32,
    pub kind: StructureKind,
    /// First walked node
    pub root: Address,
    /// Member addresses, ascending
    pub addresses: Vec<Address>,
    /// Bridged-over addresses missing from the pool, ascending
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ghosts: Vec<Address>,
    /// Dominant step between consecutive members
    pub stride: u32,
    /// Offset the chain walker followed
    pub build_offset: u32,
    /// Which snapshot produced the chain (dynamic lists only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
}

impl Structure {
    pub fn node_count(&self) -> usize {
        self.addresses.len()
    }
}

/// A pointer chain that terminates inside an already-known target set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPoint {
    pub root: Address,
    /// Chain member addresses, ascending; empty for scan-phase upgrades
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<Address>,
    /// Offset of the chain's final hop
    pub build_offset: u32,
    /// Offset sequence from a base pointer
    pub path: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
    /// Structure this entry point resolved into, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_struct: Option<u32>,
    /// Set when a scan hit merged a moving structure into this record
    #[serde(default)]
    pub moving: bool,
    #[serde(default)]
    pub claimed: bool,
}

/// A multi-hop path from a base pointer to an injected target address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetPath {
    pub base_pointer: Address,
    pub path: Vec<u32>,
    pub target: Address,
}

/// Flattened record handed to the encoder, one per finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: u32,
    pub kind: StructureKind,
    pub root: Address,
    pub node_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ghosts: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stride: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_address: Option<Address>,
    /// Whether the finding covers a user-supplied target address
    pub is_target: bool,
}

/// Turns findings into opaque condition expressions.
pub trait Encode {
    fn encode(&mut self, finding: &Finding) -> Result<()>;
}

/// Encoder that keeps findings in memory, for hosts and tests that want
/// the records rather than the expressions.
#[derive(Debug, Default)]
pub struct CollectingEncoder {
    pub findings: Vec<Finding>,
}

impl Encode for CollectingEncoder {
    fn encode(&mut self, finding: &Finding) -> Result<()> {
        self.findings.push(finding.clone());
        Ok(())
    }
}

/// Base of the id series reserved for target-covering findings.
const TARGET_ID_BASE: u32 = 1_000;
/// Base of the id series for static lists.
const STATIC_ID_BASE: u32 = 100_000;
/// Base of the id series for everything else.
const GENERAL_ID_BASE: u32 = 10_000;

/// Allocates encoder-facing ids. Target coverage takes precedence over
/// kind: a target-covering static list draws from the low series.
#[derive(Debug)]
pub struct IdAllocator {
    next_target: u32,
    next_static: u32,
    next_general: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next_target: TARGET_ID_BASE,
            next_static: STATIC_ID_BASE,
            next_general: GENERAL_ID_BASE,
        }
    }

    pub fn allocate(&mut self, kind: StructureKind, is_target: bool) -> u32 {
        let series = if is_target {
            &mut self.next_target
        } else if kind == StructureKind::StaticList {
            &mut self.next_static
        } else {
            &mut self.next_general
        };
        let id = *series;
        *series += 1;
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Save findings as pretty JSON
pub fn save_findings<P: AsRef<Path>>(path: P, findings: &[Finding]) -> Result<()> {
    let content = serde_json::to_string_pretty(findings)?;
    fs::write(path, content)?;
    Ok(())
}

/// Load findings saved with [`save_findings`]
pub fn load_findings<P: AsRef<Path>>(path: P) -> Result<Vec<Finding>> {
    let content = fs::read_to_string(path)?;
    let findings = serde_json::from_str(&content)?;
    Ok(findings)
}
