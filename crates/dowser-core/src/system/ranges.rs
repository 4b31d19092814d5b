//! Range subdivision.
//!
//! A system's memory space is carved into 1, 2, or 4 labelled ranges that
//! cover it contiguously, with every boundary 4-byte aligned. Range
//! indices gate where the forward scan is allowed to start.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::MemoryRegion;
use crate::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeMode {
    Full,
    Half,
    // "quater" is a legacy spelling kept alive in old catalogue exports
    #[serde(alias = "quater")]
    Quarter,
    Dual,
}

impl FromStr for RangeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(RangeMode::Full),
            "half" => Ok(RangeMode::Half),
            "quarter" | "quater" => Ok(RangeMode::Quarter),
            "dual" => Ok(RangeMode::Dual),
            other => Err(format!("unknown range mode '{}'", other)),
        }
    }
}

impl fmt::Display for RangeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RangeMode::Full => "full",
            RangeMode::Half => "half",
            RangeMode::Quarter => "quarter",
            RangeMode::Dual => "dual",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryRange {
    pub label: &'static str,
    pub min: Address,
    pub max: Address,
}

pub(super) fn subdivide(
    mode: RangeMode,
    primary: MemoryRegion,
    secondary: Option<MemoryRegion>,
) -> Vec<MemoryRange> {
    match mode {
        RangeMode::Full => vec![MemoryRange {
            label: "full",
            min: primary.min,
            max: primary.max,
        }],
        RangeMode::Half => split_half(primary, ["lower", "upper"]),
        RangeMode::Quarter => split_quarter(primary),
        RangeMode::Dual => {
            let secondary =
                secondary.expect("dual range mode requires a secondary region");
            let mut ranges = split_half(primary, ["r1-lower", "r1-upper"]);
            ranges.extend(split_half(secondary, ["r2-lower", "r2-upper"]));
            ranges
        }
    }
}

fn split_half(region: MemoryRegion, labels: [&'static str; 2]) -> Vec<MemoryRange> {
    let mid = region.min + ((region.len_bytes() / 2) & !3);
    vec![
        MemoryRange {
            label: labels[0],
            min: region.min,
            max: mid - 4,
        },
        MemoryRange {
            label: labels[1],
            min: mid,
            max: region.max,
        },
    ]
}

fn split_quarter(region: MemoryRegion) -> Vec<MemoryRange> {
    const LABELS: [&str; 4] = ["q1", "q2", "q3", "q4"];
    let step = (region.len_bytes() / 4) & !3;
    (0..4)
        .map(|i| MemoryRange {
            label: LABELS[i as usize],
            min: region.min + i * step,
            // The last quarter absorbs any remainder
            max: if i == 3 {
                region.max
            } else {
                region.min + (i + 1) * step - 4
            },
        })
        .collect()
}
