//! Systems listing command.

use anyhow::Result;

use dowser_core::SystemDescriptor;

pub fn run() -> Result<()> {
    for system in SystemDescriptor::all() {
        let mask = match system.mask {
            Some(mask) => format!("0x{:08X}", mask),
            None => "-".to_string(),
        };
        println!(
            "{:<10} {:<9} mask={} regions: 0x{:08X}-0x{:08X}{}",
            system.name,
            system.size_prefix(),
            mask,
            system.primary.min,
            system.primary.max,
            match system.secondary {
                Some(region) => format!(" + 0x{:08X}-0x{:08X}", region.min, region.max),
                None => String::new(),
            },
        );
        for (index, range) in system.ranges().iter().enumerate() {
            println!(
                "    range {}: {:<9} 0x{:08X}-0x{:08X}",
                index, range.label, range.min, range.max
            );
        }
    }
    Ok(())
}
