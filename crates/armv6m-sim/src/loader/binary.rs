//! Raw binary loader: one backing region, streamed bytes, start = base.

use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::cpu::Cpu;

/// Map `[base, base+size)` and stream `path`'s bytes into it starting at
/// `base`. Returns the start address (always `base`).
pub fn load_binary(cpu: &mut Cpu, path: &Path, base: u32, size: u32) -> anyhow::Result<u32> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading raw binary {}", path.display()))?;
    if bytes.len() as u64 > size as u64 {
        anyhow::bail!(
            "{} is {} bytes, larger than the configured {}-byte region at {:#010x}",
            path.display(),
            bytes.len(),
            size,
            base
        );
    }

    cpu.mem
        .map_backing(base, size)
        .with_context(|| format!("mapping {size:#x} bytes at {base:#010x}"))?;

    for (i, byte) in bytes.iter().enumerate() {
        cpu.mem
            .write_byte(base.wrapping_add(i as u32), *byte)
            .with_context(|| format!("writing byte {i} of raw binary"))?;
    }

    info!(path = %path.display(), base, size = bytes.len(), "loaded raw binary");
    Ok(base)
}
