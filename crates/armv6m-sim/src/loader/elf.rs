//! ELF loader, mirroring the pack's own `elf2tbf` host tool: a real parser
//! crate rather than a hand-rolled one.

use std::path::Path;

use anyhow::Context;
use elf::endian::AnyEndian;
use elf::abi::PT_LOAD;
use elf::ElfBytes;
use tracing::info;

use crate::cpu::Cpu;

/// Map each `PT_LOAD` segment, write its bytes, and return the entry point.
pub fn load_elf(cpu: &mut Cpu, path: &Path) -> anyhow::Result<u32> {
    let data = std::fs::read(path).with_context(|| format!("reading ELF {}", path.display()))?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(&data)
        .with_context(|| format!("parsing ELF header of {}", path.display()))?;

    let segments = file
        .segments()
        .with_context(|| format!("{} has no program headers", path.display()))?;

    for segment in segments.iter().filter(|s| s.p_type == PT_LOAD) {
        let base = segment.p_vaddr as u32;
        let mem_size = segment.p_memsz as u32;
        if mem_size == 0 {
            continue;
        }
        cpu.mem
            .map_backing(base, mem_size)
            .with_context(|| format!("mapping PT_LOAD segment at {base:#010x}"))?;

        let contents = file
            .segment_data(&segment)
            .with_context(|| format!("reading segment data at {base:#010x}"))?;
        for (i, byte) in contents.iter().enumerate() {
            cpu.mem
                .write_byte(base.wrapping_add(i as u32), *byte)
                .with_context(|| format!("writing segment byte {i} at {base:#010x}"))?;
        }
    }

    let entry = file.ehdr.e_entry as u32;
    info!(path = %path.display(), entry, "loaded ELF image");
    Ok(entry)
}

/// Resolve a symbol's address by name, used by the host to locate `vectors`
/// for vector-table-based boot.
pub fn find_symbol(path: &Path, name: &str) -> anyhow::Result<Option<u32>> {
    let data = std::fs::read(path).with_context(|| format!("reading ELF {}", path.display()))?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(&data)
        .with_context(|| format!("parsing ELF header of {}", path.display()))?;

    let Some((symbols, strings)) = file
        .symbol_table()
        .with_context(|| format!("reading symbol table of {}", path.display()))?
    else {
        return Ok(None);
    };

    for sym in symbols.iter() {
        if let Ok(sym_name) = strings.get(sym.st_name as usize) {
            if sym_name == name {
                return Ok(Some(sym.st_value as u32));
            }
        }
    }
    Ok(None)
}
