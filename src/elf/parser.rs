//! Byte-level ELF probe.
//!
//! Pulls out exactly what the resolver needs: the identification tuple,
//! DT_NEEDED/DT_RPATH/DT_RUNPATH from the dynamic table, and the
//! interpreter. Everything else in the file is ignored.

use anyhow::{Context, Result, anyhow};
use elf::ElfBytes;
use elf::abi;
use elf::endian::AnyEndian;
use elf::file::Class;
use log::{debug, warn};

use super::Elf;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Probe `data` as an ELF image.
///
/// Returns `Ok(None)` for data that is not an ELF file at all or not a
/// dynamic object (both are skipped silently by the loader), `Err` for
/// files that claim to be ELF but are truncated or inconsistent. The
/// caller fills in `dirname`/`basename` and runs
/// [`Elf::solve_paths`](super::Elf::solve_paths).
pub fn parse_elf(data: &[u8]) -> Result<Option<Elf>> {
    if data.len() < 4 || data[..4] != ELF_MAGIC {
        return Ok(None);
    }

    let file =
        ElfBytes::<AnyEndian>::minimal_parse(data).context("malformed ELF header")?;

    let ei_class = match file.ehdr.class {
        Class::ELF32 => abi::ELFCLASS32,
        Class::ELF64 => abi::ELFCLASS64,
    };
    let ei_data = match file.ehdr.endianness {
        AnyEndian::Little => abi::ELFDATA2LSB,
        AnyEndian::Big => abi::ELFDATA2MSB,
    };
    let ei_osabi = file.ehdr.osabi;
    if ei_osabi != abi::ELFOSABI_NONE
        && ei_osabi != abi::ELFOSABI_GNU
        && ei_osabi != abi::ELFOSABI_FREEBSD
    {
        warn!("osabi not recognized: {}", ei_osabi);
    }

    let Some(dynamic) = file.dynamic().context("malformed dynamic section")? else {
        debug!("not a dynamic object, no dynamic table");
        return Ok(None);
    };

    // First pass over the dynamic table: remember string offsets and find
    // the address of the dynamic string table.
    let mut strtab_addr = None;
    let mut needed_offs = Vec::new();
    let mut rpath_off = None;
    let mut runpath_off = None;
    for entry in dynamic.iter() {
        match entry.d_tag {
            abi::DT_STRTAB => strtab_addr = Some(entry.d_ptr()),
            abi::DT_NEEDED => needed_offs.push(entry.d_val() as usize),
            abi::DT_RPATH => rpath_off = Some(entry.d_val() as usize),
            abi::DT_RUNPATH => runpath_off = Some(entry.d_val() as usize),
            _ => {}
        }
    }
    let strtab_addr = strtab_addr.ok_or_else(|| anyhow!("no DT_STRTAB entry"))?;

    // The string table section is the SHT_STRTAB whose address matches
    // DT_STRTAB.
    let shdrs = file
        .section_headers()
        .ok_or_else(|| anyhow!("no section headers"))?;
    let strtab_shdr = shdrs
        .iter()
        .find(|s| s.sh_type == abi::SHT_STRTAB && s.sh_addr == strtab_addr)
        .ok_or_else(|| anyhow!("no string table matching DT_STRTAB"))?;
    let strtab = file
        .section_data_as_strtab(&strtab_shdr)
        .context("malformed dynamic string table")?;

    let get = |off: usize| -> Result<String> {
        strtab
            .get(off)
            .map(str::to_string)
            .context("out of bounds string table entry")
    };

    let mut needed = Vec::with_capacity(needed_offs.len());
    for off in needed_offs {
        needed.push(get(off)?);
    }
    let rpath = rpath_off.map(&get).transpose()?;
    let runpath = runpath_off.map(&get).transpose()?;

    let interpreter = match file.segments() {
        Some(segments) => segments
            .iter()
            .find(|p| p.p_type == abi::PT_INTERP)
            .map(|p| {
                let start = p.p_offset as usize;
                let end = start + p.p_filesz as usize;
                let raw = data
                    .get(start..end)
                    .ok_or_else(|| anyhow!("interpreter segment out of bounds"))?;
                let nul = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Ok::<String, anyhow::Error>(String::from_utf8_lossy(&raw[..nul]).into_owned())
            })
            .transpose()?,
        None => None,
    };

    Ok(Some(Elf {
        dirname: String::new(),
        basename: String::new(),
        ei_class,
        ei_data,
        ei_osabi,
        ei_abiversion: file.ehdr.abiversion,
        rpath,
        runpath,
        interpreter,
        needed,
    }))
}
