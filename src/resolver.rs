use anyhow::{bail, Result};

use crate::format::elf::{
    ElfFile, Rel, SectionHeader, Symbol, SHF_ALLOC, SHT_NOBITS, SHT_PROGBITS, SHT_REL, SHT_SYMTAB,
};
use crate::format::Region;

/// Value of a configuration symbol that was never assigned.
pub const UNSET: u16 = 0xffff;

/// A loadable region: one 64 KiB real-mode segment at most. BSS has no
/// file content, so `bytes` stays empty for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSection {
    pub addr: u32,
    pub size: u32,
    pub bytes: Vec<u8>,
}

impl RegionSection {
    #[must_use]
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.addr && addr < self.addr + self.size
    }
}

/// Everything later stages consume: classified region contents,
/// materialized relocation record streams, the symbol table, and the
/// text-relative entry offset. Raw input is not read again after this.
#[derive(Debug, Default)]
pub struct ProgramSections {
    pub text: Option<RegionSection>,
    pub ftext: Option<RegionSection>,
    pub data: Option<RegionSection>,
    pub bss: Option<RegionSection>,
    pub rel_text: Option<Vec<Rel>>,
    pub rel_data: Option<Vec<Rel>>,
    pub rel_dyn: Option<Vec<Rel>>,
    pub symbols: Vec<Symbol>,
    pub entry: u16,
}

impl ProgramSections {
    #[must_use]
    pub fn region(&self, region: Region) -> Option<&RegionSection> {
        match region {
            Region::Text => self.text.as_ref(),
            Region::FarText => self.ftext.as_ref(),
            Region::Data => self.data.as_ref(),
            Region::Bss => self.bss.as_ref(),
        }
    }
}

/// Scans the section records once and routes each into its semantic
/// role, validating bounds along the way. Also checks that the entry
/// point falls inside the text region.
///
/// # Errors
/// Fails on duplicate roles, stray allocatable sections, regions over
/// 64 KiB, 32-bit address wraparound, short or misaligned reads, and an
/// out-of-text entry point.
pub fn classify_sections(elf: &ElfFile, verbose: bool) -> Result<ProgramSections> {
    let mut text = None;
    let mut ftext = None;
    let mut data = None;
    let mut bss = None;
    let mut symtab = None;
    let mut rel_text = None;
    let mut rel_data = None;
    let mut rel_dyn = None;

    for section in elf.sections.iter().skip(1) {
        match section.sh_type {
            SHT_REL => {
                if section.name == ".rel.text" {
                    assign(&mut rel_text, section, ".rel.text", verbose)?;
                } else if section.name == ".rel.data" {
                    assign(&mut rel_data, section, ".rel.data", verbose)?;
                } else if section.info == 0 {
                    assign(&mut rel_dyn, section, "dynamic relocations", verbose)?;
                }
            }
            SHT_PROGBITS => {
                if section.name == ".text" {
                    assign(&mut text, section, "text", verbose)?;
                } else if section.name == ".fartext" {
                    assign(&mut ftext, section, "far text", verbose)?;
                } else if section.name == ".data" {
                    assign(&mut data, section, "data", verbose)?;
                } else if section.size != 0 && section.flags & SHF_ALLOC != 0 {
                    bail!(
                        "stray SHT_PROGBITS SHF_ALLOC section {:#x} `{}'",
                        section.index,
                        section.name
                    );
                }
            }
            SHT_NOBITS => {
                if section.name == ".bss" {
                    assign(&mut bss, section, "BSS", verbose)?;
                } else if section.size != 0 && section.flags & SHF_ALLOC != 0 {
                    bail!(
                        "stray SHT_NOBITS SHF_ALLOC section {:#x} `{}'",
                        section.index,
                        section.name
                    );
                }
            }
            SHT_SYMTAB => {
                if section.name == ".symtab" {
                    assign(&mut symtab, section, "symtab", verbose)?;
                } else if section.size != 0 && section.flags & SHF_ALLOC != 0 {
                    bail!(
                        "stray SHT_SYMTAB SHF_ALLOC section {:#x} `{}'",
                        section.index,
                        section.name
                    );
                }
            }
            _ => {} // other section types carry nothing we translate
        }
    }

    let text = load_region(elf, text, "text segment")?;
    let Some(text_region) = &text else {
        bail!("entry point outside near text segment");
    };
    if !text_region.contains(elf.entry) {
        bail!("entry point outside near text segment");
    }
    let entry = (elf.entry - text_region.addr) as u16;
    if verbose {
        println!("entry point at text offset {entry:#06x}");
    }

    let symbols = match symtab {
        Some(section) => elf.symbols(section)?,
        None => Vec::new(),
    };

    Ok(ProgramSections {
        ftext: load_region(elf, ftext, "far text segment")?,
        data: load_region(elf, data, "data segment")?,
        bss: bss.map(|section| RegionSection {
            addr: section.addr,
            size: section.size,
            bytes: Vec::new(),
        }),
        rel_text: load_rels(elf, rel_text, "text relocations")?,
        rel_data: load_rels(elf, rel_data, "data relocations")?,
        rel_dyn: load_rels(elf, rel_dyn, "dynamic relocations")?,
        symbols,
        entry,
        text,
    })
}

fn assign<'e>(
    slot: &mut Option<&'e SectionHeader>,
    section: &'e SectionHeader,
    nature: &str,
    verbose: bool,
) -> Result<()> {
    if slot.is_some() {
        bail!("cannot have more than one {nature} section!");
    }

    if verbose {
        println!("ELF section {:#x} -> {nature} section", section.index);
        println!(
            "\tvirt. addr. {:#x}, size {:#x}, file offset {:#x}",
            section.addr, section.size, section.offset
        );
    }

    if section.addr.checked_add(section.size).is_none() {
        bail!("malformed {nature} section: segment bounds wrap around!");
    }

    match section.sh_type {
        SHT_PROGBITS | SHT_NOBITS => {
            if section.size > 0xffff {
                bail!(
                    "{nature} section is too large ({:#x} > 0xffff)",
                    section.size
                );
            }
        }
        _ => {}
    }

    *slot = Some(section);
    Ok(())
}

fn load_region(
    elf: &ElfFile,
    section: Option<&SectionHeader>,
    nature: &'static str,
) -> Result<Option<RegionSection>> {
    let Some(section) = section else {
        return Ok(None);
    };
    let bytes = elf.section_bytes(section, nature)?.to_vec();
    Ok(Some(RegionSection {
        addr: section.addr,
        size: section.size,
        bytes,
    }))
}

fn load_rels(
    elf: &ElfFile,
    section: Option<&SectionHeader>,
    nature: &'static str,
) -> Result<Option<Vec<Rel>>> {
    match section {
        Some(section) => Ok(Some(elf.rel_records(section, nature)?)),
        None => Ok(None),
    }
}

/// The six 16-bit configuration values the startup code exports by
/// symbol name. Anything never assigned keeps the all-ones sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoSymbols {
    pub data_addr: u16,
    pub data_loadaddr: u16,
    pub data_size: u16,
    pub start_ip: u16,
    pub start_cs: u16,
    pub heap_top: u16,
}

impl Default for InfoSymbols {
    fn default() -> Self {
        InfoSymbols {
            data_addr: UNSET,
            data_loadaddr: UNSET,
            data_size: UNSET,
            start_ip: UNSET,
            start_cs: UNSET,
            heap_top: UNSET,
        }
    }
}

/// Scans the symbol table once for the recognized `__msdos_info_*`
/// names, truncating each value to 16 bits. Near-miss names sharing the
/// `__msdos_info` prefix are reported but never fatal.
#[must_use]
pub fn extract_info_symbols(symbols: &[Symbol]) -> InfoSymbols {
    let mut info = InfoSymbols::default();

    for sym in symbols {
        let value = sym.value as u16;
        match sym.name.as_str() {
            "__msdos_info_data_addr" => info.data_addr = value,
            "__msdos_info_data_loadaddr" => info.data_loadaddr = value,
            "__msdos_info_data_size" => info.data_size = value,
            "__msdos_info_start_cs" => info.start_cs = value,
            "__msdos_info_start_ip" => info.start_ip = value,
            "__msdos_info_heap_top" => info.heap_top = value,
            name if name.starts_with("__msdos_info") => {
                eprintln!("unrecognized info symbol {name} = {:#06x}", sym.value);
            }
            _ => {}
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::{classify_sections, extract_info_symbols, UNSET};
    use crate::format::elf::testing::{build_elf, SectionSpec};
    use crate::format::elf::{parse_elf, Symbol, SHF_ALLOC};
    use pretty_assertions::assert_eq;

    fn text_spec(size: usize) -> SectionSpec {
        SectionSpec::progbits(".text", SHF_ALLOC, 0, vec![0x90; size])
    }

    #[test]
    fn classifies_minimal_text_program() {
        let image = build_elf(0x10, vec![text_spec(0x40)]);
        let elf = parse_elf(&image).expect("parse");
        let sections = classify_sections(&elf, false).expect("classify");

        let text = sections.text.expect("text region");
        assert_eq!(text.size, 0x40);
        assert_eq!(text.bytes.len(), 0x40);
        assert_eq!(sections.entry, 0x10);
        assert!(sections.ftext.is_none());
        assert!(sections.rel_dyn.is_none());
    }

    #[test]
    fn classifies_bss_without_content() {
        let image = build_elf(
            0,
            vec![
                text_spec(4),
                SectionSpec::nobits(".bss", SHF_ALLOC, 0x3000, 0x40),
            ],
        );
        let elf = parse_elf(&image).expect("parse");
        let sections = classify_sections(&elf, false).expect("classify");

        let bss = sections.bss.expect("bss region");
        assert_eq!(bss.addr, 0x3000);
        assert_eq!(bss.size, 0x40);
        assert!(bss.bytes.is_empty());
    }

    #[test]
    fn rejects_duplicate_text_section() {
        let image = build_elf(0, vec![text_spec(2), text_spec(2)]);
        let elf = parse_elf(&image).expect("parse");
        let err = classify_sections(&elf, false).expect_err("duplicate must fail");
        assert!(err.to_string().contains("more than one text section"));
    }

    #[test]
    fn rejects_stray_allocatable_section() {
        let image = build_elf(
            0,
            vec![
                text_spec(4),
                SectionSpec::progbits(".rodata", SHF_ALLOC, 0x200, vec![1, 2, 3]),
            ],
        );
        let elf = parse_elf(&image).expect("parse");
        let err = classify_sections(&elf, false).expect_err("stray must fail");
        assert!(err.to_string().contains("stray"));
        assert!(err.to_string().contains(".rodata"));
    }

    #[test]
    fn ignores_empty_or_unallocated_extra_sections() {
        let image = build_elf(
            0,
            vec![
                text_spec(4),
                SectionSpec::progbits(".comment", 0, 0, vec![b'x']),
                SectionSpec::progbits(".empty", SHF_ALLOC, 0x400, vec![]),
            ],
        );
        let elf = parse_elf(&image).expect("parse");
        classify_sections(&elf, false).expect("extras must be tolerated");
    }

    #[test]
    fn accepts_full_segment_and_rejects_oversized() {
        let image = build_elf(0, vec![text_spec(0xffff)]);
        let elf = parse_elf(&image).expect("parse");
        classify_sections(&elf, false).expect("0xffff bytes is the limit");

        let image = build_elf(0, vec![text_spec(0x10000)]);
        let elf = parse_elf(&image).expect("parse");
        let err = classify_sections(&elf, false).expect_err("64 KiB + 1 must fail");
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn rejects_address_wraparound() {
        let image = build_elf(
            0xffff_fff0,
            vec![SectionSpec::progbits(
                ".text",
                SHF_ALLOC,
                0xffff_fff0,
                vec![0x90; 0x20],
            )],
        );
        let elf = parse_elf(&image).expect("parse");
        let err = classify_sections(&elf, false).expect_err("wraparound must fail");
        assert!(err.to_string().contains("wrap around"));
    }

    #[test]
    fn rejects_entry_point_outside_text() {
        let image = build_elf(0x100, vec![text_spec(0x40)]);
        let elf = parse_elf(&image).expect("parse");
        let err = classify_sections(&elf, false).expect_err("entry check must fail");
        assert!(err.to_string().contains("entry point"));
    }

    #[test]
    fn routes_relocation_sections_by_name_then_scope() {
        let image = build_elf(
            0,
            vec![
                text_spec(0x10),
                SectionSpec::rel(".rel.text", 1, &[(0x4, 80)]),
                SectionSpec::rel(".rel.dyn", 0, &[(0x0, 48)]),
            ],
        );
        let elf = parse_elf(&image).expect("parse");
        let sections = classify_sections(&elf, false).expect("classify");

        assert_eq!(sections.rel_text.expect("rel.text").len(), 1);
        assert_eq!(sections.rel_dyn.expect("rel.dyn").len(), 1);
        assert!(sections.rel_data.is_none());
    }

    #[test]
    fn extracts_recognized_info_symbols() {
        let symbols = vec![
            Symbol {
                name: "__msdos_info_data_size".into(),
                value: 0x1_2345,
            },
            Symbol {
                name: "__msdos_info_start_ip".into(),
                value: 0x50,
            },
            Symbol {
                name: "__msdos_info_bogus".into(),
                value: 7,
            },
            Symbol {
                name: "main".into(),
                value: 0x10,
            },
        ];

        let info = extract_info_symbols(&symbols);
        assert_eq!(info.data_size, 0x2345); // truncated to 16 bits
        assert_eq!(info.start_ip, 0x50);
        assert_eq!(info.data_addr, UNSET);
        assert_eq!(info.heap_top, UNSET);
    }
}
