use anyhow::{bail, Result};

use crate::format::elf::{Rel, R_386_OZRELSEG16, R_386_OZSEG16};
use crate::format::mz::MAX_MZ_RELOCATIONS;
use crate::format::Region;
use crate::resolver::ProgramSections;

/// The MZ relocation-count header field is 16 bits; one region may not
/// contribute more than this many load-time fixups.
pub const MAX_REGION_RELOCATIONS: usize = 0x8000;

/// A segment value that may not be known yet. Placeholders carry the
/// owning region and are substituted once the layout is fixed, so no
/// legitimate segment number can collide with a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRef {
    Unresolved(Region),
    Resolved(u16),
}

/// One future MZ relocation-table record, offset already truncated to
/// the 16-bit in-segment form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRelocation {
    pub offset: u16,
    pub segment: SegmentRef,
}

/// Records converted from the per-region relocation sections, bounded
/// by the 32-entry header table.
#[derive(Debug, Default)]
pub struct RelocationTable {
    pub records: Vec<TableRelocation>,
    pub dropped: usize,
}

/// Load-time fixup locations from the dynamic stream, grouped by the
/// region containing the target address. Each entry is the 16-bit
/// in-segment offset of the word to fix up.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DynamicRelocations {
    pub text: Vec<u16>,
    pub ftext: Vec<u16>,
    pub data: Vec<u16>,
}

impl DynamicRelocations {
    #[must_use]
    pub fn by_region(&self, region: Region) -> &[u16] {
        match region {
            Region::Text => &self.text,
            Region::FarText => &self.ftext,
            Region::Data => &self.data,
            Region::Bss => &[],
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.text.len() + self.ftext.len() + self.data.len()
    }
}

/// Walks the dynamic relocation stream, classifying every record by
/// containment into the text, far text or data region.
///
/// # Errors
/// A target outside all three regions, or more than 0x8000 records for
/// any one region, is fatal.
pub fn process_dynamic_stream(
    sections: &ProgramSections,
    verbose: bool,
) -> Result<DynamicRelocations> {
    let mut dynamic = DynamicRelocations::default();

    if let Some(records) = &sections.rel_dyn {
        for rel in records {
            let Some(region) = classify_target(rel.addr, sections) else {
                bail!("stray relocation outside text and data sections!");
            };
            let bucket = match region {
                Region::Text => &mut dynamic.text,
                Region::FarText => &mut dynamic.ftext,
                Region::Data => &mut dynamic.data,
                Region::Bss => bail!("stray relocation outside text and data sections!"),
            };
            bucket.push(rel.addr as u16);
            if bucket.len() > MAX_REGION_RELOCATIONS {
                bail!("too many {} segment relocations", region.nature());
            }
        }
    }

    if verbose {
        println!(
            "{} text reloc(s)., {} far text reloc(s)., {} data reloc(s).",
            dynamic.text.len(),
            dynamic.ftext.len(),
            dynamic.data.len()
        );
    }

    Ok(dynamic)
}

fn classify_target(addr: u32, sections: &ProgramSections) -> Option<Region> {
    for region in [Region::Text, Region::FarText, Region::Data] {
        if sections
            .region(region)
            .is_some_and(|section| section.contains(addr))
        {
            return Some(region);
        }
    }
    None
}

/// Converts the `.rel.text` and `.rel.data` streams into header-table
/// records. Only the two segment-relative types mean anything here:
/// type 80 yields a record with an unresolved segment placeholder;
/// type 81 has no MZ encoding yet and is reported, not fatal. Records
/// past the 32-entry capacity are counted and dropped with a
/// diagnostic.
#[must_use]
pub fn collect_table_relocations(sections: &ProgramSections, verbose: bool) -> RelocationTable {
    let mut table = RelocationTable::default();
    if let Some(records) = &sections.rel_text {
        convert_stream(&mut table, records, Region::Text, verbose);
    }
    if let Some(records) = &sections.rel_data {
        convert_stream(&mut table, records, Region::Data, verbose);
    }
    table
}

fn convert_stream(table: &mut RelocationTable, records: &[Rel], region: Region, verbose: bool) {
    for rel in records {
        match rel.rel_type {
            R_386_OZRELSEG16 => {
                eprintln!(
                    "relative segment relocation at {:#010x}: not handled yet",
                    rel.addr
                );
            }
            R_386_OZSEG16 => {
                if verbose {
                    println!(
                        "segment relocation at {:#010x} in {}",
                        rel.addr,
                        region.nature()
                    );
                }
                if table.records.len() < MAX_MZ_RELOCATIONS {
                    table.records.push(TableRelocation {
                        offset: rel.addr as u16,
                        segment: SegmentRef::Unresolved(region),
                    });
                } else {
                    if table.dropped == 0 {
                        eprintln!("MZ relocation table exceeded; dropping further entries");
                    }
                    table.dropped += 1;
                }
            }
            _ => {} // other relocation types have no MZ counterpart
        }
    }
}
