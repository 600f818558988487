use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

use crate::format::mz::{
    round_up_to_paragraph, MzHeader, MzRelocation, MZ_HEADER_BYTES, MZ_SIGNATURE, PAGE_BYTES,
    PARAGRAPH_BYTES,
};
use crate::format::Region;
use crate::layout::SegmentLayout;
use crate::relocs::{DynamicRelocations, RelocationTable};
use crate::resolver::{InfoSymbols, ProgramSections};

/// Builds the MZ header plus its relocation table as one buffer whose
/// length is the paragraph-rounded header size.
///
/// All header arithmetic wraps at 16 bits, the native width of every
/// field in the target format. The collected relocation records were
/// relative to the start of the file; the loader expects them relative
/// to the end of the header, hence the per-record offset/segment
/// adjustment.
///
/// # Errors
/// Fails when a relocation placeholder cannot be resolved against the
/// layout.
pub fn build_header(
    info: &InfoSymbols,
    table: &RelocationTable,
    layout: &SegmentLayout,
) -> Result<Vec<u8>> {
    let record_count = table.records.len() as u16;
    let header_size = round_up_to_paragraph(MZ_HEADER_BYTES + 4 * record_count);
    let header_paragraphs = header_size / PARAGRAPH_BYTES;

    let image_end = header_size
        .wrapping_add(info.data_loadaddr)
        .wrapping_add(info.data_size);
    let min_alloc = (0u16
        .wrapping_sub(info.data_size)
        .wrapping_sub(info.data_addr)
        / PARAGRAPH_BYTES)
        .wrapping_sub(header_paragraphs);

    let header = MzHeader {
        signature: MZ_SIGNATURE,
        last_page_bytes: image_end % PAGE_BYTES,
        number_of_pages: image_end.div_ceil(PAGE_BYTES),
        number_of_relocation_entries: record_count,
        number_of_header_paragraphs: header_paragraphs,
        minimum_allocated_paragraphs: min_alloc,
        maximum_allocated_paragraphs: min_alloc,
        // DS == SS
        initial_ss: (info.data_loadaddr / PARAGRAPH_BYTES).wrapping_sub(header_paragraphs),
        initial_sp: 0,
        checksum: 0,
        initial_ip: info.start_ip.wrapping_add(header_size),
        initial_cs: info.start_cs.wrapping_sub(header_paragraphs),
        relocation_offset: MZ_HEADER_BYTES,
        overlay_number: 0,
    };

    let mut buf = Vec::with_capacity(header_size as usize);
    header.encode(&mut buf)?;
    for record in &table.records {
        let segment = layout.resolve(record.segment)?;
        MzRelocation {
            offset: record.offset.wrapping_add(header_size),
            segment: segment.wrapping_sub(header_paragraphs),
        }
        .encode(&mut buf)?;
    }
    buf.resize(header_size as usize, 0);
    Ok(buf)
}

/// Assembles the complete output image: header and table, then the
/// text, far text and data contents in that order.
///
/// Non-ROMable output appends one external relocation entry per
/// dynamic-stream record so the loader can fix the image up at load
/// time. ROMable output instead patches every fixup word with its
/// resolved absolute segment right here, and carries no table.
///
/// # Errors
/// Fails on unresolvable placeholders and on fixup offsets outside
/// their region's content.
pub fn build_image(
    sections: &ProgramSections,
    info: &InfoSymbols,
    table: &RelocationTable,
    dynamic: &DynamicRelocations,
    layout: &SegmentLayout,
    romable: bool,
) -> Result<Vec<u8>> {
    let mut image = build_header(info, table, layout)?;

    for region in [Region::Text, Region::FarText, Region::Data] {
        let Some(section) = sections.region(region) else {
            continue;
        };
        let fixups = dynamic.by_region(region);
        if !romable || fixups.is_empty() {
            image.extend_from_slice(&section.bytes);
        } else {
            let segment = layout.segment_of(region)?;
            image.extend_from_slice(&patch_region(section.bytes.clone(), fixups, segment, region)?);
        }
    }

    if !romable && dynamic.total() != 0 {
        for region in [Region::Text, Region::FarText, Region::Data] {
            let segment = layout.segment_of(region)?;
            for &offset in dynamic.by_region(region) {
                MzRelocation { offset, segment }.encode(&mut image)?;
            }
        }
    }

    Ok(image)
}

fn patch_region(
    mut bytes: Vec<u8>,
    fixups: &[u16],
    segment: u16,
    region: Region,
) -> Result<Vec<u8>> {
    for &offset in fixups {
        let at = offset as usize;
        let Some(word) = bytes.get_mut(at..at + 2) else {
            bail!(
                "relocation offset {:#06x} outside {} segment contents",
                offset,
                region.nature()
            );
        };
        word.copy_from_slice(&segment.to_le_bytes());
    }
    Ok(bytes)
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Scratch output path that is deleted on drop unless persisted, so a
/// failed conversion never leaves anything at the published path.
struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    fn for_output(output: &Path) -> TempFile {
        let stem = output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_string());
        let dir = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let pid = std::process::id();
        let id = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        TempFile {
            path: dir.join(format!(".{stem}.{pid}.{id}.tmp")),
            keep: false,
        }
    }

    fn persist(mut self, output: &Path) -> std::io::Result<()> {
        fs::rename(&self.path, output)?;
        self.keep = true;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Writes the image to a temporary file next to the output path, then
/// renames it into place. The published path either keeps its previous
/// state or receives the complete new image, never anything partial.
///
/// # Errors
/// Fails on write or rename errors; the temporary is removed on every
/// failure path.
pub fn publish(output: &Path, image: &[u8], verbose: bool) -> Result<()> {
    let tmp = TempFile::for_output(output);
    fs::write(&tmp.path, image)
        .with_context(|| format!("cannot write temporary output file `{}'", tmp.path.display()))?;
    if verbose {
        println!("created temporary file `{}'", tmp.path.display());
    }
    tmp.persist(output)
        .with_context(|| format!("cannot rename temporary file to `{}'", output.display()))?;
    Ok(())
}
