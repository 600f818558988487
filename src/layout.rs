use anyhow::{bail, Result};

use crate::format::Region;
use crate::relocs::SegmentRef;
use crate::resolver::ProgramSections;

/// Absolute segment bases assigned to the relocatable regions. The
/// default (all zero) is what non-ROMable output resolves against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentLayout {
    pub text: u16,
    pub ftext: u16,
    pub data: u16,
}

impl SegmentLayout {
    /// The segment base assigned to a region.
    ///
    /// # Errors
    /// BSS never receives a segment; asking for one means an earlier
    /// stage produced an inconsistent placeholder.
    pub fn segment_of(&self, region: Region) -> Result<u16> {
        match region {
            Region::Text => Ok(self.text),
            Region::FarText => Ok(self.ftext),
            Region::Data => Ok(self.data),
            Region::Bss => bail!("no segment assigned to the BSS region"),
        }
    }

    /// Substitutes a placeholder with its final segment value.
    ///
    /// # Errors
    /// Same as [`SegmentLayout::segment_of`].
    pub fn resolve(&self, segment: SegmentRef) -> Result<u16> {
        match segment {
            SegmentRef::Resolved(value) => Ok(value),
            SegmentRef::Unresolved(region) => self.segment_of(region),
        }
    }
}

/// Assigns absolute segments for ROMable output: the header occupies
/// the two paragraph-units below the text region, far text follows text
/// immediately, and the data segment is taken from the caller.
///
/// # Errors
/// Far text can only follow text at a paragraph boundary, so a text
/// size that is not a multiple of 16 is fatal.
pub fn plan_rom_layout(
    sections: &ProgramSections,
    header_seg: u16,
    data_seg: u16,
) -> Result<SegmentLayout> {
    let text_seg = header_seg.wrapping_add(2);

    let text_size = match &sections.text {
        Some(text) => {
            if !text.size.is_multiple_of(0x10) {
                bail!("text section end not paragraph-aligned for ROMable output");
            }
            text.size
        }
        None => 0,
    };

    Ok(SegmentLayout {
        text: text_seg,
        ftext: text_seg.wrapping_add((text_size / 0x10) as u16),
        data: data_seg,
    })
}
