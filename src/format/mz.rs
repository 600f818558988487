use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

// https://wiki.osdev.org/MZ

pub const MZ_SIGNATURE: u16 = 0x5a4d;
pub const MZ_HEADER_BYTES: u16 = 28;
pub const PARAGRAPH_BYTES: u16 = 16;
pub const PAGE_BYTES: u16 = 512;

/// Hard capacity of the in-header relocation table.
pub const MAX_MZ_RELOCATIONS: usize = 32;

/// The fixed 28-byte MZ executable header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MzHeader {
    pub signature: u16,
    pub last_page_bytes: u16,
    pub number_of_pages: u16,
    pub number_of_relocation_entries: u16,
    pub number_of_header_paragraphs: u16,
    pub minimum_allocated_paragraphs: u16,
    pub maximum_allocated_paragraphs: u16,
    pub initial_ss: u16,
    pub initial_sp: u16,
    pub checksum: u16,
    pub initial_ip: u16,
    pub initial_cs: u16,
    pub relocation_offset: u16,
    pub overlay_number: u16,
}

impl MzHeader {
    /// Serializes the header in file field order, little-endian.
    ///
    /// # Errors
    /// Propagates the underlying stream error.
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for field in [
            self.signature,
            self.last_page_bytes,
            self.number_of_pages,
            self.number_of_relocation_entries,
            self.number_of_header_paragraphs,
            self.minimum_allocated_paragraphs,
            self.maximum_allocated_paragraphs,
            self.initial_ss,
            self.initial_sp,
            self.checksum,
            self.initial_ip,
            self.initial_cs,
            self.relocation_offset,
            self.overlay_number,
        ] {
            out.write_u16::<LittleEndian>(field)?;
        }
        Ok(())
    }
}

/// One entry of the header relocation table: a far segment:offset
/// location the loader adjusts at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MzRelocation {
    pub offset: u16,
    pub segment: u16,
}

impl MzRelocation {
    /// Serializes the entry as `offset` then `segment`, little-endian.
    ///
    /// # Errors
    /// Propagates the underlying stream error.
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u16::<LittleEndian>(self.offset)?;
        out.write_u16::<LittleEndian>(self.segment)?;
        Ok(())
    }
}

/// Rounds a byte size up to the next 16-byte paragraph boundary.
#[must_use]
pub fn round_up_to_paragraph(bytes: u16) -> u16 {
    bytes.div_ceil(PARAGRAPH_BYTES) * PARAGRAPH_BYTES
}
