use crate::format::FormatError;

pub const EM_386: u16 = 3;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;

pub const SHF_ALLOC: u32 = 0x2;

/// segelf relocation types carried in the low byte of `r_info`.
pub const R_386_OZSEG16: u8 = 80;
pub const R_386_OZRELSEG16: u8 = 81;

const EHDR_SIZE: usize = 52;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;
const REL_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub index: usize,
    pub name: String,
    pub sh_type: u32,
    pub flags: u32,
    pub addr: u32,
    pub size: u32,
    pub offset: u32,
    pub link: u32,
    pub info: u32,
    pub entsize: u32,
}

/// One `Elf32_Rel` record: target virtual address plus the relocation
/// type from the low byte of `r_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rel {
    pub addr: u32,
    pub rel_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
}

#[derive(Debug)]
pub struct ElfFile<'a> {
    data: &'a [u8],
    pub entry: u32,
    pub sections: Vec<SectionHeader>,
}

/// Parses the fixed header and section table of a 32-bit little-endian
/// x86 ELF image. Content, symbols and relocation records are read on
/// demand through the accessors below.
///
/// # Errors
/// Returns `FormatError` when the container is truncated, not ELF, or
/// not the x86 flavor this converter understands.
pub fn parse_elf(data: &[u8]) -> Result<ElfFile<'_>, FormatError> {
    if data.len() < 4 || data[0..4] != [0x7f, b'E', b'L', b'F'] {
        return Err(FormatError::BadMagic);
    }
    if data.len() < EHDR_SIZE {
        return Err(FormatError::UnexpectedEof);
    }
    // ELFCLASS32, ELFDATA2LSB
    if data[4] != 1 || data[5] != 1 {
        return Err(FormatError::BadClass);
    }
    if u16_at(data, 18)? != EM_386 {
        return Err(FormatError::BadMachine);
    }

    let entry = u32_at(data, 24)?;
    let shoff = u32_at(data, 32)? as usize;
    let shentsize = u16_at(data, 46)? as usize;
    let shnum = u16_at(data, 48)? as usize;
    let shstrndx = u16_at(data, 50)? as usize;

    if shnum < 2 {
        return Err(FormatError::NoSections);
    }
    if shentsize < SHDR_SIZE {
        return Err(FormatError::MisalignedRecords("the section header table"));
    }

    let mut raw = Vec::with_capacity(shnum);
    for index in 0..shnum {
        let base = shoff + index * shentsize;
        raw.push(RawShdr {
            name_off: u32_at(data, base)?,
            sh_type: u32_at(data, base + 4)?,
            flags: u32_at(data, base + 8)?,
            addr: u32_at(data, base + 12)?,
            offset: u32_at(data, base + 16)?,
            size: u32_at(data, base + 20)?,
            link: u32_at(data, base + 24)?,
            info: u32_at(data, base + 28)?,
            entsize: u32_at(data, base + 36)?,
        });
    }

    let strtab = raw
        .get(shstrndx)
        .ok_or(FormatError::BadSectionName(shstrndx))?;
    let strtab_range = strtab.offset as usize
        ..(strtab.offset as usize).saturating_add(strtab.size as usize);
    let strtab_bytes = data
        .get(strtab_range)
        .ok_or(FormatError::ShortRead("the section name table"))?;

    let mut sections = Vec::with_capacity(shnum);
    for (index, shdr) in raw.iter().enumerate() {
        let name = cstr_at(strtab_bytes, shdr.name_off as usize)
            .ok_or(FormatError::BadSectionName(index))?;
        sections.push(SectionHeader {
            index,
            name,
            sh_type: shdr.sh_type,
            flags: shdr.flags,
            addr: shdr.addr,
            size: shdr.size,
            offset: shdr.offset,
            link: shdr.link,
            info: shdr.info,
            entsize: shdr.entsize,
        });
    }

    Ok(ElfFile {
        data,
        entry,
        sections,
    })
}

impl<'a> ElfFile<'a> {
    /// Raw bytes of a content-bearing section. `SHT_NOBITS` sections
    /// have no file content and yield an empty slice.
    ///
    /// # Errors
    /// `ShortRead` when the header claims more bytes than the file has.
    pub fn section_bytes(
        &self,
        section: &SectionHeader,
        nature: &'static str,
    ) -> Result<&'a [u8], FormatError> {
        if section.sh_type == SHT_NOBITS {
            return Ok(&[]);
        }
        let begin = section.offset as usize;
        let end = begin.saturating_add(section.size as usize);
        self.data
            .get(begin..end)
            .ok_or(FormatError::ShortRead(nature))
    }

    /// All `Elf32_Rel` records of a relocation section.
    ///
    /// # Errors
    /// `MisalignedRecords` when the section is empty or not a whole
    /// number of 8-byte records, `ShortRead` when truncated.
    pub fn rel_records(
        &self,
        section: &SectionHeader,
        nature: &'static str,
    ) -> Result<Vec<Rel>, FormatError> {
        let bytes = self.section_bytes(section, nature)?;
        if bytes.is_empty() || !bytes.len().is_multiple_of(REL_SIZE) {
            return Err(FormatError::MisalignedRecords(nature));
        }
        let mut records = Vec::with_capacity(bytes.len() / REL_SIZE);
        for chunk in bytes.chunks_exact(REL_SIZE) {
            let addr = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let info = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            records.push(Rel {
                addr,
                rel_type: (info & 0xff) as u8,
            });
        }
        Ok(records)
    }

    /// All symbols of a `SHT_SYMTAB` section, names resolved through
    /// its linked string table.
    ///
    /// # Errors
    /// `MisalignedRecords` for a bad `sh_entsize`, `ShortRead` when the
    /// symbol or string data is truncated.
    pub fn symbols(&self, symtab: &SectionHeader) -> Result<Vec<Symbol>, FormatError> {
        let bytes = self.section_bytes(symtab, "symtab")?;
        let entsize = symtab.entsize as usize;
        if entsize < SYM_SIZE || !bytes.len().is_multiple_of(entsize) {
            return Err(FormatError::MisalignedRecords("symtab"));
        }

        let strtab = self
            .sections
            .get(symtab.link as usize)
            .ok_or(FormatError::ShortRead("symbol names"))?;
        let strtab_bytes = self.section_bytes(strtab, "symbol names")?;

        let mut symbols = Vec::with_capacity(bytes.len() / entsize);
        for record in bytes.chunks_exact(entsize) {
            let name_off = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            let value = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            let name = cstr_at(strtab_bytes, name_off as usize)
                .ok_or(FormatError::ShortRead("symbol names"))?;
            symbols.push(Symbol { name, value });
        }
        Ok(symbols)
    }
}

struct RawShdr {
    name_off: u32,
    sh_type: u32,
    flags: u32,
    addr: u32,
    offset: u32,
    size: u32,
    link: u32,
    info: u32,
    entsize: u32,
}

fn u16_at(data: &[u8], pos: usize) -> Result<u16, FormatError> {
    let bytes = data.get(pos..pos + 2).ok_or(FormatError::UnexpectedEof)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn u32_at(data: &[u8], pos: usize) -> Result<u32, FormatError> {
    let bytes = data.get(pos..pos + 4).ok_or(FormatError::UnexpectedEof)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn cstr_at(strtab: &[u8], pos: usize) -> Option<String> {
    let tail = strtab.get(pos..)?;
    let len = tail.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&tail[..len]).into_owned())
}
