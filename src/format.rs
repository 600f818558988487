use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("input is not an ELF file")]
    BadMagic,
    #[error("input is not a 32-bit little-endian ELF file")]
    BadClass,
    #[error("input is not an x86 ELF file")]
    BadMachine,
    #[error("unexpected end of file while reading ELF structures")]
    UnexpectedEof,
    #[error("ELF input has no sections")]
    NoSections,
    #[error("cannot read ELF section {0:#x} name")]
    BadSectionName(usize),
    #[error("short ELF read of {0}")]
    ShortRead(&'static str),
    #[error("weirdness when reading {0}")]
    MisalignedRecords(&'static str),
}

/// One of the four loadable parts of the program, each at most a
/// single 64 KiB x86 real-mode segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Text,
    FarText,
    Data,
    Bss,
}

impl Region {
    #[must_use]
    pub fn nature(self) -> &'static str {
        match self {
            Region::Text => "text",
            Region::FarText => "far text",
            Region::Data => "data",
            Region::Bss => "BSS",
        }
    }
}

pub mod elf;
pub mod mz;
