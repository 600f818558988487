//! Minimal ELF32 LSB x86 image builder for end-to-end tests.

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;
pub const SHF_ALLOC: u32 = 0x2;

pub enum Content {
    Bytes(Vec<u8>),
    Zeroed(u32),
}

pub struct SectionSpec {
    pub name: &'static str,
    pub sh_type: u32,
    pub flags: u32,
    pub addr: u32,
    pub link: u32,
    pub info: u32,
    pub entsize: u32,
    pub content: Content,
}

impl SectionSpec {
    pub fn progbits(name: &'static str, flags: u32, addr: u32, bytes: Vec<u8>) -> Self {
        SectionSpec {
            name,
            sh_type: SHT_PROGBITS,
            flags,
            addr,
            link: 0,
            info: 0,
            entsize: 0,
            content: Content::Bytes(bytes),
        }
    }

    #[allow(dead_code)]
    pub fn nobits(name: &'static str, flags: u32, addr: u32, size: u32) -> Self {
        SectionSpec {
            name,
            sh_type: SHT_NOBITS,
            flags,
            addr,
            link: 0,
            info: 0,
            entsize: 0,
            content: Content::Zeroed(size),
        }
    }

    pub fn rel(name: &'static str, info: u32, records: &[(u32, u8)]) -> Self {
        let mut bytes = Vec::new();
        for &(addr, rel_type) in records {
            bytes.extend_from_slice(&addr.to_le_bytes());
            bytes.extend_from_slice(&u32::from(rel_type).to_le_bytes());
        }
        SectionSpec {
            name,
            sh_type: SHT_REL,
            flags: 0,
            addr: 0,
            link: 0,
            info,
            entsize: 8,
            content: Content::Bytes(bytes),
        }
    }

    /// A `.symtab` plus the `.strtab` it links to (the builder patches
    /// the link to the following section).
    pub fn symtab(symbols: &[(&str, u32)]) -> (Self, Self) {
        let mut strtab = vec![0u8];
        let mut records = Vec::new();
        for &(name, value) in symbols {
            let name_off = strtab.len() as u32;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            records.extend_from_slice(&name_off.to_le_bytes());
            records.extend_from_slice(&value.to_le_bytes());
            records.extend_from_slice(&0u32.to_le_bytes());
            records.extend_from_slice(&[0u8; 4]);
        }
        (
            SectionSpec {
                name: ".symtab",
                sh_type: SHT_SYMTAB,
                flags: 0,
                addr: 0,
                link: u32::MAX,
                info: 0,
                entsize: 16,
                content: Content::Bytes(records),
            },
            SectionSpec {
                name: ".strtab",
                sh_type: SHT_STRTAB,
                flags: 0,
                addr: 0,
                link: 0,
                info: 0,
                entsize: 0,
                content: Content::Bytes(strtab),
            },
        )
    }
}

pub fn build_elf(entry: u32, specs: Vec<SectionSpec>) -> Vec<u8> {
    let mut shstrtab = vec![0u8];
    let mut name_offs = vec![0u32];
    for spec in &specs {
        name_offs.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(spec.name.as_bytes());
        shstrtab.push(0);
    }
    let shstr_name_off = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab");
    shstrtab.push(0);

    let shnum = specs.len() + 2;
    let shstrndx = shnum - 1;

    let mut body = Vec::new();
    let mut placed = Vec::new();
    for spec in &specs {
        let offset = 52 + body.len() as u32;
        let size = match &spec.content {
            Content::Bytes(bytes) => {
                body.extend_from_slice(bytes);
                bytes.len() as u32
            }
            Content::Zeroed(size) => *size,
        };
        placed.push((offset, size));
    }
    let shstr_off = 52 + body.len() as u32;
    body.extend_from_slice(&shstrtab);
    let shoff = 52 + body.len() as u32;

    let mut image = Vec::new();
    image.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
    image.extend_from_slice(&[0u8; 8]);
    image.extend_from_slice(&2u16.to_le_bytes()); // e_type: ET_EXEC
    image.extend_from_slice(&3u16.to_le_bytes()); // e_machine: EM_386
    image.extend_from_slice(&1u32.to_le_bytes());
    image.extend_from_slice(&entry.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&shoff.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&52u16.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image.extend_from_slice(&40u16.to_le_bytes());
    image.extend_from_slice(&(shnum as u16).to_le_bytes());
    image.extend_from_slice(&(shstrndx as u16).to_le_bytes());
    image.extend_from_slice(&body);

    let mut push_shdr = |name_off: u32,
                         sh_type: u32,
                         flags: u32,
                         addr: u32,
                         offset: u32,
                         size: u32,
                         link: u32,
                         info: u32,
                         entsize: u32| {
        for value in [
            name_off, sh_type, flags, addr, offset, size, link, info, 0, entsize,
        ] {
            image.extend_from_slice(&value.to_le_bytes());
        }
    };

    push_shdr(0, 0, 0, 0, 0, 0, 0, 0, 0);
    for (idx, spec) in specs.iter().enumerate() {
        let (offset, size) = placed[idx];
        let link = if spec.link == u32::MAX {
            idx as u32 + 2
        } else {
            spec.link
        };
        push_shdr(
            name_offs[idx + 1],
            spec.sh_type,
            spec.flags,
            spec.addr,
            offset,
            size,
            link,
            spec.info,
            spec.entsize,
        );
    }
    push_shdr(
        shstr_name_off,
        SHT_STRTAB,
        0,
        0,
        shstr_off,
        shstrtab.len() as u32,
        0,
        0,
        0,
    );

    image
}
