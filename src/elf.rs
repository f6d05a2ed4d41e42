//! ELF32 little-endian executables for RISC-V: one `PT_LOAD` per region,
//! no sections.

use goblin::elf::header::{EI_CLASS, EI_DATA, ELFCLASS32, ELFDATA2LSB, ELFMAG, EV_CURRENT};
use goblin::elf::Elf;
use tracing::debug;

use crate::memory::{Access, AddressSpace, MemoryError, PAGE_SIZE};

pub use goblin::elf::header::{EM_RISCV, ET_EXEC};
pub use goblin::elf::program_header::PT_LOAD;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ElfError {
    #[error("not an ELF file")]
    BadMagic,
    #[error("unsupported ELF: {0}")]
    Unsupported(&'static str),
    #[error("truncated ELF: need {len} bytes at offset {offset:#x}")]
    Truncated { offset: usize, len: usize },
    #[error("malformed ELF: {0}")]
    Malformed(String),
}

impl From<goblin::error::Error> for ElfError {
    fn from(e: goblin::error::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub vaddr: u32,
    pub data: Vec<u8>,
    /// At least `data.len()`; the tail is zero-filled.
    pub mem_size: u32,
    pub access: Access,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfImage {
    pub entry: u32,
    pub segments: Vec<Segment>,
}

impl ElfImage {
    /// Map every segment (page-rounded) and copy its bytes in.
    pub fn load(&self, space: &mut AddressSpace) -> Result<(), MemoryError> {
        for seg in &self.segments {
            let base = seg.vaddr & !(PAGE_SIZE - 1);
            let len = seg
                .mem_size
                .max(seg.data.len() as u32)
                .max(1)
                .checked_add(seg.vaddr - base)
                .ok_or(MemoryError::Exhausted { len: seg.mem_size })?;
            space.allocate(base, len, seg.access)?;
            space.poke(seg.vaddr, &seg.data)?;
            debug!(vaddr = seg.vaddr, size = seg.mem_size, access = %seg.access, "loaded segment");
        }
        Ok(())
    }
}

/// Serialize a single executable image loaded at `base`.
pub fn write(image: &[u8], base: u32, entry: u32, access: Access) -> Vec<u8> {
    write_image(&ElfImage {
        entry,
        segments: vec![Segment {
            vaddr: base,
            data: image.to_vec(),
            mem_size: image.len() as u32,
            access,
        }],
    })
}

pub fn write_image(img: &ElfImage) -> Vec<u8> {
    let phnum = img.segments.len();
    let headers = EHDR_SIZE + phnum * PHDR_SIZE;
    let align = PAGE_SIZE as usize;

    // file offsets keep `offset % PAGE_SIZE == vaddr % PAGE_SIZE`
    let mut offsets = Vec::with_capacity(phnum);
    let mut cursor = headers;
    for seg in &img.segments {
        let want = seg.vaddr as usize % align;
        let mut off = cursor - cursor % align + want;
        if off < cursor {
            off += align;
        }
        offsets.push(off);
        cursor = off + seg.data.len();
    }

    let mut out = Vec::with_capacity(cursor);
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F', ELFCLASS32, ELFDATA2LSB, EV_CURRENT]);
    out.resize(16, 0);
    out.extend_from_slice(&ET_EXEC.to_le_bytes());
    out.extend_from_slice(&EM_RISCV.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&img.entry.to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(phnum as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

    for (seg, &off) in img.segments.iter().zip(&offsets) {
        let fields = [
            PT_LOAD,
            off as u32,
            seg.vaddr,
            seg.vaddr,
            seg.data.len() as u32,
            seg.mem_size.max(seg.data.len() as u32),
            seg.access.bits() as u32,
            PAGE_SIZE,
        ];
        for f in fields {
            out.extend_from_slice(&f.to_le_bytes());
        }
    }

    for (seg, &off) in img.segments.iter().zip(&offsets) {
        out.resize(off, 0);
        out.extend_from_slice(&seg.data);
    }
    out
}

pub fn is_elf(bytes: &[u8]) -> bool {
    bytes.starts_with(ELFMAG)
}

pub fn read(bytes: &[u8]) -> Result<ElfImage, ElfError> {
    if !is_elf(bytes) {
        return Err(ElfError::BadMagic);
    }
    let header = Elf::parse_header(bytes)?;
    if header.e_ident[EI_CLASS] != ELFCLASS32 {
        return Err(ElfError::Unsupported("not a 32-bit image"));
    }
    if header.e_ident[EI_DATA] != ELFDATA2LSB {
        return Err(ElfError::Unsupported("not little-endian"));
    }
    if header.e_type != ET_EXEC {
        return Err(ElfError::Unsupported("not an executable"));
    }
    if header.e_machine != EM_RISCV {
        return Err(ElfError::Unsupported("not a RISC-V image"));
    }

    let elf = Elf::parse(bytes)?;
    let entry = u32::try_from(elf.entry).map_err(|_| ElfError::Unsupported("entry past 4 GiB"))?;
    let mut segments = Vec::new();
    for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
        if ph.p_memsz < ph.p_filesz {
            return Err(ElfError::Unsupported("segment memory size below file size"));
        }
        if ph.p_vaddr.saturating_add(ph.p_memsz) > 1 << 32 {
            return Err(ElfError::Unsupported("segment runs past 4 GiB"));
        }
        let offset = ph.p_offset as usize;
        let len = ph.p_filesz as usize;
        let data = offset
            .checked_add(len)
            .and_then(|end| bytes.get(offset..end))
            .ok_or(ElfError::Truncated { offset, len })?;
        segments.push(Segment {
            vaddr: ph.p_vaddr as u32,
            data: data.to_vec(),
            mem_size: ph.p_memsz as u32,
            access: Access::from_bits_truncate(ph.p_flags as u8),
        });
    }
    Ok(ElfImage { entry, segments })
}
