use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use rv32_rs::elf;
use rv32_rs::Access;

#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub name: String,
    pub base: u32,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub size: u32,
    pub perms: String, // e.g., "r-x"
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Image {
    pub entry: Option<u32>,
    pub segments: Vec<Segment>,
}

pub fn load_raw_bin(path: &Path, base: u32, skip: usize, len: Option<usize>) -> Result<Image> {
    let file = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    anyhow::ensure!(skip <= file.len(), "--skip exceeds file size");
    let mut payload = &file[skip..];
    if let Some(lim) = len {
        anyhow::ensure!(lim <= payload.len(), "--len exceeds remaining file size after skip");
        payload = &payload[..lim];
    }
    let seg = Segment {
        name: "segment0".into(),
        base,
        size: payload.len() as u32,
        bytes: payload.to_vec(),
        perms: (Access::READ | Access::EXECUTE).to_string(),
        kind: "raw",
    };
    Ok(Image { entry: None, segments: vec![seg] })
}

pub fn load_elf(bytes: &[u8]) -> Result<Image> {
    let img = elf::read(bytes)?;
    let segments = img
        .segments
        .into_iter()
        .enumerate()
        .map(|(i, s)| Segment {
            name: format!("load{i}"),
            base: s.vaddr,
            size: s.mem_size,
            bytes: s.data,
            perms: s.access.to_string(),
            kind: "elf",
        })
        .collect();
    Ok(Image { entry: Some(img.entry), segments })
}

/// ELF when the file carries the magic, raw bytes at `base` otherwise.
pub fn load(path: &Path, base: u32, skip: usize, len: Option<usize>) -> Result<Image> {
    let file = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if elf::is_elf(&file) {
        return load_elf(&file).with_context(|| format!("parsing {}", path.display()));
    }
    load_raw_bin(path, base, skip, len)
}

pub fn read_u8(img: &Image, addr: u32) -> Option<u8> {
    for s in &img.segments {
        let start = s.base;
        let end = s.base.wrapping_add(s.bytes.len() as u32);
        if addr >= start && addr < end {
            let off = (addr - start) as usize;
            return Some(s.bytes[off]);
        }
    }
    None
}

pub fn read_u32(img: &Image, addr: u32) -> Option<u32> {
    let b0 = read_u8(img, addr)?;
    let b1 = read_u8(img, addr.wrapping_add(1))?;
    let b2 = read_u8(img, addr.wrapping_add(2))?;
    let b3 = read_u8(img, addr.wrapping_add(3))?;
    Some(u32::from_le_bytes([b0, b1, b2, b3]))
}
