//! Second pass: map the assembled image and patch every recorded relocation.
//!
//! Patching is best-effort. A relocation that cannot be resolved is logged as
//! a [`Diagnostic`] and its word keeps the encoder's placeholder; the
//! remaining relocations are still applied.

use std::collections::HashMap;

use tracing::debug;

use crate::bits::{self, clear_fields, extract, fits_signed, insert_fields, Field};
use crate::config::LinkConfig;
use crate::diag::{Diagnostic, Diagnostics};
use crate::encoder::{split_pcrel, Object};
use crate::instructions::OPC_STORE;
use crate::memory::{Access, AddressSpace, MemoryError};
use crate::symbols::{RelocKind, Relocation, SymbolTable};

/// A fully relocated program ready to execute.
#[derive(Debug)]
pub struct Linked {
    pub space: AddressSpace,
    pub base: u32,
    pub image_len: u32,
    pub entry: u32,
    /// One past the highest stack byte, if a stack region was mapped.
    pub stack_top: Option<u32>,
    pub symbols: SymbolTable,
    pub diagnostics: Diagnostics,
}

impl Linked {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// The relocated image bytes.
    pub fn image(&self) -> &[u8] {
        self.space
            .region(self.base)
            .map(|r| &r.bytes()[..self.image_len as usize])
            .unwrap_or(&[])
    }
}

pub struct Linker {
    space: AddressSpace,
    base: u32,
    image_len: u32,
    entry: u32,
    stack_top: Option<u32>,
    symbols: SymbolTable,
    relocations: Vec<Relocation>,
    diagnostics: Diagnostics,
}

impl Linker {
    /// Map the object's image (and the configured stack) into a fresh
    /// address space. Nothing is patched yet.
    pub fn new(object: Object, cfg: &LinkConfig) -> Result<Self, MemoryError> {
        let Object {
            base,
            image,
            symbols,
            relocations,
            mut diagnostics,
        } = object;

        // code is position dependent, so the object's own base wins
        if cfg.base != base {
            diagnostics.report(Diagnostic::BaseMismatch {
                object: base,
                config: cfg.base,
            });
        }

        let mut space = AddressSpace::new();
        let len = u32::try_from(image.len())
            .map_err(|_| MemoryError::Exhausted { len: u32::MAX })?;
        space.allocate(base, len.max(1), cfg.text_access)?;
        space.poke(base, &image)?;

        let stack_top = if cfg.stack_size > 0 {
            let bottom = space.allocate_anywhere(cfg.stack_size, Access::READ | Access::WRITE)?;
            Some(bottom.wrapping_add(cfg.stack_size))
        } else {
            None
        };

        let entry = symbols.address(&cfg.entry_symbol).unwrap_or(base);
        debug!(base, len, entry, ?stack_top, "mapped image");

        Ok(Self {
            space,
            base,
            image_len: len,
            entry,
            stack_top,
            symbols,
            relocations,
            diagnostics,
        })
    }

    /// Apply every relocation once, in recorded order.
    pub fn relocate(&mut self) {
        let relocations = std::mem::take(&mut self.relocations);
        let hi_by_site: HashMap<u32, &Relocation> = relocations
            .iter()
            .filter(|r| r.kind == RelocKind::HiPcRel20)
            .map(|r| (r.site, r))
            .collect();

        for r in &relocations {
            if let Err(d) = self.apply(r, &hi_by_site) {
                self.diagnostics.report(d);
            }
        }
    }

    fn resolve(&self, name: &str, site: u32) -> Result<u32, Diagnostic> {
        self.symbols
            .address(name)
            .ok_or_else(|| Diagnostic::UndefinedSymbol {
                name: name.to_string(),
                site,
            })
    }

    fn apply(
        &mut self,
        r: &Relocation,
        hi_by_site: &HashMap<u32, &Relocation>,
    ) -> Result<(), Diagnostic> {
        let site = r.site;
        let word = self
            .space
            .peek_u32(site)
            .map_err(|_| Diagnostic::BadSite { site })?;

        let patched = match r.kind {
            RelocKind::JumpPcRel => {
                let disp = self.resolve(&r.target, site)?.wrapping_sub(site) as i32;
                check_disp(site, r.kind, disp, 21)?;
                patch(word, (disp >> 1) as u32, bits::J_IMM)
            }
            RelocKind::BranchPcRel => {
                let disp = self.resolve(&r.target, site)?.wrapping_sub(site) as i32;
                check_disp(site, r.kind, disp, 13)?;
                patch(word, (disp >> 1) as u32, bits::B_IMM)
            }
            RelocKind::AbsoluteWord32 => self.resolve(&r.target, site)?,
            RelocKind::HiPcRel20 => {
                let disp = self.resolve(&r.target, site)?.wrapping_sub(site) as i32;
                let (hi20, _) = split_pcrel(disp);
                patch(word, hi20, bits::U_IMM)
            }
            RelocKind::LoPcRel12 => {
                let anchor = self.resolve(&r.target, site)?;
                let hi = hi_by_site
                    .get(&anchor)
                    .ok_or(Diagnostic::MissingHiPair { site, anchor })?;
                let disp = self.resolve(&hi.target, site)?.wrapping_sub(anchor) as i32;
                let (_, lo12) = split_pcrel(disp);
                let fields = if extract(word, 0, 7) as u8 == OPC_STORE {
                    bits::S_IMM
                } else {
                    bits::I_IMM
                };
                patch(word, lo12 as u32, fields)
            }
        };

        self.space
            .poke_u32(site, patched)
            .map_err(|_| Diagnostic::BadSite { site })?;
        debug!(site, kind = ?r.kind, symbol = %r.target, word = patched, "applied relocation");
        Ok(())
    }

    pub fn finish(self) -> Linked {
        Linked {
            space: self.space,
            base: self.base,
            image_len: self.image_len,
            entry: self.entry,
            stack_top: self.stack_top,
            symbols: self.symbols,
            diagnostics: self.diagnostics,
        }
    }
}

fn check_disp(site: u32, kind: RelocKind, disp: i32, width: u32) -> Result<(), Diagnostic> {
    if disp & 1 != 0 || !fits_signed(disp as i64, width) {
        return Err(Diagnostic::OutOfRange {
            site,
            kind,
            value: disp as i64,
        });
    }
    Ok(())
}

fn patch(word: u32, value: u32, fields: &[Field]) -> u32 {
    insert_fields(clear_fields(word, fields), value, fields)
}

/// Map, relocate and finish in one go.
pub fn link(object: Object, cfg: &LinkConfig) -> Result<Linked, MemoryError> {
    let mut linker = Linker::new(object, cfg)?;
    linker.relocate();
    Ok(linker.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Assembler;
    use crate::reg::x;

    fn no_stack() -> LinkConfig {
        LinkConfig {
            stack_size: 0,
            ..LinkConfig::default()
        }
    }

    #[test]
    fn undefined_symbol_keeps_placeholder_and_continues() {
        let mut asm = Assembler::new(0);
        asm.jal(x(1), "nowhere");
        asm.beq(x(0), x(0), "end");
        asm.label("end");
        let placeholder = u32::from_le_bytes(asm.image()[0..4].try_into().unwrap());

        let mut linked = link(asm.finish(), &no_stack()).unwrap();
        assert_eq!(linked.diagnostics.len(), 1);
        assert!(matches!(
            linked.diagnostics.iter().next(),
            Some(Diagnostic::UndefinedSymbol { site: 0, .. })
        ));
        assert_eq!(linked.space.peek_u32(0).unwrap(), placeholder);
        // the branch after the failure was still patched: +4
        let beq = linked.space.peek_u32(4).unwrap();
        assert_eq!(bits::extract_fields_signed(beq, bits::B_IMM) << 1, 4);
    }

    #[test]
    fn stack_is_mapped_past_image() {
        let mut asm = Assembler::new(0x1000);
        asm.invalid();
        let cfg = LinkConfig {
            base: 0x1000,
            ..LinkConfig::default()
        };
        let linked = link(asm.finish(), &cfg).unwrap();
        assert!(linked.is_clean(), "{:?}", linked.diagnostics);
        let top = linked.stack_top.unwrap();
        let region = linked.space.region(top - 4).unwrap();
        assert_eq!(region.access(), Access::READ | Access::WRITE);
        assert!(region.base() >= 0x3000);
        assert_eq!(linked.entry, 0x1000);
    }

    #[test]
    fn entry_symbol_is_honoured() {
        let mut asm = Assembler::new(0);
        asm.nop();
        asm.label("_start");
        asm.invalid();
        let linked = link(asm.finish(), &no_stack()).unwrap();
        assert_eq!(linked.entry, 4);
    }
}
