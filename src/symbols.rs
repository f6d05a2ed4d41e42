use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
    /// Synthesized by the assembler (e.g. `%pcrel_lo` anchors).
    pub local: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("symbol `{name}` already defined at {address:#010x}")]
    Duplicate { name: String, address: u32 },
}

/// Unique name -> address bindings, in definition order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    index: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The only mutator. Fails if `name` exists; the table is unchanged then.
    pub fn add(&mut self, name: &str, address: u32, local: bool) -> Result<(), SymbolError> {
        if let Some(&i) = self.index.get(name) {
            return Err(SymbolError::Duplicate {
                name: name.to_string(),
                address: self.symbols[i].address,
            });
        }
        self.index.insert(name.to_string(), self.symbols.len());
        self.symbols.push(Symbol {
            name: name.to_string(),
            address,
            local,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.index.get(name).map(|&i| &self.symbols[i])
    }

    pub fn address(&self, name: &str) -> Option<u32> {
        self.get(name).map(|s| s.address)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelocKind {
    /// J-type displacement (`jal`).
    JumpPcRel,
    /// B-type displacement (conditional branches).
    BranchPcRel,
    /// Whole word replaced by the symbol address.
    AbsoluteWord32,
    /// U-type upper 20 bits of a PC-relative displacement (`auipc`).
    HiPcRel20,
    /// Low 12 bits paired with the `HiPcRel20` found at the target symbol's address.
    LoPcRel12,
}

/// A deferred patch of the word at `site`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    /// Absolute address of the word to patch.
    pub site: u32,
    pub kind: RelocKind,
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keeps_first() {
        let mut t = SymbolTable::new();
        t.add("loop", 0x10, false).unwrap();
        let err = t.add("loop", 0x20, false).unwrap_err();
        assert_eq!(
            err,
            SymbolError::Duplicate {
                name: "loop".into(),
                address: 0x10
            }
        );
        assert_eq!(t.address("loop"), Some(0x10));
        assert_eq!(t.len(), 1);
    }
}
