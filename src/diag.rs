//! Assembly- and link-time diagnostics.
//!
//! These never stop the phase that produced them; the caller inspects the
//! log afterwards and decides whether to execute the image.

use serde::Serialize;
use tracing::warn;

use crate::symbols::RelocKind;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Diagnostic {
    #[error("symbol `{name}` already defined at {address:#010x}")]
    DuplicateSymbol { name: String, address: u32 },
    #[error("undefined symbol `{name}` referenced at {site:#010x}")]
    UndefinedSymbol { name: String, site: u32 },
    #[error("no %pcrel_hi relocation at {anchor:#010x} for %pcrel_lo at {site:#010x}")]
    MissingHiPair { site: u32, anchor: u32 },
    #[error("{kind:?} displacement {value} out of range at {site:#010x}")]
    OutOfRange { site: u32, kind: RelocKind, value: i64 },
    #[error("immediate {value} does not fit {bits} bits at {site:#010x}")]
    ImmediateRange { site: u32, value: i64, bits: u32 },
    #[error("relocation site {site:#010x} lies outside the image")]
    BadSite { site: u32 },
    #[error("bad operand at {site:#010x}: {message}")]
    BadOperand { site: u32, message: String },
    #[error("object assembled at {object:#010x} but the link targets {config:#010x}")]
    BaseMismatch { object: u32, config: u32 },
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, d: Diagnostic) {
        warn!("{d}");
        self.0.push(d);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
