//! Target data layout.
//!
//! [`DataLayout`] exposes the properties argument-packing code needs about a
//! resolved target (pointer width, endianness, calling convention) together
//! with the target's symbol mangling.

use cranelift_codegen::ir::{self, Endianness};
use cranelift_codegen::isa::{CallConv, TargetIsa};
use target_lexicon::{Architecture, BinaryFormat, Triple};

/// Data layout of a resolved target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    pointer_type: ir::Type,
    endianness: Endianness,
    call_conv: CallConv,
    global_prefix: Option<char>,
}

impl DataLayout {
    /// Derives the layout from a target ISA.
    #[must_use]
    pub fn from_isa(isa: &dyn TargetIsa) -> Self {
        Self {
            pointer_type: isa.pointer_type(),
            endianness: isa.endianness(),
            call_conv: isa.default_call_conv(),
            global_prefix: global_prefix(isa.triple()),
        }
    }

    /// Integer type wide enough to hold a pointer.
    #[must_use]
    pub fn pointer_type(&self) -> ir::Type {
        self.pointer_type
    }

    /// Pointer width in bytes.
    #[must_use]
    pub fn pointer_bytes(&self) -> u32 {
        self.pointer_type.bytes()
    }

    /// Byte order of the target.
    #[must_use]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Returns `true` for little-endian targets.
    #[must_use]
    pub fn is_little_endian(&self) -> bool {
        self.endianness == Endianness::Little
    }

    /// Default calling convention for generated functions.
    #[must_use]
    pub fn call_conv(&self) -> CallConv {
        self.call_conv
    }

    /// Prefix the object format prepends to global symbols (`_` on Mach-O).
    #[must_use]
    pub fn global_prefix(&self) -> Option<char> {
        self.global_prefix
    }

    /// Mangles a logical name into the target's object-level name.
    #[must_use]
    pub fn mangle(&self, name: &str) -> String {
        match self.global_prefix {
            Some(prefix) => {
                let mut mangled = String::with_capacity(name.len() + 1);
                mangled.push(prefix);
                mangled.push_str(name);
                mangled
            }
            None => name.to_string(),
        }
    }
}

fn global_prefix(triple: &Triple) -> Option<char> {
    match (triple.binary_format, triple.architecture) {
        (BinaryFormat::Macho, _) | (BinaryFormat::Coff, Architecture::X86_32(_)) => Some('_'),
        _ => None,
    }
}
