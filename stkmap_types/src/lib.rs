//! Wire-level constants shared by the stackmap encoder and decoder.

use std::convert::TryFrom;
use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

/// The only section format revision either side understands.
pub const STACKMAP_VERSION: u8 = 1;

/// Stack size recorded for functions whose frame size isn't statically known.
pub const DYNAMIC_FRAME_SIZE: u64 = u64::MAX;

// reserved for records that overflowed their 16 bit count fields
pub const INVALID_RECORD_ID: u64 = u64::MAX;

pub const STACKMAP_SECTION: &str = ".llvm_stackmaps";
pub const STACKMAP_SECTION_SYMBOL: &str = "__LLVM_StackMaps";

/// Every call site record starts on this boundary.
pub const RECORD_ALIGN: usize = 8;

// immediates tagging operand groups in a marker instruction's operand list
pub const DIRECT_MEM_REF_OP: i64 = 0;
pub const INDIRECT_MEM_REF_OP: i64 = 1;
pub const CONSTANT_OP: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[repr(u8)]
pub enum LocationKind {
    Unprocessed = 0,
    Register = 1,
    Direct = 2,
    Indirect = 3,
    Constant = 4,
    ConstantIndex = 5,
}

impl LocationKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            LocationKind::Unprocessed => "Unprocessed",
            LocationKind::Register => "Register",
            LocationKind::Direct => "Direct",
            LocationKind::Indirect => "Indirect",
            LocationKind::Constant => "Constant",
            LocationKind::ConstantIndex => "ConstantIndex",
        }
    }

    /// Whether this kind may legally appear in an emitted section.
    pub fn is_encodable(self) -> bool {
        self != LocationKind::Unprocessed
    }
}

impl TryFrom<u8> for LocationKind {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0 => LocationKind::Unprocessed,
            1 => LocationKind::Register,
            2 => LocationKind::Direct,
            3 => LocationKind::Indirect,
            4 => LocationKind::Constant,
            5 => LocationKind::ConstantIndex,
            other => return Err(other),
        })
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rounds `offset` up to the next multiple of `align`, which must be a power of two.
pub fn align_to(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}
