use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;
use stkmap_types::{LocationKind, DYNAMIC_FRAME_SIZE, STACKMAP_VERSION};

use crate::parser::{ParseError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StackMapSection {
    pub version: u8,
    pub functions: Vec<FunctionFrameRecord>,
    pub constants: Vec<u64>,
    pub records: Vec<StackMapRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct FunctionFrameRecord {
    pub addr: u64,
    pub stack_size: u64,
}

impl FunctionFrameRecord {
    pub fn is_fixed_size_frame(&self) -> bool {
        self.stack_size != DYNAMIC_FRAME_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StackMapRecord {
    pub patch_point_id: u64,
    pub instruction_offset: u32,
    pub flags: u16,
    pub locations: Vec<LocationRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct LocationRecord {
    pub kind: LocationKind,
    pub size: u8,
    pub dwarf_reg: u16,
    pub offset: i32,
}

/// Where a live value can be found once constant pool indices are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum LocationPointer {
    Register { reg: u16 },
    Direct { reg: u16, offset: i32 },
    Indirect { reg: u16, offset: i32 },
    Constant(u64),
}

impl LocationRecord {
    pub fn resolve(&self, constants: &[u64]) -> Result<LocationPointer> {
        let reg = self.dwarf_reg;
        let offset = self.offset;
        Ok(match self.kind {
            LocationKind::Register => LocationPointer::Register { reg },
            LocationKind::Direct => LocationPointer::Direct { reg, offset },
            LocationKind::Indirect => LocationPointer::Indirect { reg, offset },
            // small constants are sign extended
            LocationKind::Constant => LocationPointer::Constant(offset as i64 as u64),
            LocationKind::ConstantIndex => {
                if offset < 0 {
                    return Err(ParseError::NegativeConstantOffset(offset));
                }
                match constants.get(offset as usize) {
                    Some(c) => LocationPointer::Constant(*c),
                    None => return Err(ParseError::ConstantTableOverflow(offset)),
                }
            }
            LocationKind::Unprocessed => {
                return Err(ParseError::UnsupportedLocationType(self.kind.code()))
            }
        })
    }
}

impl StackMapSection {
    /// Re-checks the structural invariants the parser enforces inline.
    pub fn verify(&self) -> Result<()> {
        if self.version != STACKMAP_VERSION {
            return Err(ParseError::UnsupportedVersion(self.version));
        }
        for record in &self.records {
            if record.flags != 0 {
                return Err(ParseError::NonZeroRecordFlags {
                    id: record.patch_point_id,
                    flags: record.flags,
                });
            }
            for loc in &record.locations {
                if !loc.kind.is_encodable() {
                    return Err(ParseError::UnsupportedLocationType(loc.kind.code()));
                }
            }
        }
        Ok(())
    }

    // brute force, could sort by offset if sections get large
    pub fn record_for_offset(&self, rel_pc: u32) -> Option<&StackMapRecord> {
        self.records
            .iter()
            .find(|rec| rec.instruction_offset == rel_pc)
    }

    pub fn has_record_for_offset(&self, rel_pc: u32) -> bool {
        self.record_for_offset(rel_pc).is_some()
    }

    /// Resolves every location of `record` against this section's constant table.
    pub fn resolve_locations(&self, record: &StackMapRecord) -> Result<Vec<LocationPointer>> {
        record
            .locations
            .iter()
            .map(|loc| loc.resolve(&self.constants))
            .collect()
    }
}

impl fmt::Display for StackMapSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Functions ({}) [", self.functions.len())?;
        for func in &self.functions {
            write!(f, "  addr = {:#x}, size = ", func.addr)?;
            if func.is_fixed_size_frame() {
                writeln!(f, "{}", func.stack_size)?;
            } else {
                writeln!(f, "dynamic")?;
            }
        }
        writeln!(f, "]")?;

        writeln!(f, "Constants ({}) [", self.constants.len())?;
        for c in &self.constants {
            writeln!(f, "  value = {}", *c as i64)?;
        }
        writeln!(f, "]")?;

        writeln!(f, "Records ({}) [", self.records.len())?;
        for rec in &self.records {
            writeln!(
                f,
                "  id = {}, offset = {}, flags = {}",
                rec.patch_point_id, rec.instruction_offset, rec.flags
            )?;
            writeln!(f, "  Locations ({}) [", rec.locations.len())?;
            for loc in &rec.locations {
                writeln!(
                    f,
                    "    type = {}, size = {}, dwarfreg = {}, offset = {}",
                    loc.kind, loc.size, loc.dwarf_reg, loc.offset
                )?;
            }
            writeln!(f, "  ]")?;
        }
        writeln!(f, "]")
    }
}
