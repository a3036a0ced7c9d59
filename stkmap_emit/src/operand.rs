//! Marker instructions as handed over by the code generator.
//!
//! Operands are positional: what an operand means depends on the immediates preceding it, so
//! nothing here tries to make the list self-describing.

use crate::error::{EmitError, Result};
use crate::reg_info::PhysReg;

/// Calling convention number that lets the register allocator pick any register for arguments
/// and the result.
pub const CALLING_CONV_ANY_REG: i64 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    StackMap,
    PatchPoint,
    Statepoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegOperand {
    pub reg: PhysReg,
    pub is_def: bool,
    pub is_implicit: bool,
    pub is_early_clobber: bool,
    pub sub_reg: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineOperand {
    Imm(i64),
    Reg(RegOperand),
    /// One bit per physical register, 32 registers per word.
    RegLiveOut(Vec<u32>),
}

impl MachineOperand {
    pub fn imm(value: i64) -> Self {
        MachineOperand::Imm(value)
    }

    pub fn reg(reg: PhysReg) -> Self {
        MachineOperand::Reg(RegOperand {
            reg,
            is_def: false,
            is_implicit: false,
            is_early_clobber: false,
            sub_reg: 0,
        })
    }

    pub fn def(reg: PhysReg) -> Self {
        MachineOperand::Reg(RegOperand {
            reg,
            is_def: true,
            is_implicit: false,
            is_early_clobber: false,
            sub_reg: 0,
        })
    }

    /// A scratch register clobbered by the patchable sequence.
    pub fn scratch(reg: PhysReg) -> Self {
        MachineOperand::Reg(RegOperand {
            reg,
            is_def: true,
            is_implicit: true,
            is_early_clobber: true,
            sub_reg: 0,
        })
    }

    pub fn live_out(regs: &[PhysReg]) -> Self {
        let words = regs.iter().map(|r| r.index() / 32 + 1).max().unwrap_or(0);
        let mut mask = vec![0u32; words];
        for r in regs {
            mask[r.index() / 32] |= 1 << (r.index() % 32);
        }
        MachineOperand::RegLiveOut(mask)
    }

    fn is_explicit_def(&self) -> bool {
        matches!(self, MachineOperand::Reg(r) if r.is_def && !r.is_implicit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInstr {
    pub opcode: Opcode,
    pub operands: Vec<MachineOperand>,
}

impl MachineInstr {
    pub fn new(opcode: Opcode, operands: Vec<MachineOperand>) -> Self {
        Self { opcode, operands }
    }

    pub fn operand(&self, idx: usize) -> Result<&MachineOperand> {
        self.operands
            .get(idx)
            .ok_or(EmitError::MissingOperand { opcode: self.opcode, idx })
    }

    pub fn imm(&self, idx: usize) -> Result<i64> {
        match self.operand(idx)? {
            MachineOperand::Imm(v) => Ok(*v),
            _ => Err(EmitError::ExpectedImmediate { opcode: self.opcode, idx }),
        }
    }

    /// Reads an immediate that counts or indexes operands.
    pub(crate) fn count(&self, idx: usize) -> Result<usize> {
        let v = self.imm(idx)?;
        usize::try_from(v).map_err(|_| EmitError::BadOperandCount {
            opcode: self.opcode,
            idx,
            value: v,
        })
    }

    pub(crate) fn expect_opcode(&self, opcode: Opcode) -> Result<()> {
        if self.opcode != opcode {
            return Err(EmitError::UnexpectedOpcode {
                expected: opcode,
                actual: self.opcode,
            });
        }
        Ok(())
    }
}

/// Operand layout of a patch point:
///
/// ```text
/// [<def>], <id>, <num bytes>, <target>, <num args>, <cc>,
///   [call arguments], [live operands], [scratch registers]
/// ```
pub struct PatchPointOpers<'a> {
    mi: &'a MachineInstr,
    has_def: bool,
    is_any_reg: bool,
}

impl<'a> PatchPointOpers<'a> {
    pub const ID_POS: usize = 0;
    pub const NBYTE_POS: usize = 1;
    pub const TARGET_POS: usize = 2;
    pub const NARG_POS: usize = 3;
    pub const CC_POS: usize = 4;
    pub const META_END: usize = 5;

    pub fn new(mi: &'a MachineInstr) -> Result<Self> {
        let has_def = mi.operands.first().map_or(false, |op| op.is_explicit_def());
        let mut opers = PatchPointOpers {
            mi,
            has_def,
            is_any_reg: false,
        };

        let defs = mi
            .operands
            .iter()
            .take_while(|op| op.is_explicit_def())
            .count();
        if defs != opers.meta_idx(0) {
            return Err(EmitError::UnexpectedPatchPointDef);
        }

        opers.is_any_reg = opers.meta_imm(Self::CC_POS)? == CALLING_CONV_ANY_REG;
        Ok(opers)
    }

    pub fn has_def(&self) -> bool {
        self.has_def
    }

    pub fn is_any_reg(&self) -> bool {
        self.is_any_reg
    }

    pub fn meta_idx(&self, pos: usize) -> usize {
        usize::from(self.has_def) + pos
    }

    pub fn meta_oper(&self, pos: usize) -> Result<&'a MachineOperand> {
        self.mi.operand(self.meta_idx(pos))
    }

    pub fn meta_imm(&self, pos: usize) -> Result<i64> {
        self.mi.imm(self.meta_idx(pos))
    }

    pub fn num_args(&self) -> Result<usize> {
        self.mi.count(self.meta_idx(Self::NARG_POS))
    }

    pub fn arg_idx(&self) -> usize {
        self.meta_idx(Self::META_END)
    }

    /// First operand after the call arguments.
    pub fn var_idx(&self) -> Result<usize> {
        Ok(self.arg_idx() + self.num_args()?)
    }

    /// Where recording starts: anyregcc arguments get locations of their own.
    pub fn stack_map_start_idx(&self) -> Result<usize> {
        if self.is_any_reg {
            Ok(self.arg_idx())
        } else {
            self.var_idx()
        }
    }

    /// Index of the next scratch register at or after `start`, defaulting to the live operands.
    pub fn next_scratch_idx(&self, start: Option<usize>) -> Result<Option<usize>> {
        let start = match start {
            Some(start) => start,
            None => self.var_idx()?,
        };
        Ok(self
            .mi
            .operands
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, op)| {
                matches!(op, MachineOperand::Reg(r)
                    if r.is_def && r.is_implicit && r.is_early_clobber)
            })
            .map(|(idx, _)| idx))
    }
}

/// Operand layout of a statepoint:
///
/// ```text
/// <id>, <num bytes>, <num call args>, <target>, [call arguments], [stack map operands]
/// ```
pub struct StatepointOpers<'a> {
    mi: &'a MachineInstr,
}

impl<'a> StatepointOpers<'a> {
    pub const ID_POS: usize = 0;
    pub const NBYTES_POS: usize = 1;
    pub const NCALL_ARGS_POS: usize = 2;
    pub const CALL_TARGET_POS: usize = 3;
    pub const META_END: usize = 4;

    pub fn new(mi: &'a MachineInstr) -> Self {
        StatepointOpers { mi }
    }

    pub fn id(&self) -> Result<u64> {
        Ok(self.mi.imm(Self::ID_POS)? as u64)
    }

    pub fn num_patch_bytes(&self) -> Result<usize> {
        self.mi.count(Self::NBYTES_POS)
    }

    pub fn var_idx(&self) -> Result<usize> {
        Ok(self.mi.count(Self::NCALL_ARGS_POS)? + Self::META_END)
    }
}
