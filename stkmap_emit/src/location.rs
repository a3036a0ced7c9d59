use stkmap_types::LocationKind;

use crate::error::{EmitError, Result};
use crate::reg_info::{PhysReg, RegisterInfo};

/// Where one value lives at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub kind: LocationKind,
    pub size: u8,
    pub reg: u16,
    /// Frame offset, immediate, or constant pool index depending on `kind`. Wide until large
    /// constants have been moved to the pool.
    pub offset: i64,
}

impl Location {
    pub fn new(kind: LocationKind, size: u8, reg: u16, offset: i64) -> Self {
        Self {
            kind,
            size,
            reg,
            offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveOutReg {
    pub reg: PhysReg,
    pub dwarf_reg: u16,
    pub size: u8,
}

/// Goes up the super-register chain until it hits a register with a DWARF number.
pub fn dwarf_reg_num(reg: PhysReg, tri: &dyn RegisterInfo) -> Result<u16> {
    if let Some(n) = tri.dwarf_reg_num(reg) {
        return Ok(n);
    }
    tri.super_regs(reg)
        .iter()
        .find_map(|sr| tri.dwarf_reg_num(*sr))
        .ok_or_else(|| EmitError::NoDwarfRegister(tri.name(reg).into()))
}

pub(crate) fn reg_class_size(reg: PhysReg, tri: &dyn RegisterInfo) -> Result<u8> {
    let size = tri
        .min_reg_class_size(reg)
        .ok_or_else(|| EmitError::NoRegisterClass(tri.name(reg).into()))?;
    u8::try_from(size).map_err(|_| EmitError::BadLocationSize(size.into()))
}

pub fn create_live_out_reg(reg: PhysReg, tri: &dyn RegisterInfo) -> Result<LiveOutReg> {
    Ok(LiveOutReg {
        reg,
        dwarf_reg: dwarf_reg_num(reg, tri)?,
        size: reg_class_size(reg, tri)?,
    })
}

/// Expands a register mask into live-out records, one per set bit, then normalizes them.
pub fn parse_register_live_out_mask(
    mask: &[u32],
    tri: &dyn RegisterInfo,
) -> Result<Vec<LiveOutReg>> {
    let num_regs = tri.num_regs();
    if mask.len() * 32 < num_regs {
        return Err(EmitError::ShortLiveOutMask {
            words: mask.len(),
            num_regs,
        });
    }

    let mut live_outs = Vec::new();
    for idx in 0..num_regs {
        if (mask[idx / 32] >> (idx % 32)) & 1 != 0 {
            live_outs.push(create_live_out_reg(PhysReg::from_usize(idx), tri)?);
        }
    }
    Ok(normalize_live_outs(live_outs, tri))
}

/// Keeps one entry per DWARF register. When a register and its super-register are both live,
/// the super-register survives with the largest size seen.
pub fn normalize_live_outs(mut live_outs: Vec<LiveOutReg>, tri: &dyn RegisterInfo) -> Vec<LiveOutReg> {
    live_outs.sort_by_key(|lo| (lo.dwarf_reg, lo.reg));

    let mut merged: Vec<LiveOutReg> = Vec::with_capacity(live_outs.len());
    for lo in live_outs {
        match merged.last_mut() {
            Some(last) if last.dwarf_reg == lo.dwarf_reg => {
                last.size = last.size.max(lo.size);
                if tri.is_super_register(last.reg, lo.reg) {
                    last.reg = lo.reg;
                }
            }
            _ => merged.push(lo),
        }
    }
    merged
}
