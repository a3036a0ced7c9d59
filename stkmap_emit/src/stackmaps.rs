use std::fmt::{self, Write};

use indexmap::IndexMap;
use log::{debug, trace, warn};
use stkmap_types::{
    LocationKind, CONSTANT_OP, DIRECT_MEM_REF_OP, DYNAMIC_FRAME_SIZE, INDIRECT_MEM_REF_OP,
};

use crate::config::StackMapConfig;
use crate::const_pool::{fits_inline, ConstantPool};
use crate::error::{EmitError, Result};
use crate::location::{
    dwarf_reg_num, parse_register_live_out_mask, reg_class_size, LiveOutReg, Location,
};
use crate::operand::{MachineInstr, MachineOperand, Opcode, PatchPointOpers, StatepointOpers};
use crate::reg_info::RegisterInfo;
use crate::streamer::{Expr, Streamer, Symbol};

pub(crate) const WSMP: &str = "Stack Maps: ";

/// Frame facts about the function currently being emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionFrame {
    /// Symbol at the function's entry; call site offsets are relative to it.
    pub symbol: Symbol,
    pub stack_size: u64,
    pub has_var_sized_objects: bool,
    pub needs_stack_realignment: bool,
    pub pointer_size_bits: u32,
}

impl FunctionFrame {
    pub fn new(symbol: Symbol, stack_size: u64) -> Self {
        Self {
            symbol,
            stack_size,
            has_var_sized_objects: false,
            needs_stack_realignment: false,
            pointer_size_bits: 64,
        }
    }

    /// The stack size to record, or the dynamic marker when it isn't statically known.
    pub fn recorded_stack_size(&self) -> u64 {
        if self.has_var_sized_objects || self.needs_stack_realignment {
            DYNAMIC_FRAME_SIZE
        } else {
            self.stack_size
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallsiteInfo {
    pub offset_expr: Expr,
    pub id: u64,
    pub locations: Vec<Location>,
    pub live_outs: Vec<LiveOutReg>,
}

/// Call sites, constants and frame sizes collected over one compilation unit.
///
/// Everything is drained by [`StackMaps::serialize_to_stack_map_section`], after which the
/// session can be reused for the next unit. Sessions aren't shared between units compiled
/// concurrently; each one gets its own.
pub struct StackMaps<'a> {
    tri: &'a dyn RegisterInfo,
    pub(crate) call_sites: Vec<CallsiteInfo>,
    pub(crate) const_pool: ConstantPool,
    pub(crate) fn_stack_size: IndexMap<Symbol, u64>,
}

impl<'a> StackMaps<'a> {
    pub fn new(config: StackMapConfig, tri: &'a dyn RegisterInfo) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tri,
            call_sites: Vec::new(),
            const_pool: ConstantPool::new(),
            fn_stack_size: IndexMap::new(),
        })
    }

    pub fn register_info(&self) -> &'a dyn RegisterInfo {
        self.tri
    }

    pub fn call_sites(&self) -> &[CallsiteInfo] {
        &self.call_sites
    }

    pub fn constant_pool(&self) -> &ConstantPool {
        &self.const_pool
    }

    pub fn function_stack_sizes(&self) -> &IndexMap<Symbol, u64> {
        &self.fn_stack_size
    }

    pub fn is_empty(&self) -> bool {
        self.call_sites.is_empty()
    }

    /// Classifies the operand group starting at `idx`, returning the index of the next one.
    fn parse_operand(
        &self,
        ops: &[MachineOperand],
        mut idx: usize,
        frame: &FunctionFrame,
        locs: &mut Vec<Location>,
        live_outs: &mut Vec<LiveOutReg>,
    ) -> Result<usize> {
        let tri = self.tri;
        match &ops[idx] {
            MachineOperand::Imm(tag) => {
                match *tag {
                    DIRECT_MEM_REF_OP => {
                        if frame.pointer_size_bits % 8 != 0 {
                            return Err(EmitError::BadPointerSize(frame.pointer_size_bits));
                        }
                        let size = u8::try_from(frame.pointer_size_bits / 8)
                            .map_err(|_| EmitError::BadPointerSize(frame.pointer_size_bits))?;
                        idx += 1;
                        let reg = expect_reg(ops, idx)?;
                        idx += 1;
                        let offset = expect_offset(ops, idx)?;
                        locs.push(Location::new(
                            LocationKind::Direct,
                            size,
                            dwarf_reg_num(reg, tri)?,
                            offset,
                        ));
                    }
                    INDIRECT_MEM_REF_OP => {
                        idx += 1;
                        let size = expect_imm(ops, idx)?;
                        let size = match u8::try_from(size) {
                            Ok(size) if size > 0 => size,
                            _ => return Err(EmitError::BadLocationSize(size)),
                        };
                        idx += 1;
                        let reg = expect_reg(ops, idx)?;
                        idx += 1;
                        let offset = expect_offset(ops, idx)?;
                        locs.push(Location::new(
                            LocationKind::Indirect,
                            size,
                            dwarf_reg_num(reg, tri)?,
                            offset,
                        ));
                    }
                    CONSTANT_OP => {
                        idx += 1;
                        let imm = expect_imm(ops, idx)?;
                        locs.push(Location::new(
                            LocationKind::Constant,
                            std::mem::size_of::<i64>() as u8,
                            0,
                            imm,
                        ));
                    }
                    other => return Err(EmitError::UnknownOperandKind(other)),
                }
            }
            // Registers are recorded by DWARF number together with the size of a spill slot
            // that can hold them; the runtime tracks the real type size if it cares.
            MachineOperand::Reg(op) => {
                // implicit registers, including scratch registers, aren't live values
                if !op.is_implicit {
                    if op.sub_reg != 0 {
                        return Err(EmitError::UnexpectedSubRegister(tri.name(op.reg).into()));
                    }
                    let size = reg_class_size(op.reg, tri)?;
                    let reg_no = dwarf_reg_num(op.reg, tri)?;
                    let offset = tri
                        .reg_for_dwarf(reg_no)
                        .and_then(|full| tri.sub_reg_offset(full, op.reg))
                        .unwrap_or(0);
                    locs.push(Location::new(
                        LocationKind::Register,
                        size,
                        reg_no,
                        offset.into(),
                    ));
                }
            }
            MachineOperand::RegLiveOut(mask) => {
                *live_outs = parse_register_live_out_mask(mask, tri)?;
            }
        }
        Ok(idx + 1)
    }

    fn parse_operands(
        &self,
        mi: &MachineInstr,
        start: usize,
        record_result: bool,
        frame: &FunctionFrame,
    ) -> Result<(Vec<Location>, Vec<LiveOutReg>)> {
        let mut locations = Vec::new();
        let mut live_outs = Vec::new();

        if record_result {
            if !PatchPointOpers::new(mi)?.has_def() {
                return Err(EmitError::MissingResult);
            }
            self.parse_operand(&mi.operands[..1], 0, frame, &mut locations, &mut live_outs)?;
        }

        let mut idx = start;
        while idx < mi.operands.len() {
            idx = self.parse_operand(&mi.operands, idx, frame, &mut locations, &mut live_outs)?;
        }
        trace!(
            "{}parsed {} locations, {} live-outs from {:?}",
            WSMP,
            locations.len(),
            live_outs.len(),
            mi.opcode
        );
        Ok((locations, live_outs))
    }

    fn commit_call_site(
        &mut self,
        out: &mut dyn Streamer,
        frame: &FunctionFrame,
        id: u64,
        mut locations: Vec<Location>,
        live_outs: Vec<LiveOutReg>,
    ) {
        let label = out.create_temp_symbol();
        out.emit_label(label);

        // Constants are sign extended from 32 bits, so -1 stays inline as 0xffffffff.
        for loc in locations.iter_mut() {
            if loc.kind == LocationKind::Constant && !fits_inline(loc.offset) {
                loc.kind = LocationKind::ConstantIndex;
                loc.offset = self.const_pool.insert(loc.offset) as i64;
            }
        }

        self.call_sites.push(CallsiteInfo {
            offset_expr: Expr::offset_from(label, frame.symbol),
            id,
            locations,
            live_outs,
        });

        let size = frame.recorded_stack_size();
        if let Some(prev) = self.fn_stack_size.insert(frame.symbol, size) {
            // every call site of a function sees the same frame, so this should never differ
            if prev != size {
                warn!(
                    "{}frame size of function {:?} changed from {} to {}",
                    WSMP, frame.symbol, prev, size
                );
            }
        }
    }

    fn record_stack_map_opers(
        &mut self,
        out: &mut dyn Streamer,
        frame: &FunctionFrame,
        mi: &MachineInstr,
        id: u64,
        start: usize,
        record_result: bool,
    ) -> Result<()> {
        let (locations, live_outs) = self.parse_operands(mi, start, record_result, frame)?;
        self.commit_call_site(out, frame, id, locations, live_outs);
        Ok(())
    }

    /// Records a plain stack map: `<id>, <shadow bytes>, live operands...`.
    pub fn record_stack_map(
        &mut self,
        out: &mut dyn Streamer,
        frame: &FunctionFrame,
        mi: &MachineInstr,
    ) -> Result<()> {
        mi.expect_opcode(Opcode::StackMap)?;
        let id = mi.imm(0)? as u64;
        // make sure the shadow byte count is there even though it isn't recorded
        mi.imm(1)?;
        self.record_stack_map_opers(out, frame, mi, id, 2, false)
    }

    pub fn record_patch_point(
        &mut self,
        out: &mut dyn Streamer,
        frame: &FunctionFrame,
        mi: &MachineInstr,
    ) -> Result<()> {
        mi.expect_opcode(Opcode::PatchPoint)?;
        let opers = PatchPointOpers::new(mi)?;
        let id = opers.meta_imm(PatchPointOpers::ID_POS)? as u64;
        let start = opers.stack_map_start_idx()?;
        let record_result = opers.is_any_reg() && opers.has_def();
        let (locations, live_outs) = self.parse_operands(mi, start, record_result, frame)?;

        // anyregcc arguments and result must have been assigned registers
        if opers.is_any_reg() {
            let count = opers.num_args()? + usize::from(opers.has_def());
            for idx in 0..count {
                match locations.get(idx) {
                    Some(loc) if loc.kind == LocationKind::Register => {}
                    _ => return Err(EmitError::AnyRegNotInRegister { id, idx }),
                }
            }
        }

        self.commit_call_site(out, frame, id, locations, live_outs);
        Ok(())
    }

    /// Records a statepoint. Deopt and GC operands run contiguously to the end of the operand
    /// list; the result is never recorded.
    pub fn record_statepoint(
        &mut self,
        out: &mut dyn Streamer,
        frame: &FunctionFrame,
        mi: &MachineInstr,
    ) -> Result<()> {
        mi.expect_opcode(Opcode::Statepoint)?;
        let opers = StatepointOpers::new(mi);
        let id = opers.id()?;
        let start = opers.var_idx()?;
        self.record_stack_map_opers(out, frame, mi, id, start, false)
    }

    /// Dispatches on the marker's opcode.
    pub fn record(
        &mut self,
        out: &mut dyn Streamer,
        frame: &FunctionFrame,
        mi: &MachineInstr,
    ) -> Result<()> {
        match mi.opcode {
            Opcode::StackMap => self.record_stack_map(out, frame, mi),
            Opcode::PatchPoint => self.record_patch_point(out, frame, mi),
            Opcode::Statepoint => self.record_statepoint(out, frame, mi),
        }
    }

    /// Writes a human readable listing of the pending call sites.
    pub fn print(&self, os: &mut dyn Write) -> fmt::Result {
        let tri = self.tri;
        let reg_name = |dwarf: u16| match tri.reg_for_dwarf(dwarf) {
            Some(reg) => tri.name(reg).to_string(),
            None => dwarf.to_string(),
        };

        writeln!(os, "{}callsites:", WSMP)?;
        for csi in &self.call_sites {
            writeln!(os, "{}callsite {}", WSMP, csi.id)?;
            writeln!(os, "{}  has {} locations", WSMP, csi.locations.len())?;
            for (idx, loc) in csi.locations.iter().enumerate() {
                write!(os, "{}  Loc {}: ", WSMP, idx)?;
                match loc.kind {
                    LocationKind::Unprocessed => write!(os, "<Unprocessed operand>")?,
                    LocationKind::Register => write!(os, "Register {}", reg_name(loc.reg))?,
                    LocationKind::Direct => {
                        write!(os, "Direct {}", reg_name(loc.reg))?;
                        if loc.offset != 0 {
                            write!(os, " + {}", loc.offset)?;
                        }
                    }
                    LocationKind::Indirect => {
                        write!(os, "Indirect {}+{}", reg_name(loc.reg), loc.offset)?
                    }
                    LocationKind::Constant => write!(os, "Constant {}", loc.offset)?,
                    LocationKind::ConstantIndex => write!(os, "Constant Index {}", loc.offset)?,
                }
                writeln!(
                    os,
                    "     [encoding: .byte {}, .byte {}, .short {}, .int {}]",
                    loc.kind.code(),
                    loc.size,
                    loc.reg,
                    loc.offset
                )?;
            }

            writeln!(os, "{}  has {} live-out registers", WSMP, csi.live_outs.len())?;
            for (idx, lo) in csi.live_outs.iter().enumerate() {
                writeln!(
                    os,
                    "{}  LO {}: {}      [encoding: .short {}, .byte 0, .byte {}]",
                    WSMP,
                    idx,
                    tri.name(lo.reg),
                    lo.dwarf_reg,
                    lo.size
                )?;
            }
        }
        Ok(())
    }

    pub(crate) fn log_pending(&self) {
        if log::log_enabled!(log::Level::Debug) {
            let mut dump = String::new();
            if self.print(&mut dump).is_ok() {
                debug!("{}", dump.trim_end());
            }
        }
    }
}

fn expect_imm(ops: &[MachineOperand], idx: usize) -> Result<i64> {
    match ops.get(idx) {
        Some(MachineOperand::Imm(v)) => Ok(*v),
        _ => Err(EmitError::MalformedOperandGroup { idx }),
    }
}

fn expect_offset(ops: &[MachineOperand], idx: usize) -> Result<i64> {
    let offset = expect_imm(ops, idx)?;
    if !fits_inline(offset) {
        return Err(EmitError::OffsetOutOfRange(offset));
    }
    Ok(offset)
}

fn expect_reg(ops: &[MachineOperand], idx: usize) -> Result<crate::reg_info::PhysReg> {
    match ops.get(idx) {
        Some(MachineOperand::Reg(r)) => Ok(r.reg),
        Some(_) => Err(EmitError::ExpectedRegister { idx }),
        None => Err(EmitError::MalformedOperandGroup { idx }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg_info::{PhysReg, TableRegisterInfo};
    use crate::streamer::ObjectWriter;
    use crate::CALLING_CONV_ANY_REG;
    use byteorder::LittleEndian;

    fn r(tri: &TableRegisterInfo, name: &str) -> PhysReg {
        tri.reg_by_name(name).unwrap()
    }

    fn imm(v: i64) -> MachineOperand {
        MachineOperand::imm(v)
    }

    fn func(w: &mut ObjectWriter<LittleEndian>, name: &str, stack_size: u64) -> FunctionFrame {
        w.switch_section(".text");
        let sym = w.get_or_create_symbol(name);
        w.emit_label(sym);
        FunctionFrame::new(sym, stack_size)
    }

    fn stack_map(id: i64, live: Vec<MachineOperand>) -> MachineInstr {
        let mut ops = vec![imm(id), imm(0)];
        ops.extend(live);
        MachineInstr::new(Opcode::StackMap, ops)
    }

    #[test]
    fn classifies_operands() {
        let tri = TableRegisterInfo::x86_64();
        let mut sm = StackMaps::new(StackMapConfig::default(), &tri).unwrap();
        let mut w = ObjectWriter::<LittleEndian>::new();
        let frame = func(&mut w, "f", 32);

        let mi = stack_map(
            1,
            vec![
                imm(DIRECT_MEM_REF_OP),
                MachineOperand::reg(r(&tri, "RSP")),
                imm(-8),
                imm(INDIRECT_MEM_REF_OP),
                imm(4),
                MachineOperand::reg(r(&tri, "RBP")),
                imm(16),
                imm(CONSTANT_OP),
                imm(-1),
                imm(CONSTANT_OP),
                imm(0x1_0000_0001),
                MachineOperand::reg(r(&tri, "EAX")),
                MachineOperand::reg(r(&tri, "AH")),
                MachineOperand::scratch(r(&tri, "R11")),
                MachineOperand::live_out(&[r(&tri, "AL"), r(&tri, "RAX"), r(&tri, "RBX")]),
            ],
        );
        sm.record_stack_map(&mut w, &frame, &mi).unwrap();

        let csi = &sm.call_sites()[0];
        assert_eq!(csi.id, 1);
        assert_eq!(
            csi.locations,
            vec![
                Location::new(LocationKind::Direct, 8, 7, -8),
                Location::new(LocationKind::Indirect, 4, 6, 16),
                Location::new(LocationKind::Constant, 8, 0, -1),
                Location::new(LocationKind::ConstantIndex, 8, 0, 0),
                Location::new(LocationKind::Register, 4, 0, 0),
                Location::new(LocationKind::Register, 1, 0, 8),
            ]
        );
        let live: Vec<_> = csi.live_outs.iter().map(|lo| (lo.dwarf_reg, lo.size)).collect();
        assert_eq!(live, vec![(0, 8), (3, 8)]);
        assert_eq!(csi.live_outs[0].reg, r(&tri, "RAX"));

        assert_eq!(sm.constant_pool().iter().collect::<Vec<_>>(), vec![0x1_0000_0001]);
        assert_eq!(sm.function_stack_sizes().get(&frame.symbol), Some(&32));
    }

    #[test]
    fn pools_only_wide_constants() {
        let tri = TableRegisterInfo::x86_64();
        let mut sm = StackMaps::new(StackMapConfig::default(), &tri).unwrap();
        let mut w = ObjectWriter::<LittleEndian>::new();
        let frame = func(&mut w, "f", 0);

        let consts = |vals: &[i64]| {
            vals.iter()
                .flat_map(|v| vec![imm(CONSTANT_OP), imm(*v)])
                .collect::<Vec<_>>()
        };
        sm.record_stack_map(&mut w, &frame, &stack_map(1, consts(&[5, -1, 1 << 33])))
            .unwrap();
        sm.record_stack_map(&mut w, &frame, &stack_map(2, consts(&[1 << 33, 5, 0x1_0000_0001])))
            .unwrap();

        assert_eq!(
            sm.constant_pool().iter().collect::<Vec<_>>(),
            vec![1 << 33, 0x1_0000_0001]
        );
        let kinds = |idx: usize| {
            sm.call_sites()[idx]
                .locations
                .iter()
                .map(|l| (l.kind, l.offset))
                .collect::<Vec<_>>()
        };
        assert_eq!(
            kinds(0),
            vec![
                (LocationKind::Constant, 5),
                (LocationKind::Constant, -1),
                (LocationKind::ConstantIndex, 0),
            ]
        );
        assert_eq!(
            kinds(1),
            vec![
                (LocationKind::ConstantIndex, 0),
                (LocationKind::Constant, 5),
                (LocationKind::ConstantIndex, 1),
            ]
        );
    }

    fn record_err(
        sm: &mut StackMaps<'_>,
        w: &mut ObjectWriter<LittleEndian>,
        frame: &FunctionFrame,
        live: Vec<MachineOperand>,
    ) -> EmitError {
        sm.record_stack_map(w, frame, &stack_map(1, live)).unwrap_err()
    }

    #[test]
    fn malformed_operands() {
        let tri = TableRegisterInfo::x86_64();
        let mut sm = StackMaps::new(StackMapConfig::default(), &tri).unwrap();
        let mut w = ObjectWriter::<LittleEndian>::new();
        let frame = func(&mut w, "f", 0);
        let rsp = MachineOperand::reg(r(&tri, "RSP"));

        assert!(matches!(
            record_err(&mut sm, &mut w, &frame, vec![imm(3)]),
            EmitError::UnknownOperandKind(3)
        ));
        assert!(matches!(
            record_err(&mut sm, &mut w, &frame, vec![imm(INDIRECT_MEM_REF_OP), imm(0), rsp.clone(), imm(0)]),
            EmitError::BadLocationSize(0)
        ));
        assert!(matches!(
            record_err(&mut sm, &mut w, &frame, vec![imm(DIRECT_MEM_REF_OP), rsp.clone(), imm(1 << 40)]),
            EmitError::OffsetOutOfRange(_)
        ));
        assert!(matches!(
            record_err(&mut sm, &mut w, &frame, vec![imm(DIRECT_MEM_REF_OP), imm(0), imm(0)]),
            EmitError::ExpectedRegister { idx: 3 }
        ));
        assert!(matches!(
            record_err(&mut sm, &mut w, &frame, vec![imm(CONSTANT_OP)]),
            EmitError::MalformedOperandGroup { idx: 3 }
        ));

        let mut sub = match rsp {
            MachineOperand::Reg(op) => op,
            _ => unreachable!(),
        };
        sub.sub_reg = 1;
        assert!(matches!(
            record_err(&mut sm, &mut w, &frame, vec![MachineOperand::Reg(sub)]),
            EmitError::UnexpectedSubRegister(_)
        ));

        let mut odd = frame;
        odd.pointer_size_bits = 31;
        let mi = stack_map(1, vec![imm(DIRECT_MEM_REF_OP), MachineOperand::reg(sub.reg), imm(0)]);
        assert!(matches!(
            sm.record_stack_map(&mut w, &odd, &mi),
            Err(EmitError::BadPointerSize(31))
        ));

        // failed records leave the session untouched
        assert!(sm.is_empty());
        assert!(sm.function_stack_sizes().is_empty());
    }

    #[test]
    fn unresolvable_register() {
        let mut tri = TableRegisterInfo::new();
        let flags = tri.add_reg("EFLAGS", None, Some(4));
        let mut sm = StackMaps::new(StackMapConfig::default(), &tri).unwrap();
        let mut w = ObjectWriter::<LittleEndian>::new();
        let frame = func(&mut w, "f", 0);
        assert!(matches!(
            sm.record_stack_map(&mut w, &frame, &stack_map(1, vec![MachineOperand::reg(flags)])),
            Err(EmitError::NoDwarfRegister(_))
        ));
    }

    fn patch_point(tri: &TableRegisterInfo, cc: i64, args: Vec<MachineOperand>) -> MachineInstr {
        let mut ops = vec![
            MachineOperand::def(r(tri, "RAX")),
            imm(9),
            imm(16),
            imm(0),
            imm(args.len() as i64),
            imm(cc),
        ];
        ops.extend(args);
        ops.extend(vec![imm(CONSTANT_OP), imm(7)]);
        ops.push(MachineOperand::scratch(r(tri, "R11")));
        MachineInstr::new(Opcode::PatchPoint, ops)
    }

    #[test]
    fn patch_point_any_reg() {
        let tri = TableRegisterInfo::x86_64();
        let mut sm = StackMaps::new(StackMapConfig::default(), &tri).unwrap();
        let mut w = ObjectWriter::<LittleEndian>::new();
        let frame = func(&mut w, "f", 0);

        let args = vec![
            MachineOperand::reg(r(&tri, "RDI")),
            MachineOperand::reg(r(&tri, "ESI")),
        ];
        sm.record(&mut w, &frame, &patch_point(&tri, CALLING_CONV_ANY_REG, args))
            .unwrap();
        let locs: Vec<_> = sm.call_sites()[0]
            .locations
            .iter()
            .map(|l| (l.kind, l.reg))
            .collect();
        assert_eq!(
            locs,
            vec![
                (LocationKind::Register, 0),
                (LocationKind::Register, 5),
                (LocationKind::Register, 4),
                (LocationKind::Constant, 0),
            ]
        );
        assert_eq!(sm.call_sites()[0].id, 9);

        let spilled = vec![
            MachineOperand::reg(r(&tri, "RDI")),
            imm(DIRECT_MEM_REF_OP),
            MachineOperand::reg(r(&tri, "RSP")),
            imm(8),
        ];
        let mut mi = patch_point(&tri, CALLING_CONV_ANY_REG, spilled);
        // the spilled argument is one operand group spanning three operands
        mi.operands[4] = imm(2);
        assert!(matches!(
            sm.record_patch_point(&mut w, &frame, &mi),
            Err(EmitError::AnyRegNotInRegister { id: 9, idx: 2 })
        ));
        assert_eq!(sm.call_sites().len(), 1);
    }

    #[test]
    fn patch_point_skips_call_args() {
        let tri = TableRegisterInfo::x86_64();
        let mut sm = StackMaps::new(StackMapConfig::default(), &tri).unwrap();
        let mut w = ObjectWriter::<LittleEndian>::new();
        let frame = func(&mut w, "f", 0);

        let args = vec![MachineOperand::reg(r(&tri, "RDI"))];
        sm.record_patch_point(&mut w, &frame, &patch_point(&tri, 0, args))
            .unwrap();
        assert_eq!(
            sm.call_sites()[0].locations,
            vec![Location::new(LocationKind::Constant, 8, 0, 7)]
        );
    }

    #[test]
    fn statepoint_records_tail() {
        let tri = TableRegisterInfo::x86_64();
        let mut sm = StackMaps::new(StackMapConfig::default(), &tri).unwrap();
        let mut w = ObjectWriter::<LittleEndian>::new();
        let frame = func(&mut w, "f", 48);

        let mi = MachineInstr::new(
            Opcode::Statepoint,
            vec![
                imm(0xabc),
                imm(0),
                imm(1),
                imm(0x4000),
                MachineOperand::reg(r(&tri, "RDI")),
                imm(INDIRECT_MEM_REF_OP),
                imm(8),
                MachineOperand::reg(r(&tri, "RSP")),
                imm(24),
            ],
        );
        sm.record(&mut w, &frame, &mi).unwrap();
        let csi = &sm.call_sites()[0];
        assert_eq!(csi.id, 0xabc);
        assert_eq!(
            csi.locations,
            vec![Location::new(LocationKind::Indirect, 8, 7, 24)]
        );

        assert!(matches!(
            sm.record_stack_map(&mut w, &frame, &mi),
            Err(EmitError::UnexpectedOpcode {
                expected: Opcode::StackMap,
                actual: Opcode::Statepoint
            })
        ));
    }

    #[test]
    fn frame_sizes_per_function() {
        let tri = TableRegisterInfo::x86_64();
        let mut sm = StackMaps::new(StackMapConfig::default(), &tri).unwrap();
        let mut w = ObjectWriter::<LittleEndian>::new();

        let f = func(&mut w, "f", 24);
        sm.record(&mut w, &f, &stack_map(1, vec![])).unwrap();
        w.emit_bytes(&[0x90; 8]);
        sm.record(&mut w, &f, &stack_map(2, vec![])).unwrap();

        let mut g = func(&mut w, "g", 64);
        g.has_var_sized_objects = true;
        sm.record(&mut w, &g, &stack_map(3, vec![])).unwrap();

        let mut h = func(&mut w, "h", 64);
        h.needs_stack_realignment = true;
        sm.record(&mut w, &h, &stack_map(4, vec![])).unwrap();

        let sizes: Vec<_> = sm.function_stack_sizes().iter().map(|(s, v)| (*s, *v)).collect();
        assert_eq!(
            sizes,
            vec![
                (f.symbol, 24),
                (g.symbol, DYNAMIC_FRAME_SIZE),
                (h.symbol, DYNAMIC_FRAME_SIZE)
            ]
        );
        assert_eq!(sm.call_sites().len(), 4);
    }

    #[test]
    fn frame_size_last_write_wins() {
        let tri = TableRegisterInfo::x86_64();
        let mut sm = StackMaps::new(StackMapConfig::default(), &tri).unwrap();
        let mut w = ObjectWriter::<LittleEndian>::new();

        let early = func(&mut w, "f", 24);
        sm.record(&mut w, &early, &stack_map(1, vec![])).unwrap();
        let late = FunctionFrame::new(early.symbol, 48);
        sm.record(&mut w, &late, &stack_map(2, vec![])).unwrap();

        assert_eq!(sm.function_stack_sizes().len(), 1);
        assert_eq!(sm.function_stack_sizes().get(&early.symbol), Some(&48));
        assert_eq!(sm.call_sites().len(), 2);
    }

    #[test]
    fn rejects_unknown_version() {
        let tri = TableRegisterInfo::x86_64();
        assert!(matches!(
            StackMaps::new(StackMapConfig { version: 2 }, &tri),
            Err(EmitError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn print_listing() {
        let tri = TableRegisterInfo::x86_64();
        let mut sm = StackMaps::new(StackMapConfig::default(), &tri).unwrap();
        let mut w = ObjectWriter::<LittleEndian>::new();
        let frame = func(&mut w, "f", 0);
        let mi = stack_map(
            3,
            vec![
                imm(DIRECT_MEM_REF_OP),
                MachineOperand::reg(r(&tri, "RSP")),
                imm(-8),
                MachineOperand::live_out(&[r(&tri, "RBX")]),
            ],
        );
        sm.record(&mut w, &frame, &mi).unwrap();

        let mut out = String::new();
        sm.print(&mut out).unwrap();
        assert!(out.contains("Stack Maps: callsite 3"));
        assert!(out.contains(
            "Loc 0: Direct RSP + -8     [encoding: .byte 2, .byte 8, .short 7, .int -8]"
        ));
        assert!(out.contains("LO 0: RBX      [encoding: .short 3, .byte 0, .byte 8]"));
    }
}
