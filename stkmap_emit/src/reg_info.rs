use std::collections::HashMap;

use index_vec::{define_index_type, IndexVec};

define_index_type! {
    /// A target physical register.
    pub struct PhysReg = u16;
}

/// What the encoder needs to know about the target's registers.
pub trait RegisterInfo {
    fn num_regs(&self) -> usize;

    fn name(&self, reg: PhysReg) -> &str;

    /// The DWARF number of `reg` itself, without looking at super-registers.
    fn dwarf_reg_num(&self, reg: PhysReg) -> Option<u16>;

    /// The register carrying a given DWARF number.
    fn reg_for_dwarf(&self, dwarf: u16) -> Option<PhysReg>;

    /// All super-registers of `reg`, nearest first.
    fn super_regs(&self, reg: PhysReg) -> &[PhysReg];

    /// Spill size in bytes of the smallest register class containing `reg`.
    fn min_reg_class_size(&self, reg: PhysReg) -> Option<u32>;

    /// Bit offset of `sub` inside `reg`, if `sub` is a proper sub-register of it.
    fn sub_reg_offset(&self, _reg: PhysReg, _sub: PhysReg) -> Option<u32> {
        None
    }

    /// True if `reg_b` is a super-register of `reg_a`.
    fn is_super_register(&self, reg_a: PhysReg, reg_b: PhysReg) -> bool {
        self.super_regs(reg_a).contains(&reg_b)
    }
}

#[derive(Debug, Clone)]
struct RegDesc {
    name: String,
    dwarf: Option<u16>,
    class_size: Option<u32>,
    supers: Vec<PhysReg>,
}

/// A register model described by tables, built up one register at a time.
#[derive(Debug, Clone, Default)]
pub struct TableRegisterInfo {
    regs: IndexVec<PhysReg, RegDesc>,
    by_dwarf: HashMap<u16, PhysReg>,
    // (super, sub) -> bit offset of sub inside super
    sub_offsets: HashMap<(PhysReg, PhysReg), u32>,
}

impl TableRegisterInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a top-level register.
    pub fn add_reg(&mut self, name: &str, dwarf: Option<u16>, class_size: Option<u32>) -> PhysReg {
        let reg = self.regs.push(RegDesc {
            name: name.into(),
            dwarf,
            class_size,
            supers: Vec::new(),
        });
        if let Some(dwarf) = dwarf {
            self.by_dwarf.entry(dwarf).or_insert(reg);
        }
        reg
    }

    /// Adds a sub-register living `bit_offset` bits into `parent`.
    pub fn add_sub_reg(
        &mut self,
        name: &str,
        parent: PhysReg,
        bit_offset: u32,
        dwarf: Option<u16>,
        class_size: Option<u32>,
    ) -> PhysReg {
        let mut supers = vec![parent];
        supers.extend(self.regs[parent].supers.iter().copied());

        let reg = self.add_reg(name, dwarf, class_size);
        self.sub_offsets.insert((parent, reg), bit_offset);
        for outer in &self.regs[parent].supers {
            let parent_offset = self.sub_offsets[&(*outer, parent)];
            self.sub_offsets.insert((*outer, reg), parent_offset + bit_offset);
        }
        self.regs[reg].supers = supers;
        reg
    }

    pub fn reg_by_name(&self, name: &str) -> Option<PhysReg> {
        self.regs
            .iter_enumerated()
            .find(|(_, desc)| desc.name == name)
            .map(|(reg, _)| reg)
    }

    /// General purpose, stack/frame and SSE registers of x86-64 with their DWARF numbering.
    /// The 32, 16 and 8 bit views carry no DWARF number of their own.
    pub fn x86_64() -> Self {
        const LEGACY: [(&str, &str, &str, &str, Option<&str>); 8] = [
            ("RAX", "EAX", "AX", "AL", Some("AH")),
            ("RDX", "EDX", "DX", "DL", Some("DH")),
            ("RCX", "ECX", "CX", "CL", Some("CH")),
            ("RBX", "EBX", "BX", "BL", Some("BH")),
            ("RSI", "ESI", "SI", "SIL", None),
            ("RDI", "EDI", "DI", "DIL", None),
            ("RBP", "EBP", "BP", "BPL", None),
            ("RSP", "ESP", "SP", "SPL", None),
        ];

        let mut info = Self::new();
        for (dwarf, (r64, r32, r16, r8, high)) in LEGACY.iter().enumerate() {
            let full = info.add_reg(r64, Some(dwarf as u16), Some(8));
            let half = info.add_sub_reg(r32, full, 0, None, Some(4));
            let word = info.add_sub_reg(r16, half, 0, None, Some(2));
            info.add_sub_reg(r8, word, 0, None, Some(1));
            if let Some(high) = high {
                info.add_sub_reg(high, word, 8, None, Some(1));
            }
        }
        for n in 8..16u16 {
            let full = info.add_reg(&format!("R{}", n), Some(n), Some(8));
            let half = info.add_sub_reg(&format!("R{}D", n), full, 0, None, Some(4));
            let word = info.add_sub_reg(&format!("R{}W", n), half, 0, None, Some(2));
            info.add_sub_reg(&format!("R{}B", n), word, 0, None, Some(1));
        }
        info.add_reg("RIP", Some(16), None);
        for n in 0..16u16 {
            info.add_reg(&format!("XMM{}", n), Some(17 + n), Some(16));
        }
        info
    }
}

impl RegisterInfo for TableRegisterInfo {
    fn num_regs(&self) -> usize {
        self.regs.len()
    }

    fn name(&self, reg: PhysReg) -> &str {
        &self.regs[reg].name
    }

    fn dwarf_reg_num(&self, reg: PhysReg) -> Option<u16> {
        self.regs[reg].dwarf
    }

    fn reg_for_dwarf(&self, dwarf: u16) -> Option<PhysReg> {
        self.by_dwarf.get(&dwarf).copied()
    }

    fn super_regs(&self, reg: PhysReg) -> &[PhysReg] {
        &self.regs[reg].supers
    }

    fn min_reg_class_size(&self, reg: PhysReg) -> Option<u32> {
        self.regs[reg].class_size
    }

    fn sub_reg_offset(&self, reg: PhysReg, sub: PhysReg) -> Option<u32> {
        self.sub_offsets.get(&(reg, sub)).copied()
    }
}
