//! Byte emission for the encoder, plus a small in-memory object writer.
//!
//! The encoder never learns final addresses. Call site offsets are written as symbol
//! differences and only resolved when the writer is linked.

use std::collections::HashMap;
use std::marker::PhantomData;

use byteorder::ByteOrder;
use index_vec::{define_index_type, IndexVec};
use indexmap::IndexMap;
use log::trace;
use thiserror::Error;

define_index_type! {
    pub struct Symbol = u32;
}

/// A value only known once code layout is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Symbol(Symbol),
    Sub(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Expr::Sub(Box::new(lhs), Box::new(rhs))
    }

    /// `label - base`, the offset of `label` from `base`.
    pub fn offset_from(label: Symbol, base: Symbol) -> Self {
        Self::sub(Expr::Symbol(label), Expr::Symbol(base))
    }
}

/// Sink for emitted data, shaped after an assembler's streamer.
pub trait Streamer {
    /// A fresh local label with no name.
    fn create_temp_symbol(&mut self) -> Symbol;

    fn get_or_create_symbol(&mut self, name: &str) -> Symbol;

    /// Defines `sym` at the current position of the current section.
    fn emit_label(&mut self, sym: Symbol);

    fn switch_section(&mut self, name: &str);

    fn emit_bytes(&mut self, data: &[u8]);

    /// Emits the low `size` bytes of `value`.
    fn emit_int_value(&mut self, value: u64, size: usize);

    fn emit_symbol_value(&mut self, sym: Symbol, size: usize) {
        self.emit_value(&Expr::Symbol(sym), size);
    }

    fn emit_value(&mut self, expr: &Expr, size: usize);

    /// Zero-pads the current section to a multiple of `align`.
    fn emit_value_to_alignment(&mut self, align: usize);
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("undefined symbol {0}")]
    UndefinedSymbol(String),
    #[error("value {value} does not fit in {size} bytes at {section}+{offset}")]
    FixupOverflow {
        section: String,
        offset: usize,
        size: usize,
        value: i64,
    },
}

#[derive(Debug, Clone)]
struct SymbolData {
    name: Option<String>,
    def: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Fixup {
    section: usize,
    offset: usize,
    size: usize,
    expr: Expr,
}

/// Collects sections in memory. Values that depend on symbols are written as zeros and
/// patched by [`ObjectWriter::link`].
#[derive(Debug, Clone)]
pub struct ObjectWriter<BO: ByteOrder> {
    sections: Vec<Section>,
    current: usize,
    symbols: IndexVec<Symbol, SymbolData>,
    names: HashMap<String, Symbol>,
    fixups: Vec<Fixup>,
    _phantom: PhantomData<BO>,
}

/// Sections are laid out one after another from the link base, each on this boundary.
pub const SECTION_ALIGN: u64 = 16;

impl<BO: ByteOrder> ObjectWriter<BO> {
    pub fn new() -> Self {
        Self {
            sections: vec![Section {
                name: ".text".into(),
                data: Vec::new(),
            }],
            current: 0,
            symbols: IndexVec::new(),
            names: HashMap::new(),
            fixups: Vec::new(),
            _phantom: PhantomData,
        }
    }

    pub fn current_section(&self) -> &str {
        &self.sections[self.current].name
    }

    pub fn section_len(&self, name: &str) -> Option<usize> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.data.len())
    }

    fn cur(&mut self) -> &mut Vec<u8> {
        &mut self.sections[self.current].data
    }

    fn symbol_name(&self, sym: Symbol) -> String {
        match &self.symbols[sym].name {
            Some(name) => name.clone(),
            None => format!("<temp {}>", sym.index()),
        }
    }

    /// Places every section at increasing addresses from `base` and resolves all fixups.
    pub fn link(&self, base: u64) -> Result<LinkedObject, LinkError> {
        let mut addrs = Vec::with_capacity(self.sections.len());
        let mut next = base;
        for section in &self.sections {
            next = (next + SECTION_ALIGN - 1) & !(SECTION_ALIGN - 1);
            addrs.push(next);
            next += section.data.len() as u64;
        }

        let mut datas: Vec<Vec<u8>> = self.sections.iter().map(|s| s.data.clone()).collect();
        for fixup in &self.fixups {
            let value = self.eval(&fixup.expr, &addrs)?;
            let name = &self.sections[fixup.section].name;
            if !fits(value, fixup.size) {
                return Err(LinkError::FixupOverflow {
                    section: name.clone(),
                    offset: fixup.offset,
                    size: fixup.size,
                    value,
                });
            }
            trace!("fixup {}+{} = {:#x}", name, fixup.offset, value);
            let data = &mut datas[fixup.section];
            write_truncated::<BO>(
                &mut data[fixup.offset..fixup.offset + fixup.size],
                value as u64,
            );
        }

        let sections = self
            .sections
            .iter()
            .zip(addrs.iter())
            .zip(datas)
            .map(|((section, addr), data)| (section.name.clone(), (*addr, data)))
            .collect();

        let symbols = self
            .symbols
            .iter()
            .filter_map(|sym| {
                let name = sym.name.clone()?;
                let (section, offset) = sym.def?;
                Some((name, addrs[section] + offset as u64))
            })
            .collect();

        Ok(LinkedObject { sections, symbols })
    }

    fn eval(&self, expr: &Expr, addrs: &[u64]) -> Result<i64, LinkError> {
        Ok(match expr {
            Expr::Symbol(sym) => match self.symbols[*sym].def {
                Some((section, offset)) => (addrs[section] + offset as u64) as i64,
                None => return Err(LinkError::UndefinedSymbol(self.symbol_name(*sym))),
            },
            Expr::Sub(lhs, rhs) => self.eval(lhs, addrs)?.wrapping_sub(self.eval(rhs, addrs)?),
        })
    }
}

impl<BO: ByteOrder> Default for ObjectWriter<BO> {
    fn default() -> Self {
        Self::new()
    }
}

impl<BO: ByteOrder> Streamer for ObjectWriter<BO> {
    fn create_temp_symbol(&mut self) -> Symbol {
        self.symbols.push(SymbolData {
            name: None,
            def: None,
        })
    }

    fn get_or_create_symbol(&mut self, name: &str) -> Symbol {
        if let Some(sym) = self.names.get(name) {
            return *sym;
        }
        let sym = self.symbols.push(SymbolData {
            name: Some(name.into()),
            def: None,
        });
        self.names.insert(name.into(), sym);
        sym
    }

    fn emit_label(&mut self, sym: Symbol) {
        let offset = self.sections[self.current].data.len();
        self.symbols[sym].def = Some((self.current, offset));
    }

    fn switch_section(&mut self, name: &str) {
        self.current = match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section {
                    name: name.into(),
                    data: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
    }

    fn emit_bytes(&mut self, data: &[u8]) {
        self.cur().extend_from_slice(data);
    }

    fn emit_int_value(&mut self, value: u64, size: usize) {
        let buf = self.cur();
        let start = buf.len();
        buf.resize(start + size, 0);
        write_truncated::<BO>(&mut buf[start..], value);
    }

    fn emit_value(&mut self, expr: &Expr, size: usize) {
        let section = self.current;
        let offset = self.sections[section].data.len();
        self.cur().resize(offset + size, 0);
        self.fixups.push(Fixup {
            section,
            offset,
            size,
            expr: expr.clone(),
        });
    }

    fn emit_value_to_alignment(&mut self, align: usize) {
        let buf = self.cur();
        let len = stkmap_types::align_to(buf.len(), align);
        buf.resize(len, 0);
    }
}

/// Sections with their final addresses and contents.
#[derive(Debug, Clone)]
pub struct LinkedObject {
    sections: IndexMap<String, (u64, Vec<u8>)>,
    symbols: HashMap<String, u64>,
}

impl LinkedObject {
    pub fn section(&self, name: &str) -> Option<&[u8]> {
        self.sections.get(name).map(|(_, data)| data.as_slice())
    }

    pub fn section_addr(&self, name: &str) -> Option<u64> {
        self.sections.get(name).map(|(addr, _)| *addr)
    }

    pub fn symbol_addr(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }
}

fn fits(value: i64, size: usize) -> bool {
    if size == 0 {
        return value == 0;
    }
    if size >= 8 {
        return true;
    }
    let bits = size as u32 * 8;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << bits) - 1;
    (min..=max).contains(&value)
}

fn write_truncated<BO: ByteOrder>(buf: &mut [u8], value: u64) {
    let size = buf.len();
    if size == 0 {
        return;
    }
    let value = if size >= 8 {
        value
    } else {
        value & ((1u64 << (size * 8)) - 1)
    };
    BO::write_uint(buf, value, size);
}
