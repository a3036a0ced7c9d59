use crate::section::*;
use byteorder::ByteOrder;
use log::{debug, trace};
use std::convert::TryFrom;
use std::marker::PhantomData;
use stkmap_types::{align_to, LocationKind, RECORD_ALIGN, STACKMAP_VERSION};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("cannot parse stackmap format version {0}")]
    UnsupportedVersion(u8),
    #[error("reserved field at {offset} expected to be 0, actually {actual}")]
    NonZeroReserved { offset: usize, actual: u64 },
    #[error("padding at {offset} expected to be 0, actually {actual}")]
    NonZeroPadding { offset: usize, actual: u32 },
    #[error("record {id:#x} has nonzero flags {flags:#x}")]
    NonZeroRecordFlags { id: u64, flags: u16 },
    #[error("read unsupported location type {0}")]
    UnsupportedLocationType(u8),
    #[error("record at {offset} has {count} live-outs, live-out parsing is not implemented")]
    UnsupportedLiveOuts { offset: usize, count: u16 },
    #[error("got negative offset {0} into constant table")]
    NegativeConstantOffset(i32),
    #[error("offset {0} is out of bounds of constant table")]
    ConstantTableOverflow(i32),
    #[error("unexpectedly hit end of input data at {offset} while reading {len} bytes")]
    UnexpectedEof { offset: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, ParseError>;

pub struct Parser<'a, BO: ByteOrder> {
    data: &'a [u8],
    pos: usize,
    // record alignment is relative to the section start, not the buffer
    start: usize,
    _phantom: PhantomData<BO>,
}

impl<'a, BO: ByteOrder + 'a> Parser<'a, BO> {
    pub fn parse(data: &'a [u8]) -> Result<StackMapSection> {
        let mut pos = 0;
        Self::parse_from(data, &mut pos)
    }

    /// Parses a section starting at `*pos`, leaving `*pos` just past its last record. If the
    /// input ends inside the last record's padding, `*pos` is `data.len()`.
    pub fn parse_from(data: &'a [u8], pos: &mut usize) -> Result<StackMapSection> {
        let mut parser = Parser {
            data,
            pos: *pos,
            start: *pos,
            _phantom: PhantomData::<BO>,
        };

        let section = parser.parse_section()?;
        *pos = parser.pos.min(data.len());
        Ok(section)
    }

    fn parse_section(&mut self) -> Result<StackMapSection> {
        let version = self.read_u8()?;
        if version != STACKMAP_VERSION {
            return Err(ParseError::UnsupportedVersion(version));
        }
        self.expect_reserved_u8()?;
        self.expect_reserved_u16()?;

        let num_functions = self.read_u32()?;
        let num_constants = self.read_u32()?;
        let num_records = self.read_u32()?;
        debug!(
            "stackmap section: {} functions, {} constants, {} records",
            num_functions, num_constants, num_records
        );

        // counts come from the input, so don't trust them for preallocation
        let mut functions = Vec::new();
        for _ in 0..num_functions {
            let addr = self.read_u64()?;
            let stack_size = self.read_u64()?;
            functions.push(FunctionFrameRecord { addr, stack_size });
        }

        let mut constants = Vec::new();
        for _ in 0..num_constants {
            constants.push(self.read_u64()?);
        }

        let mut records = Vec::new();
        for _ in 0..num_records {
            records.push(self.parse_record()?);
        }

        let section = StackMapSection {
            version,
            functions,
            constants,
            records,
        };
        section.verify()?;
        Ok(section)
    }

    fn parse_record(&mut self) -> Result<StackMapRecord> {
        let record_at = self.pos;
        let patch_point_id = self.read_u64()?;
        let instruction_offset = self.read_u32()?;
        let flags = self.read_u16()?;
        if flags != 0 {
            return Err(ParseError::NonZeroRecordFlags {
                id: patch_point_id,
                flags,
            });
        }

        let num_locations = self.read_u16()?;
        let mut locations = Vec::with_capacity(num_locations as usize);
        for _ in 0..num_locations {
            locations.push(self.parse_location()?);
        }

        self.expect_padding_u16()?;
        let live_outs_at = self.pos;
        let num_live_outs = self.read_u16()?;
        if num_live_outs != 0 {
            return Err(ParseError::UnsupportedLiveOuts {
                offset: live_outs_at,
                count: num_live_outs,
            });
        }

        // the trailing padding isn't read, the section may be cut off right after the live-outs
        self.pos = self.start + align_to(self.pos - self.start, RECORD_ALIGN);
        trace!(
            "record {:#x} at {}: offset {}, {} locations",
            patch_point_id,
            record_at,
            instruction_offset,
            locations.len()
        );

        Ok(StackMapRecord {
            patch_point_id,
            instruction_offset,
            flags,
            locations,
        })
    }

    fn parse_location(&mut self) -> Result<LocationRecord> {
        let kind = self.read_u8()?;
        let size = self.read_u8()?;
        let dwarf_reg = self.read_u16()?;
        let offset = self.read_i32()?;

        let kind = match LocationKind::try_from(kind) {
            Ok(kind) if kind.is_encodable() => kind,
            _ => return Err(ParseError::UnsupportedLocationType(kind)),
        };

        Ok(LocationRecord {
            kind,
            size,
            dwarf_reg,
            offset,
        })
    }

    fn read_n(&mut self, n: usize) -> Result<&[u8]> {
        let eof = ParseError::UnexpectedEof {
            offset: self.pos,
            len: n,
        };
        let new_pos = match self.pos.checked_add(n) {
            Some(new_pos) if new_pos <= self.data.len() => new_pos,
            _ => return Err(eof),
        };
        let res = &self.data[self.pos..new_pos];
        self.pos = new_pos;
        Ok(res)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_n(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(BO::read_u16(self.read_n(2)?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(BO::read_u32(self.read_n(4)?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(BO::read_u64(self.read_n(8)?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(BO::read_i32(self.read_n(4)?))
    }

    fn expect_reserved_u8(&mut self) -> Result<()> {
        let offset = self.pos;
        let n = self.read_u8()?;
        if n != 0 {
            Err(ParseError::NonZeroReserved {
                offset,
                actual: n as u64,
            })
        } else {
            Ok(())
        }
    }

    fn expect_reserved_u16(&mut self) -> Result<()> {
        let offset = self.pos;
        let n = self.read_u16()?;
        if n != 0 {
            Err(ParseError::NonZeroReserved {
                offset,
                actual: n as u64,
            })
        } else {
            Ok(())
        }
    }

    fn expect_padding_u16(&mut self) -> Result<()> {
        let offset = self.pos;
        let n = self.read_u16()?;
        if n != 0 {
            Err(ParseError::NonZeroPadding {
                offset,
                actual: n as u32,
            })
        } else {
            Ok(())
        }
    }
}
