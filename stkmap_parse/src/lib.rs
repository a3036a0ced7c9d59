//! Runtime-side reader for stackmap sections (format version 1).
//!
//! The section is produced by `stkmap_emit` (or any other version 1 producer) and is read back
//! into plain values. Lookups are by function-relative instruction offset.

mod parser;
mod section;

pub use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};
pub use parser::{ParseError, Parser, Result};
pub use section::{
    FunctionFrameRecord, LocationPointer, LocationRecord, StackMapRecord, StackMapSection,
};
pub use stkmap_types::LocationKind;
