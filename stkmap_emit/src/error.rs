use thiserror::Error;

use crate::operand::Opcode;

/// Contract violations between the code generator and the encoder. None of these are expected
/// in correct operation and none are retried.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("unsupported stackmap version {0}")]
    UnsupportedVersion(u8),
    #[error("cannot read configuration {var}={value:?}")]
    BadConfig { var: &'static str, value: String },
    #[error("expected a {expected:?} instruction, got {actual:?}")]
    UnexpectedOpcode { expected: Opcode, actual: Opcode },
    #[error("{opcode:?} has no operand {idx}")]
    MissingOperand { opcode: Opcode, idx: usize },
    #[error("{opcode:?} operand {idx} should be an immediate")]
    ExpectedImmediate { opcode: Opcode, idx: usize },
    #[error("{opcode:?} operand {idx} is {value}, expected a count")]
    BadOperandCount { opcode: Opcode, idx: usize, value: i64 },
    #[error("operand {idx} should be a register")]
    ExpectedRegister { idx: usize },
    #[error("operand {idx} should be an immediate inside an operand group")]
    MalformedOperandGroup { idx: usize },
    #[error("unrecognized operand type {0}")]
    UnknownOperandKind(i64),
    #[error("unexpected additional definition in patchpoint")]
    UnexpectedPatchPointDef,
    #[error("stackmap has no return value to record")]
    MissingResult,
    #[error("no DWARF register number for {0} or any of its super-registers")]
    NoDwarfRegister(String),
    #[error("no register class contains {0}")]
    NoRegisterClass(String),
    #[error("physical sub-register index still attached to {0}")]
    UnexpectedSubRegister(String),
    #[error("pointer size of {0} bits is not a whole number of bytes")]
    BadPointerSize(u32),
    #[error("location size {0} does not fit a size field")]
    BadLocationSize(i64),
    #[error("location offset {0} does not fit in 32 bits")]
    OffsetOutOfRange(i64),
    #[error("live-out mask has {words} words, {num_regs} registers need more")]
    ShortLiveOutMask { words: usize, num_regs: usize },
    #[error("anyregcc location {idx} of patchpoint {id} is not in a register")]
    AnyRegNotInRegister { id: u64, idx: usize },
    #[error("no call sites recorded, but {constants} constants and {functions} functions are pending")]
    OrphanedState { constants: usize, functions: usize },
}

pub type Result<T> = std::result::Result<T, EmitError>;
