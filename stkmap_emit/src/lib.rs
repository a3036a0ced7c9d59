//! Compiler-side stackmap encoder.
//!
//! Code generation hands every stack map, patch point and statepoint marker to a
//! [`StackMaps`] session, which turns the marker's operands into location records. At the end
//! of the compilation unit the session is serialized into a single stackmap section through a
//! [`Streamer`] and drained.

mod config;
mod const_pool;
mod error;
mod location;
mod operand;
mod reg_info;
mod serialize;
mod stackmaps;
mod streamer;

pub use config::StackMapConfig;
pub use const_pool::{fits_inline, ConstantPool};
pub use error::{EmitError, Result};
pub use location::{
    create_live_out_reg, dwarf_reg_num, normalize_live_outs, parse_register_live_out_mask,
    LiveOutReg, Location,
};
pub use operand::{
    MachineInstr, MachineOperand, Opcode, PatchPointOpers, RegOperand, StatepointOpers,
    CALLING_CONV_ANY_REG,
};
pub use reg_info::{PhysReg, RegisterInfo, TableRegisterInfo};
pub use stackmaps::{CallsiteInfo, FunctionFrame, StackMaps};
pub use streamer::{Expr, LinkError, LinkedObject, ObjectWriter, Streamer, Symbol};

pub use stkmap_types::{
    LocationKind, CONSTANT_OP, DIRECT_MEM_REF_OP, DYNAMIC_FRAME_SIZE, INDIRECT_MEM_REF_OP,
    INVALID_RECORD_ID, STACKMAP_SECTION, STACKMAP_VERSION,
};
