//! Section layout, version 1:
//!
//! ```text
//! Header {
//!   uint8  : Stack Map Version (1)
//!   uint8  : Reserved (0)
//!   uint16 : Reserved (0)
//! }
//! uint32 : NumFunctions
//! uint32 : NumConstants
//! uint32 : NumRecords
//! StkSizeRecord[NumFunctions] {
//!   uint64 : Function Address
//!   uint64 : Stack Size
//! }
//! int64  : Constants[NumConstants]
//! StkMapRecord[NumRecords] {
//!   uint64 : PatchPoint ID
//!   uint32 : Instruction Offset
//!   uint16 : Reserved (record flags)
//!   uint16 : NumLocations
//!   Location[NumLocations] {
//!     uint8  : Register | Direct | Indirect | Constant | ConstantIndex
//!     uint8  : Size in Bytes
//!     uint16 : Dwarf RegNum
//!     int32  : Offset
//!   }
//!   uint16 : Padding
//!   uint16 : NumLiveOuts
//!   LiveOuts[NumLiveOuts] {
//!     uint16 : Dwarf RegNum
//!     uint8  : Reserved
//!     uint8  : Size in Bytes
//!   }
//!   uint32 : Padding (only if required to align to 8 byte)
//! }
//! ```

use log::{debug, warn};
use stkmap_types::{
    INVALID_RECORD_ID, RECORD_ALIGN, STACKMAP_SECTION, STACKMAP_SECTION_SYMBOL, STACKMAP_VERSION,
};

use crate::error::{EmitError, Result};
use crate::stackmaps::{StackMaps, WSMP};
use crate::streamer::Streamer;

impl<'a> StackMaps<'a> {
    fn emit_stackmap_header(&self, os: &mut dyn Streamer) {
        os.emit_int_value(STACKMAP_VERSION.into(), 1);
        os.emit_int_value(0, 1); // Reserved.
        os.emit_int_value(0, 2); // Reserved.

        debug!("{}#functions = {}", WSMP, self.fn_stack_size.len());
        os.emit_int_value(self.fn_stack_size.len() as u64, 4);
        debug!("{}#constants = {}", WSMP, self.const_pool.len());
        os.emit_int_value(self.const_pool.len() as u64, 4);
        debug!("{}#callsites = {}", WSMP, self.call_sites.len());
        os.emit_int_value(self.call_sites.len() as u64, 4);
    }

    fn emit_function_frame_records(&self, os: &mut dyn Streamer) {
        debug!("{}functions:", WSMP);
        for (sym, size) in &self.fn_stack_size {
            debug!("{}function addr: {:?} frame size: {}", WSMP, sym, size);
            os.emit_symbol_value(*sym, 8);
            os.emit_int_value(*size, 8);
        }
    }

    fn emit_constant_pool_entries(&self, os: &mut dyn Streamer) {
        debug!("{}constants:", WSMP);
        for value in self.const_pool.iter() {
            debug!("{}{}", WSMP, value);
            os.emit_int_value(value as u64, 8);
        }
    }

    fn emit_callsite_entries(&self, os: &mut dyn Streamer) {
        self.log_pending();
        for csi in &self.call_sites {
            // Better to tell the runtime about a broken record than to crash an in-process
            // compiler, so oversized records become invalid ones with no locations.
            if csi.locations.len() > u16::MAX as usize || csi.live_outs.len() > u16::MAX as usize
            {
                warn!(
                    "{}callsite {} has {} locations and {} live-outs, emitting invalid record",
                    WSMP,
                    csi.id,
                    csi.locations.len(),
                    csi.live_outs.len()
                );
                os.emit_int_value(INVALID_RECORD_ID, 8);
                os.emit_value(&csi.offset_expr, 4);
                os.emit_int_value(0, 2); // Reserved.
                os.emit_int_value(0, 2); // 0 locations.
                os.emit_int_value(0, 2); // padding.
                os.emit_int_value(0, 2); // 0 live-out registers.
                os.emit_value_to_alignment(RECORD_ALIGN);
                continue;
            }

            os.emit_int_value(csi.id, 8);
            os.emit_value(&csi.offset_expr, 4);

            // Reserved for flags.
            os.emit_int_value(0, 2);
            os.emit_int_value(csi.locations.len() as u64, 2);

            for loc in &csi.locations {
                os.emit_int_value(loc.kind.code().into(), 1);
                os.emit_int_value(loc.size.into(), 1);
                os.emit_int_value(loc.reg.into(), 2);
                os.emit_int_value(loc.offset as u64, 4);
            }

            // Num live-out registers and padding to align to 4 byte.
            os.emit_int_value(0, 2);
            os.emit_int_value(csi.live_outs.len() as u64, 2);

            for lo in &csi.live_outs {
                os.emit_int_value(lo.dwarf_reg.into(), 2);
                os.emit_int_value(0, 1);
                os.emit_int_value(lo.size.into(), 1);
            }
            os.emit_value_to_alignment(RECORD_ALIGN);
        }
    }

    /// Writes everything recorded so far into the stackmap section and resets the session.
    /// Nothing is emitted when there are no call sites.
    pub fn serialize_to_stack_map_section(&mut self, os: &mut dyn Streamer) -> Result<()> {
        if self.call_sites.is_empty() {
            if !self.const_pool.is_empty() || !self.fn_stack_size.is_empty() {
                return Err(EmitError::OrphanedState {
                    constants: self.const_pool.len(),
                    functions: self.fn_stack_size.len(),
                });
            }
            return Ok(());
        }

        os.switch_section(STACKMAP_SECTION);
        // forces the section to be kept by the linker
        let marker = os.get_or_create_symbol(STACKMAP_SECTION_SYMBOL);
        os.emit_label(marker);

        debug!("********** Stack Map Output **********");
        self.emit_stackmap_header(os);
        self.emit_function_frame_records(os);
        self.emit_constant_pool_entries(os);
        self.emit_callsite_entries(os);

        self.call_sites.clear();
        self.const_pool.clear();
        self.fn_stack_size.clear();
        Ok(())
    }
}
