//! Error taxonomy for the simulator core.
//!
//! CPU-detected faults are sticky (see [`crate::cpu::Cpu::faulted`]) and never
//! unwind; they are reported to the host through the debug surface instead.

/// A condition the interpreter cannot recover from without host intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FaultKind {
    #[error("unmapped access at {address:#010x} (width {width})")]
    UnmappedAccess { address: u32, width: u8 },

    #[error("misaligned access at {address:#010x} (width {width})")]
    MisalignedAccess { address: u32, width: u8 },

    #[error("illegal instruction {opcode:#06x} at pc={pc:#010x}")]
    IllegalInstruction { pc: u32, opcode: u32 },

    #[error("illegal exception return lr={lr:#010x}")]
    IllegalExceptionReturn { lr: u32 },

    #[error("illegal thumb state target={target:#010x}")]
    IllegalThumbState { target: u32 },
}

/// Raised by the memory fabric's `load`/`store`; the CPU turns this into a
/// [`FaultKind`] and sets its sticky fault bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemAccessError {
    #[error("unmapped access at {address:#010x} (width {width})")]
    Unmapped { address: u32, width: u8 },

    #[error("misaligned access at {address:#010x} (width {width})")]
    Misaligned { address: u32, width: u8 },
}

impl MemAccessError {
    pub fn into_fault(self) -> FaultKind {
        match self {
            MemAccessError::Unmapped { address, width } => {
                FaultKind::UnmappedAccess { address, width }
            }
            MemAccessError::Misaligned { address, width } => {
                FaultKind::MisalignedAccess { address, width }
            }
        }
    }
}

/// Raised by [`crate::memory::Memory::map`] at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("region [{base:#010x}, {end:#010x}) overlaps an existing region")]
    Overlap { base: u32, end: u32 },
}

/// Wire-level errors from the GDB remote-serial debug server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("bad checksum: calculated {calculated:#04x}, received {received:#04x}")]
    Framing { calculated: u8, received: u8 },

    #[error("malformed packet payload: {0}")]
    Malformed(&'static str),
}
