//! ARMv6-M Thumb instruction-set simulator: CPU interpreter, memory fabric,
//! device models, and a GDB remote-serial debug server.

pub mod cpu;
pub mod debug;
pub mod devices;
pub mod error;
pub mod loader;
pub mod memory;
pub mod trace;

pub use cpu::Cpu;
pub use memory::Memory;
