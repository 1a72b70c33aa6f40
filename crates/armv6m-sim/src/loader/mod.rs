//! Binary/ELF loaders: external collaborators to the interpreter core.
//!
//! Neither loader is part of the simulated architecture; both just turn a
//! file on disk into a sequence of `Memory::map_backing` + byte-store calls
//! and an entry point, matching the interpreter's own view that it "only
//! consumes a stream of byte writes and a start address".

mod binary;
mod elf;

pub use binary::load_binary;
pub use elf::{find_symbol, load_elf};
