//! GDB remote-serial-protocol debug surface.

mod packet;
mod server;

pub use server::GdbServer;
