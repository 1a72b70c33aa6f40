//! GDB remote-serial-protocol debug server: one TCP peer, one CPU.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cpu::Cpu;
use crate::error::ProtocolError;

use super::packet;

/// Bounded retries for the ack-until-`+` loop; the wire protocol has no
/// upper bound, but a pathological peer shouldn't wedge the server forever.
const ACK_RETRY_LIMIT: u32 = 16;

pub struct GdbServer {
    stream: TcpStream,
}

impl GdbServer {
    /// Bind `port` with address reuse, accept exactly one peer, and drop the
    /// listening socket.
    pub fn bind_and_accept(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        info!(port, "gdb server listening");
        let (stream, peer) = listener.accept()?;
        info!(%peer, "gdb peer connected");
        drop(listener);
        stream.set_nodelay(true).ok();
        Ok(GdbServer { stream })
    }

    /// Drive the session to completion: clear breakpoints, then serve
    /// packets until the peer disconnects or an I/O error occurs.
    pub fn serve(&mut self, cpu: &mut Cpu) -> std::io::Result<()> {
        cpu.clear_all_breakpoints();
        loop {
            match self.read_packet()? {
                Some(payload) => {
                    let reply = self.dispatch(&payload, cpu);
                    self.send_and_await_ack(&reply)?;
                }
                None => {
                    info!("gdb peer disconnected");
                    return Ok(());
                }
            }
        }
    }

    fn read_one(&mut self) -> std::io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) => Err(e),
        }
    }

    /// Read one framed packet, handling the checksum-mismatch retry
    /// internally. Returns `Ok(None)` only once the peer has closed.
    fn read_packet(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            // Skip to the next '$'.
            loop {
                match self.read_one()? {
                    None => return Ok(None),
                    Some(b'$') => break,
                    Some(_) => continue,
                }
            }

            let mut payload = Vec::new();
            loop {
                match self.read_one()? {
                    None => return Ok(None),
                    Some(b'#') => break,
                    Some(b) => payload.push(b),
                }
            }

            let mut cksum = [0u8; 2];
            for slot in cksum.iter_mut() {
                *slot = match self.read_one()? {
                    None => return Ok(None),
                    Some(b) => b,
                };
            }
            let received = u8::from_str_radix(std::str::from_utf8(&cksum).unwrap_or("00"), 16)
                .unwrap_or(0xFF);
            let calculated = packet::checksum(&payload);

            if received != calculated {
                warn!(calculated, received, "bad checksum, requesting retransmit");
                self.stream.write_all(b"-")?;
                continue;
            }

            self.stream.write_all(b"+")?;
            return Ok(Some(payload));
        }
    }

    fn send_and_await_ack(&mut self, reply: &[u8]) -> std::io::Result<()> {
        let framed = packet::frame(reply);
        for attempt in 0..ACK_RETRY_LIMIT {
            self.stream.write_all(&framed)?;
            match self.read_one()? {
                None => return Ok(()),
                Some(b'+') => return Ok(()),
                Some(_) => {
                    debug!(attempt, "reply not acked, resending");
                    continue;
                }
            }
        }
        warn!("ack retry limit exhausted, abandoning reply");
        Ok(())
    }

    fn dispatch(&mut self, payload: &[u8], cpu: &mut Cpu) -> Vec<u8> {
        match payload.first() {
            Some(b'?') => b"S05".to_vec(),
            Some(b'g') => self.cmd_read_registers(cpu),
            Some(b'G') => self.cmd_write_registers(&payload[1..], cpu),
            Some(b'p') => self.cmd_read_one_register(&payload[1..], cpu),
            Some(b'm') => self.cmd_read_memory(&payload[1..], cpu),
            Some(b'M') => self.cmd_write_memory(&payload[1..], cpu),
            Some(b'c') => self.cmd_continue(&payload[1..], cpu),
            Some(b's') => self.cmd_step(&payload[1..], cpu),
            Some(b'Z') => self.cmd_set_breakpoint(&payload[1..], cpu),
            Some(b'z') => self.cmd_clear_breakpoint(&payload[1..], cpu),
            Some(b'H') => b"OK".to_vec(),
            Some(b'q') => self.cmd_query(payload),
            _ => Vec::new(),
        }
    }

    fn cmd_read_registers(&self, cpu: &Cpu) -> Vec<u8> {
        let mut out = String::with_capacity(128);
        for i in 0..16u8 {
            out.push_str(&packet::encode_reg(cpu.read_reg(i)));
        }
        out.into_bytes()
    }

    fn cmd_write_registers(&self, body: &[u8], cpu: &mut Cpu) -> Vec<u8> {
        let Ok(s) = std::str::from_utf8(body) else {
            return b"E00".to_vec();
        };
        if s.len() != 16 * 8 {
            return b"E00".to_vec();
        }
        for i in 0..16u8 {
            let chunk = &s[i as usize * 8..i as usize * 8 + 8];
            match packet::decode_reg(chunk) {
                Ok(v) => cpu.write_reg(i, v),
                Err(_) => return b"E00".to_vec(),
            }
        }
        b"OK".to_vec()
    }

    fn cmd_read_one_register(&self, body: &[u8], cpu: &Cpu) -> Vec<u8> {
        match packet::parse_hex_u32(body) {
            Some((index, _)) if index < 16 => packet::encode_reg(cpu.read_reg(index as u8)).into_bytes(),
            _ => b"E00".to_vec(),
        }
    }

    fn cmd_read_memory(&self, body: &[u8], cpu: &mut Cpu) -> Vec<u8> {
        let Some((addr, len_pair)) = self.parse_addr_len(body) else {
            return b"E00".to_vec();
        };
        let (addr, len) = (addr, len_pair);
        let mut out = String::with_capacity(len as usize * 2);
        for i in 0..len {
            match cpu.mem.read_byte(addr.wrapping_add(i)) {
                Ok(byte) => out.push_str(&packet::encode_hex(&[byte])),
                Err(_) => return b"E00".to_vec(),
            }
        }
        out.into_bytes()
    }

    fn cmd_write_memory(&self, body: &[u8], cpu: &mut Cpu) -> Vec<u8> {
        let Some(comma) = body.iter().position(|&b| b == b',') else {
            return b"E00".to_vec();
        };
        let Some(colon) = body.iter().position(|&b| b == b':') else {
            return b"E00".to_vec();
        };
        let Some((addr, _)) = packet::parse_hex_u32(&body[..comma]) else {
            return b"E00".to_vec();
        };
        let Some((len, _)) = packet::parse_hex_u32(&body[comma + 1..colon]) else {
            return b"E00".to_vec();
        };
        let Ok(hex) = std::str::from_utf8(&body[colon + 1..]) else {
            return b"E00".to_vec();
        };
        let Ok(bytes) = packet::decode_hex(hex) else {
            return b"E00".to_vec();
        };
        if bytes.len() as u32 != len {
            return b"E00".to_vec();
        }
        for (i, byte) in bytes.iter().enumerate() {
            if cpu.mem.write_byte(addr.wrapping_add(i as u32), *byte).is_err() {
                return b"E00".to_vec();
            }
        }
        b"OK".to_vec()
    }

    fn parse_addr_len(&self, body: &[u8]) -> Option<(u32, u32)> {
        let comma = body.iter().position(|&b| b == b',')?;
        let (addr, _) = packet::parse_hex_u32(&body[..comma])?;
        let (len, _) = packet::parse_hex_u32(&body[comma + 1..])?;
        Some((addr, len))
    }

    fn cmd_continue(&mut self, body: &[u8], cpu: &mut Cpu) -> Vec<u8> {
        if let Some((addr, _)) = packet::parse_hex_u32(body) {
            cpu.set_pc(addr);
        }
        self.stream.set_nonblocking(true).ok();
        loop {
            if cpu.check_breakpoint() || cpu.halted() || cpu.faulted() {
                break;
            }
            cpu.step();
            if cpu.halted() || cpu.faulted() {
                break;
            }
            let mut probe = [0u8; 1];
            match self.stream.read(&mut probe) {
                Ok(0) => break,
                Ok(_) => {
                    debug!("user break received from peer");
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => break,
            }
        }
        self.stream.set_nonblocking(false).ok();
        self.stream.set_read_timeout(Some(Duration::from_secs(3600))).ok();
        b"S05".to_vec()
    }

    fn cmd_step(&mut self, body: &[u8], cpu: &mut Cpu) -> Vec<u8> {
        if let Some((addr, _)) = packet::parse_hex_u32(body) {
            cpu.set_pc(addr);
        }
        if !cpu.halted() && !cpu.faulted() {
            cpu.step();
        }
        b"S05".to_vec()
    }

    fn cmd_set_breakpoint(&self, body: &[u8], cpu: &mut Cpu) -> Vec<u8> {
        match self.parse_breakpoint(body) {
            Some(addr) => {
                cpu.set_breakpoint(addr);
                b"OK".to_vec()
            }
            None => b"E00".to_vec(),
        }
    }

    fn cmd_clear_breakpoint(&self, body: &[u8], cpu: &mut Cpu) -> Vec<u8> {
        match self.parse_breakpoint(body) {
            Some(addr) => {
                cpu.clear_breakpoint(addr);
                b"OK".to_vec()
            }
            None => b"E00".to_vec(),
        }
    }

    /// `0,<addr>,<kind>` — only software breakpoints (type 0) are supported.
    fn parse_breakpoint(&self, body: &[u8]) -> Option<u32> {
        if !body.starts_with(b"0,") {
            return None;
        }
        let rest = &body[2..];
        let comma = rest.iter().position(|&b| b == b',')?;
        let (addr, _) = packet::parse_hex_u32(&rest[..comma])?;
        Some(addr)
    }

    fn cmd_query(&self, payload: &[u8]) -> Vec<u8> {
        if payload.starts_with(b"qSupported") {
            b"PacketSize=4000".to_vec()
        } else if payload.starts_with(b"qOffsets") {
            b"Text=0;Data=0;Bss=0".to_vec()
        } else if payload.starts_with(b"qRcmd") {
            b"E00".to_vec()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    fn test_cpu() -> Cpu {
        let mut mem = Memory::new();
        mem.map_backing(0, 0x1000).unwrap();
        mem.store(0, 0x2000_0100, 4).unwrap();
        mem.store(4, 0x1001, 4).unwrap();
        let mut cpu = Cpu::new(mem);
        cpu.reset(0).unwrap();
        cpu
    }

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn read_registers_produces_128_hex_chars() {
        let (_client, stream) = loopback_pair();
        let server = GdbServer { stream };
        let cpu = test_cpu();
        let reply = server.cmd_read_registers(&cpu);
        assert_eq!(reply.len(), 128);
    }

    #[test]
    fn parse_breakpoint_rejects_hardware_kind() {
        let (_client, stream) = loopback_pair();
        let server = GdbServer { stream };
        assert_eq!(server.parse_breakpoint(b"1,1000,2"), None);
        assert_eq!(server.parse_breakpoint(b"0,1000,2"), Some(0x1000));
    }

    #[test]
    fn query_commands_match_expected_replies() {
        let (_client, stream) = loopback_pair();
        let server = GdbServer { stream };
        assert_eq!(server.cmd_query(b"qSupported:xyz"), b"PacketSize=4000");
        assert_eq!(server.cmd_query(b"qOffsets"), b"Text=0;Data=0;Bss=0");
        assert_eq!(server.cmd_query(b"qRcmd,1234"), b"E00");
    }
}
