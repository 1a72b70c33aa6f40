//! GDB remote-serial-protocol round trip: a bad checksum is nacked, then a
//! well-formed packet gets acked and answered with a 16-register dump.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use armv6m_sim::cpu::Cpu;
use armv6m_sim::debug::GdbServer;
use armv6m_sim::memory::Memory;

const PORT: u16 = 17773;

fn booted_cpu() -> Cpu {
    let mut mem = Memory::new();
    mem.map_backing(0, 0x1000).unwrap();
    mem.store(0, 0x2000_0100, 4).unwrap();
    mem.store(4, 0x1001, 4).unwrap();
    let mut cpu = Cpu::new(mem);
    cpu.reset(0).unwrap();
    cpu
}

fn read_byte(stream: &mut TcpStream) -> u8 {
    let mut b = [0u8; 1];
    stream.read_exact(&mut b).unwrap();
    b[0]
}

#[test]
fn bad_checksum_is_nacked_then_register_dump_is_served() {
    let server_thread = thread::spawn(|| {
        let mut cpu = booted_cpu();
        let mut server = GdbServer::bind_and_accept(PORT).unwrap();
        server.serve(&mut cpu).unwrap();
    });

    // bind_and_accept blocks in the listener until a peer connects; retry
    // the connect attempt until the server thread is ready for it.
    let mut client = loop {
        match TcpStream::connect(("127.0.0.1", PORT)) {
            Ok(s) => break s,
            Err(_) => thread::sleep(Duration::from_millis(10)),
        }
    };
    client.set_nodelay(true).ok();

    client.write_all(b"$g#00").unwrap(); // wrong checksum for an empty-ish read
    assert_eq!(read_byte(&mut client), b'-');

    let good = format!("$g#{:02x}", packet_checksum(b"g"));
    client.write_all(good.as_bytes()).unwrap();
    assert_eq!(read_byte(&mut client), b'+');

    assert_eq!(read_byte(&mut client), b'$');
    let mut dump = Vec::new();
    loop {
        let b = read_byte(&mut client);
        if b == b'#' {
            break;
        }
        dump.push(b);
    }
    let _checksum = [read_byte(&mut client), read_byte(&mut client)];
    assert_eq!(dump.len(), 128);
    assert!(dump.iter().all(u8::is_ascii_hexdigit));

    client.write_all(b"+").unwrap();
    drop(client);
    server_thread.join().unwrap();
}

fn packet_checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}
