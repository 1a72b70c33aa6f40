//! Architectural scenario tests driven through real fetched/decoded/executed
//! machine code, not direct calls into the decoder or executor.

use armv6m_sim::cpu::{Cpu, APSR_C, APSR_N, APSR_V, APSR_Z};
use armv6m_sim::devices::SysTick;
use armv6m_sim::error::FaultKind;
use armv6m_sim::memory::Memory;

fn booted_cpu(code_base: u32, code: &[u16]) -> Cpu {
    let mut mem = Memory::new();
    mem.map_backing(0, 0x10000).unwrap();
    mem.store(0, 0x2000_1000, 4).unwrap(); // initial MSP
    mem.store(4, code_base | 1, 4).unwrap(); // initial PC, thumb bit set
    let mut cpu = Cpu::new(mem);
    cpu.reset(0).unwrap();
    for (i, half) in code.iter().enumerate() {
        let addr = code_base + (i as u32 * 2);
        cpu.mem.store(addr, *half as u32, 2).unwrap();
    }
    cpu
}

fn xpsr_bits(cpu: &Cpu) -> u32 {
    cpu.xpsr() & (APSR_N | APSR_Z | APSR_C | APSR_V)
}

#[test]
fn flag_arithmetic_adds_unsigned_wrap() {
    // ADDS r0, r1, r2
    let mut cpu = booted_cpu(0x1000, &[0x1888]);
    cpu.write_reg(1, 0xFFFF_FFFF);
    cpu.write_reg(2, 1);
    cpu.step();

    assert_eq!(cpu.read_reg(0), 0);
    assert_eq!(xpsr_bits(&cpu), APSR_Z | APSR_C);
}

#[test]
fn flag_arithmetic_adds_signed_overflow() {
    let mut cpu = booted_cpu(0x1000, &[0x1888]);
    cpu.write_reg(1, 0x7FFF_FFFF);
    cpu.write_reg(2, 1);
    cpu.step();

    assert_eq!(cpu.read_reg(0), 0x8000_0000);
    assert_eq!(xpsr_bits(&cpu), APSR_N | APSR_V);
}

#[test]
fn pc_relative_literal_load_computes_aligned_base() {
    // LDR r0, [PC, #8], placed at address 0xF4.
    let mut cpu = booted_cpu(0xF4, &[0x4802]);
    cpu.mem.store(0x100, 0xDEAD_BEEF, 4).unwrap();
    cpu.step();
    assert_eq!(cpu.read_reg(0), 0xDEAD_BEEF);
}

#[test]
fn push_pop_round_trip_restores_registers_and_sp() {
    // PUSH {r0-r3, lr}; POP {r0-r3, pc}
    let mut cpu = booted_cpu(0x1000, &[0xB50F, 0xBD0F]);
    let sp_before = cpu.read_reg(13);
    cpu.write_reg(0, 0x1111_1111);
    cpu.write_reg(1, 0x2222_2222);
    cpu.write_reg(2, 0x3333_3333);
    cpu.write_reg(3, 0x4444_4444);
    cpu.write_reg(14, 0x201);

    cpu.step(); // PUSH
    cpu.write_reg(0, 0);
    cpu.write_reg(1, 0);
    cpu.write_reg(2, 0);
    cpu.write_reg(3, 0);
    cpu.step(); // POP

    assert_eq!(cpu.read_reg(0), 0x1111_1111);
    assert_eq!(cpu.read_reg(1), 0x2222_2222);
    assert_eq!(cpu.read_reg(2), 0x3333_3333);
    assert_eq!(cpu.read_reg(3), 0x4444_4444);
    assert_eq!(cpu.pc, 0x200);
    assert_eq!(cpu.read_reg(13), sp_before);
}

#[test]
fn systick_interrupt_fires_on_third_tick_and_enters_exception() {
    const SYSTICK_BASE: u32 = 0xE000_E010;
    let mut cpu = booted_cpu(0x1000, &[0xBF00, 0xBF00, 0xBF00]); // NOP x3
    cpu.mem
        .map_device(SYSTICK_BASE, 16, Box::new(SysTick::new(15)))
        .unwrap();

    // vector 15 handler target, must have bit 0 set.
    cpu.mem.store(0x3C, 0x2001, 4).unwrap();

    cpu.mem.store(SYSTICK_BASE + 4, 2, 4).unwrap(); // RVR
    cpu.mem.store(SYSTICK_BASE + 8, 2, 4).unwrap(); // CVR
    cpu.mem.store(SYSTICK_BASE, 0b11, 4).unwrap(); // ENABLE | TICKINT

    cpu.step();
    assert_eq!(cpu.ipsr(), 0);
    cpu.step();
    assert_eq!(cpu.ipsr(), 0);
    cpu.step();

    assert_eq!(cpu.ipsr(), 15);
    assert_eq!(cpu.pc, 0x2000);
}

#[test]
fn cpsid_sets_primask() {
    // CPSID i
    let mut cpu = booted_cpu(0x1000, &[0xB672]);
    assert!(!cpu.primask());
    cpu.step();
    assert!(cpu.primask());
}

#[test]
fn exception_return_rejects_a_pattern_outside_the_three_legal_ones() {
    // BX r1
    let mut cpu = booted_cpu(0x1000, &[0x4708]);
    cpu.write_reg(1, 0xFFFF_FFE4); // top nibble 0xF, but not E0/E8/EC
    cpu.step();

    assert!(cpu.faulted());
    assert!(matches!(
        cpu.fault,
        Some(FaultKind::IllegalExceptionReturn { lr: 0xFFFF_FFE4 })
    ));
}

#[test]
fn ldm_with_empty_register_list_faults() {
    // LDM r0!, {}
    let mut cpu = booted_cpu(0x1000, &[0xC800]);
    cpu.step();

    assert!(cpu.faulted());
    assert!(matches!(cpu.fault, Some(FaultKind::IllegalInstruction { .. })));
}
