//! The ARMv6-M interpreter core: register file, fetch/decode/execute loop,
//! and exception entry/return.

mod arith;
mod decode;
mod execute;
mod shifter;

pub use decode::{decode, DpOp, Instruction, LoadStoreImmOp, LoadStoreRegOp};

use std::collections::HashSet;

use crate::error::FaultKind;
use crate::memory::Memory;
use crate::trace::{trace_cat, TraceMask};

pub const APSR_N: u32 = 1 << 31;
pub const APSR_Z: u32 = 1 << 30;
pub const APSR_C: u32 = 1 << 29;
pub const APSR_V: u32 = 1 << 28;

const EPSR_T: u32 = 1 << 24;

const CONTROL_NPRIV: u8 = 1 << 0;
const CONTROL_SPSEL: u8 = 1 << 1;

// Base EXC_RETURN sentinel; bit 3 marks a return to Thread mode, bit 2
// marks the Thread-mode SP bank as PSP. A write to PC whose top nibble is
// 0xF is always treated as an exception return, not a branch.
const EXC_RETURN_BASE: u32 = 0xFFFF_FFE0;
const EXC_RETURN_THREAD: u32 = 1 << 3;
const EXC_RETURN_PSP: u32 = 1 << 2;

const EXC_RETURN_HANDLER: u32 = EXC_RETURN_BASE;
const EXC_RETURN_THREAD_MSP: u32 = EXC_RETURN_BASE | EXC_RETURN_THREAD;
const EXC_RETURN_THREAD_PSP: u32 = EXC_RETURN_BASE | EXC_RETURN_THREAD | EXC_RETURN_PSP;

fn is_exc_return(value: u32) -> bool {
    value & 0xF000_0000 == 0xF000_0000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Thread,
    Handler,
}

/// Register file plus the fetch/decode/execute/exception pipeline.
///
/// `r13` (SP) is never exposed directly; callers go through [`Cpu::read_reg`]
/// and [`Cpu::write_reg`], which resolve to the banked MSP/PSP view for the
/// current mode and CONTROL.SPSEL.
#[derive(Debug)]
pub struct Cpu {
    r: [u32; 13],
    msp: u32,
    psp: u32,
    lr: u32,
    pub pc: u32,
    apsr: u32,
    ipsr: u32,
    primask: bool,
    control: u8,
    mode: Mode,
    pub fault: Option<FaultKind>,
    halted: bool,
    breakpoints: HashSet<u32>,
    pub mem: Memory,
    pub trace: TraceMask,
    pub vector_table_base: u32,
}

impl Cpu {
    pub fn new(mem: Memory) -> Self {
        Cpu {
            r: [0; 13],
            msp: 0,
            psp: 0,
            lr: 0xFFFF_FFFF,
            pc: 0,
            apsr: 0,
            ipsr: 0,
            primask: false,
            control: 0,
            mode: Mode::Thread,
            fault: None,
            halted: false,
            breakpoints: HashSet::new(),
            mem,
            trace: TraceMask::NONE,
            vector_table_base: 0,
        }
    }

    /// Reset the register file and load the initial SP and PC from the
    /// vector table at `vector_table_base` (offsets 0 and 4).
    pub fn reset(&mut self, vector_table_base: u32) -> Result<(), FaultKind> {
        self.mem.reset();
        self.r = [0; 13];
        self.ipsr = 0;
        self.apsr = 0;
        self.primask = false;
        self.control = 0;
        self.mode = Mode::Thread;
        self.fault = None;
        self.halted = false;
        self.vector_table_base = vector_table_base;

        let initial_sp = self
            .mem
            .load(vector_table_base, 4, false)
            .map_err(|e| e.into_fault())?;
        let initial_pc = self
            .mem
            .load(vector_table_base + 4, 4, false)
            .map_err(|e| e.into_fault())?;
        self.msp = initial_sp;
        self.psp = 0;
        self.lr = 0xFFFF_FFFF;
        self.set_pc(initial_pc);
        Ok(())
    }

    /// Force PC to `address` with bit 0 cleared, bypassing the Thumb-state
    /// fault check that guards ordinary branches. Used by reset and by the
    /// debug server's `c`/`s` address overrides.
    pub fn set_pc(&mut self, address: u32) {
        self.pc = address & !1;
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn faulted(&self) -> bool {
        self.fault.is_some()
    }

    pub fn set_breakpoint(&mut self, address: u32) {
        self.breakpoints.insert(address);
    }

    pub fn clear_breakpoint(&mut self, address: u32) {
        self.breakpoints.remove(&address);
    }

    pub fn check_breakpoint(&self) -> bool {
        self.breakpoints.contains(&self.pc)
    }

    pub fn clear_all_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    fn active_sp(&self) -> u32 {
        match self.mode {
            Mode::Handler => self.msp,
            Mode::Thread => {
                if self.control & CONTROL_SPSEL != 0 {
                    self.psp
                } else {
                    self.msp
                }
            }
        }
    }

    fn set_active_sp(&mut self, value: u32) {
        match self.mode {
            Mode::Handler => self.msp = value,
            Mode::Thread => {
                if self.control & CONTROL_SPSEL != 0 {
                    self.psp = value;
                } else {
                    self.msp = value;
                }
            }
        }
    }

    pub fn read_reg(&self, index: u8) -> u32 {
        match index {
            0..=12 => self.r[index as usize],
            13 => self.active_sp(),
            14 => self.lr,
            _ => self.pc,
        }
    }

    pub fn write_reg(&mut self, index: u8, value: u32) {
        match index {
            0..=12 => self.r[index as usize] = value,
            13 => self.set_active_sp(value),
            14 => self.lr = value,
            _ => {
                let _ = self.branch_to(value);
            }
        }
    }

    /// All control-flow transfers funnel through here: ARMv6-M is Thumb-only,
    /// so the target's bit 0 must be set (it's dropped from the stored PC).
    fn branch_to(&mut self, target: u32) -> Result<(), FaultKind> {
        if target & 1 == 0 {
            let fault = FaultKind::IllegalThumbState { target };
            self.fault = Some(fault);
            self.halted = true;
            return Err(fault);
        }
        self.pc = target & !1;
        Ok(())
    }

    pub fn n(&self) -> bool {
        self.apsr & APSR_N != 0
    }
    pub fn z(&self) -> bool {
        self.apsr & APSR_Z != 0
    }
    pub fn c(&self) -> bool {
        self.apsr & APSR_C != 0
    }
    pub fn v(&self) -> bool {
        self.apsr & APSR_V != 0
    }

    fn set_nz(&mut self, value: u32) {
        self.apsr &= !(APSR_N | APSR_Z);
        if value & 0x8000_0000 != 0 {
            self.apsr |= APSR_N;
        }
        if value == 0 {
            self.apsr |= APSR_Z;
        }
    }

    fn set_nzcv(&mut self, value: u32, carry: bool, overflow: bool) {
        self.set_nz(value);
        self.apsr &= !(APSR_C | APSR_V);
        if carry {
            self.apsr |= APSR_C;
        }
        if overflow {
            self.apsr |= APSR_V;
        }
    }

    fn set_nzc(&mut self, value: u32, carry: bool) {
        self.set_nz(value);
        self.apsr &= !APSR_C;
        if carry {
            self.apsr |= APSR_C;
        }
    }

    fn fetch16(&mut self, address: u32) -> Result<u16, FaultKind> {
        self.mem
            .load(address, 2, false)
            .map(|v| v as u16)
            .map_err(|e| e.into_fault())
    }

    /// Fetch, decode, execute exactly one instruction, then poll devices for
    /// a pending interrupt. No-ops once the CPU has halted or faulted.
    pub fn step(&mut self) {
        if self.halted || self.fault.is_some() {
            return;
        }
        if self.check_breakpoint() {
            self.halted = true;
            return;
        }

        let pc = self.pc;
        let inst = match self.fetch16(pc) {
            Ok(v) => v,
            Err(fault) => {
                self.fault = Some(fault);
                self.halted = true;
                return;
            }
        };

        let (decoded, size) = if decode::is_32bit_lead(inst) {
            match self.fetch16(pc + 2) {
                Ok(low) => (decode::decode(inst, Some(low)), 4u32),
                Err(fault) => {
                    self.fault = Some(fault);
                    self.halted = true;
                    return;
                }
            }
        } else {
            (decode::decode(inst, None), 2u32)
        };

        trace_cat!(self, FETCH, "pc={:#010x} inst={:#06x} decoded={:?}", pc, inst, decoded);

        self.pc = pc.wrapping_add(size);
        if let Err(fault) = execute::execute(self, decoded, pc, inst as u32) {
            self.fault = Some(fault);
            self.halted = true;
            return;
        }

        if self.fault.is_some() || self.halted {
            return;
        }

        if let Some(irq) = self.mem.tick() {
            if !self.primask {
                if let Err(fault) = self.exception_entry(irq) {
                    self.fault = Some(fault);
                    self.halted = true;
                }
            }
        }
    }

    fn push_word(&mut self, value: u32) -> Result<u32, FaultKind> {
        let sp = self.active_sp().wrapping_sub(4);
        self.mem.store(sp, value, 4).map_err(|e| e.into_fault())?;
        self.set_active_sp(sp);
        Ok(sp)
    }

    fn pop_word(&mut self, sp: u32) -> Result<(u32, u32), FaultKind> {
        let value = self.mem.load(sp, 4, false).map_err(|e| e.into_fault())?;
        Ok((value, sp.wrapping_add(4)))
    }

    /// Enter the handler for `exception_number`: push the 8-word exception
    /// frame, switch to Handler mode, and branch to the vector table entry.
    pub fn exception_entry(&mut self, exception_number: u32) -> Result<(), FaultKind> {
        let frame_pc = self.pc;
        let xpsr = (self.apsr & (APSR_N | APSR_Z | APSR_C | APSR_V)) | self.ipsr | EPSR_T;

        self.push_word(xpsr)?;
        self.push_word(frame_pc)?;
        self.push_word(self.lr)?;
        self.push_word(self.r[12])?;
        self.push_word(self.r[3])?;
        self.push_word(self.r[2])?;
        self.push_word(self.r[1])?;
        self.push_word(self.r[0])?;

        self.lr = match self.mode {
            Mode::Handler => EXC_RETURN_HANDLER,
            Mode::Thread => {
                if self.control & CONTROL_SPSEL != 0 {
                    EXC_RETURN_THREAD_PSP
                } else {
                    EXC_RETURN_THREAD_MSP
                }
            }
        };

        self.mode = Mode::Handler;
        self.ipsr = exception_number;

        let vector_addr = self.vector_table_base.wrapping_add(4 * exception_number);
        let target = self.mem.load(vector_addr, 4, false).map_err(|e| e.into_fault())?;
        trace_cat!(self, FLAGS, "exception entry #{} -> {:#010x}", exception_number, target);
        self.branch_to(target)
    }

    /// Pop the exception frame addressed by an `EXC_RETURN` value written to
    /// `lr` by BX, BLX, or a POP that reloads PC.
    fn exception_return(&mut self, exc_return: u32) -> Result<(), FaultKind> {
        debug_assert!(is_exc_return(exc_return));
        if !matches!(
            exc_return,
            EXC_RETURN_HANDLER | EXC_RETURN_THREAD_MSP | EXC_RETURN_THREAD_PSP
        ) {
            let fault = FaultKind::IllegalExceptionReturn { lr: exc_return };
            self.fault = Some(fault);
            self.halted = true;
            return Err(fault);
        }
        self.mode = if exc_return & 0b1000 == 0 {
            Mode::Handler
        } else {
            Mode::Thread
        };
        if exc_return & 0b0100 != 0 {
            self.control |= CONTROL_SPSEL;
        } else {
            self.control &= !CONTROL_SPSEL;
        }

        let mut sp = self.active_sp();
        let (r0, next) = self.pop_word(sp)?;
        sp = next;
        let (r1, next) = self.pop_word(sp)?;
        sp = next;
        let (r2, next) = self.pop_word(sp)?;
        sp = next;
        let (r3, next) = self.pop_word(sp)?;
        sp = next;
        let (r12, next) = self.pop_word(sp)?;
        sp = next;
        let (lr, next) = self.pop_word(sp)?;
        sp = next;
        let (return_pc, next) = self.pop_word(sp)?;
        sp = next;
        let (xpsr, next) = self.pop_word(sp)?;
        sp = next;

        self.r[0] = r0;
        self.r[1] = r1;
        self.r[2] = r2;
        self.r[3] = r3;
        self.r[12] = r12;
        self.lr = lr;
        self.apsr = xpsr & (APSR_N | APSR_Z | APSR_C | APSR_V);
        self.ipsr = xpsr & 0x3F;
        self.set_active_sp(sp);

        trace_cat!(self, FLAGS, "exception return -> {:#010x}", return_pc);
        self.branch_to(return_pc)
    }

    pub fn set_primask(&mut self, disable: bool) {
        self.primask = disable;
    }

    pub fn primask(&self) -> bool {
        self.primask
    }

    pub fn control(&self) -> u8 {
        self.control
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ipsr(&self) -> u32 {
        self.ipsr
    }

    pub fn xpsr(&self) -> u32 {
        (self.apsr & (APSR_N | APSR_Z | APSR_C | APSR_V)) | self.ipsr | EPSR_T
    }

    pub fn msp(&self) -> u32 {
        self.msp
    }

    pub fn psp(&self) -> u32 {
        self.psp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    fn cpu_with_vectors(sp: u32, entry: u32) -> Cpu {
        let mut mem = Memory::new();
        mem.map_backing(0, 0x100).unwrap();
        mem.map_backing(0x1000, 0x1000).unwrap();
        mem.store(0, sp, 4).unwrap();
        mem.store(4, entry, 4).unwrap();
        let mut cpu = Cpu::new(mem);
        cpu.reset(0).unwrap();
        cpu
    }

    #[test]
    fn reset_loads_sp_and_pc_from_vector_table() {
        let cpu = cpu_with_vectors(0x2000, 0x1001);
        assert_eq!(cpu.msp(), 0x2000);
        assert_eq!(cpu.pc, 0x1000);
    }

    #[test]
    fn reset_clears_the_low_bit_of_the_entry_without_faulting() {
        let mut mem = Memory::new();
        mem.map_backing(0, 0x100).unwrap();
        mem.store(0, 0x2000, 4).unwrap();
        mem.store(4, 0x1000, 4).unwrap();
        let mut cpu = Cpu::new(mem);
        assert!(cpu.reset(0).is_ok());
        assert!(!cpu.faulted());
        assert_eq!(cpu.pc, 0x1000);
    }

    #[test]
    fn step_on_halted_cpu_is_a_no_op() {
        let mut cpu = cpu_with_vectors(0x2000, 0x1001);
        cpu.halted = true;
        let pc = cpu.pc;
        cpu.step();
        assert_eq!(cpu.pc, pc);
    }

    #[test]
    fn step_halts_without_executing_at_a_breakpoint() {
        let mut cpu = cpu_with_vectors(0x2000, 0x1001);
        cpu.mem.store(0x1000, 0xBF00, 2).unwrap(); // NOP
        cpu.set_breakpoint(0x1000);
        cpu.step();
        assert!(cpu.halted());
        assert_eq!(cpu.pc, 0x1000);
    }
}
