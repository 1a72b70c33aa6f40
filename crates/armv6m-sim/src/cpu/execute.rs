//! Architectural effects for every decoded [`Instruction`].

use super::{arith, shifter, Cpu, Instruction, DpOp, LoadStoreImmOp, LoadStoreRegOp};
use crate::error::FaultKind;
use crate::trace::trace_cat;

/// Reads a general register the way the architecture does for a generic
/// operand: ordinary registers read their stored value, but r15 reads as
/// the address of the current instruction plus 4 (the Thumb "PC bias").
fn gpr(cpu: &Cpu, pc: u32, index: u8) -> u32 {
    if index == 15 {
        pc.wrapping_add(4)
    } else {
        cpu.read_reg(index)
    }
}

fn cond_holds(cpu: &Cpu, cond: u8) -> bool {
    match cond {
        0b0000 => cpu.z(),
        0b0001 => !cpu.z(),
        0b0010 => cpu.c(),
        0b0011 => !cpu.c(),
        0b0100 => cpu.n(),
        0b0101 => !cpu.n(),
        0b0110 => cpu.v(),
        0b0111 => !cpu.v(),
        0b1000 => cpu.c() && !cpu.z(),
        0b1001 => !cpu.c() || cpu.z(),
        0b1010 => cpu.n() == cpu.v(),
        0b1011 => cpu.n() != cpu.v(),
        0b1100 => !cpu.z() && cpu.n() == cpu.v(),
        0b1101 => cpu.z() || cpu.n() != cpu.v(),
        _ => true,
    }
}

pub fn execute(cpu: &mut Cpu, inst: Instruction, pc: u32, raw_opcode: u32) -> Result<(), FaultKind> {
    trace_cat!(cpu, INST, "executing {:?}", inst);

    match inst {
        Instruction::LslImm { rd, rm, imm5 } => {
            let (result, carry) = shifter::lsl(cpu.read_reg(rm), imm5 as u32, cpu.c());
            cpu.write_reg(rd, result);
            cpu.set_nzc(result, carry);
        }
        Instruction::LsrImm { rd, rm, imm5 } => {
            let amount = if imm5 == 0 { 32 } else { imm5 as u32 };
            let (result, carry) = shifter::lsr(cpu.read_reg(rm), amount, cpu.c());
            cpu.write_reg(rd, result);
            cpu.set_nzc(result, carry);
        }
        Instruction::AsrImm { rd, rm, imm5 } => {
            let amount = if imm5 == 0 { 32 } else { imm5 as u32 };
            let (result, carry) = shifter::asr(cpu.read_reg(rm), amount, cpu.c());
            cpu.write_reg(rd, result);
            cpu.set_nzc(result, carry);
        }

        Instruction::AddReg { rd, rn, rm } => {
            let r = arith::add_with_carry(cpu.read_reg(rn), cpu.read_reg(rm), false);
            cpu.write_reg(rd, r.result);
            cpu.set_nzcv(r.result, r.carry, r.overflow);
        }
        Instruction::SubReg { rd, rn, rm } => {
            let r = arith::sub(cpu.read_reg(rn), cpu.read_reg(rm));
            cpu.write_reg(rd, r.result);
            cpu.set_nzcv(r.result, r.carry, r.overflow);
        }
        Instruction::AddImm3 { rd, rn, imm3 } => {
            let r = arith::add_with_carry(cpu.read_reg(rn), imm3 as u32, false);
            cpu.write_reg(rd, r.result);
            cpu.set_nzcv(r.result, r.carry, r.overflow);
        }
        Instruction::SubImm3 { rd, rn, imm3 } => {
            let r = arith::sub(cpu.read_reg(rn), imm3 as u32);
            cpu.write_reg(rd, r.result);
            cpu.set_nzcv(r.result, r.carry, r.overflow);
        }
        Instruction::MovImm8 { rd, imm8 } => {
            let value = imm8 as u32;
            cpu.write_reg(rd, value);
            cpu.set_nzc(value, cpu.c());
        }
        Instruction::CmpImm8 { rn, imm8 } => {
            let r = arith::sub(cpu.read_reg(rn), imm8 as u32);
            cpu.set_nzcv(r.result, r.carry, r.overflow);
        }
        Instruction::AddImm8 { rdn, imm8 } => {
            let r = arith::add_with_carry(cpu.read_reg(rdn), imm8 as u32, false);
            cpu.write_reg(rdn, r.result);
            cpu.set_nzcv(r.result, r.carry, r.overflow);
        }
        Instruction::SubImm8 { rdn, imm8 } => {
            let r = arith::sub(cpu.read_reg(rdn), imm8 as u32);
            cpu.write_reg(rdn, r.result);
            cpu.set_nzcv(r.result, r.carry, r.overflow);
        }

        Instruction::DataProcessing { op, rdn, rm } => {
            execute_dp(cpu, op, rdn, rm);
        }

        Instruction::AddHi { rdn, rm } => {
            let value = gpr(cpu, pc, rdn).wrapping_add(gpr(cpu, pc, rm));
            cpu.write_reg(rdn, value);
        }
        Instruction::CmpHi { rn, rm } => {
            let r = arith::sub(gpr(cpu, pc, rn), gpr(cpu, pc, rm));
            cpu.set_nzcv(r.result, r.carry, r.overflow);
        }
        Instruction::MovHi { rd, rm } => {
            let value = gpr(cpu, pc, rm);
            cpu.write_reg(rd, value);
        }
        Instruction::Bx { rm } => {
            let target = cpu.read_reg(rm);
            if super::is_exc_return(target) {
                return cpu.exception_return(target);
            }
            return cpu.branch_to(target);
        }
        Instruction::Blx { rm } => {
            let target = cpu.read_reg(rm);
            cpu.write_reg(14, cpu.pc | 1);
            return cpu.branch_to(target);
        }

        Instruction::LdrLiteral { rt, imm8 } => {
            let base = (pc.wrapping_add(4)) & !0x3;
            let address = base.wrapping_add(imm8 as u32 * 4);
            let value = cpu.mem.load(address, 4, false).map_err(|e| e.into_fault())?;
            cpu.write_reg(rt, value);
        }

        Instruction::LoadStoreReg { op, rt, rn, rm } => {
            let address = cpu.read_reg(rn).wrapping_add(cpu.read_reg(rm));
            execute_load_store_reg(cpu, op, rt, address)?;
        }

        Instruction::LoadStoreImm { op, rt, rn, imm5 } => {
            let (scale, width, signed, is_load) = match op {
                LoadStoreImmOp::StrWord => (4u32, 4u8, false, false),
                LoadStoreImmOp::LdrWord => (4, 4, false, true),
                LoadStoreImmOp::StrByte => (1, 1, false, false),
                LoadStoreImmOp::LdrByte => (1, 1, false, true),
                LoadStoreImmOp::StrHalf => (2, 2, false, false),
                LoadStoreImmOp::LdrHalf => (2, 2, false, true),
            };
            let address = cpu.read_reg(rn).wrapping_add(imm5 as u32 * scale);
            if is_load {
                let value = cpu.mem.load(address, width, signed).map_err(|e| e.into_fault())?;
                cpu.write_reg(rt, value);
            } else {
                cpu.mem.store(address, cpu.read_reg(rt), width).map_err(|e| e.into_fault())?;
            }
        }

        Instruction::StrSp { rt, imm8 } => {
            let address = cpu.read_reg(13).wrapping_add(imm8 as u32 * 4);
            cpu.mem.store(address, cpu.read_reg(rt), 4).map_err(|e| e.into_fault())?;
        }
        Instruction::LdrSp { rt, imm8 } => {
            let address = cpu.read_reg(13).wrapping_add(imm8 as u32 * 4);
            let value = cpu.mem.load(address, 4, false).map_err(|e| e.into_fault())?;
            cpu.write_reg(rt, value);
        }

        Instruction::Adr { rd, imm8 } => {
            let base = (pc.wrapping_add(4)) & !0x3;
            cpu.write_reg(rd, base.wrapping_add(imm8 as u32 * 4));
        }
        Instruction::AddSpImm { rd, imm8 } => {
            cpu.write_reg(rd, cpu.read_reg(13).wrapping_add(imm8 as u32 * 4));
        }
        Instruction::IncrSp { imm7 } => {
            let sp = cpu.read_reg(13).wrapping_add(imm7 as u32 * 4);
            cpu.write_reg(13, sp);
        }
        Instruction::DecrSp { imm7 } => {
            let sp = cpu.read_reg(13).wrapping_sub(imm7 as u32 * 4);
            cpu.write_reg(13, sp);
        }

        Instruction::Sxth { rd, rm } => {
            cpu.write_reg(rd, cpu.read_reg(rm) as u16 as i16 as i32 as u32);
        }
        Instruction::Sxtb { rd, rm } => {
            cpu.write_reg(rd, cpu.read_reg(rm) as u8 as i8 as i32 as u32);
        }
        Instruction::Uxth { rd, rm } => {
            cpu.write_reg(rd, cpu.read_reg(rm) as u16 as u32);
        }
        Instruction::Uxtb { rd, rm } => {
            cpu.write_reg(rd, cpu.read_reg(rm) as u8 as u32);
        }

        Instruction::Push { registers, lr } => {
            execute_push(cpu, registers, lr)?;
        }
        Instruction::Pop { registers, pc: pop_pc } => {
            execute_pop(cpu, registers, pop_pc)?;
        }

        Instruction::Rev { rd, rm } => {
            cpu.write_reg(rd, cpu.read_reg(rm).swap_bytes());
        }
        Instruction::Rev16 { rd, rm } => {
            let v = cpu.read_reg(rm);
            let swap16 = |h: u32| ((h & 0xFF) << 8) | ((h >> 8) & 0xFF);
            cpu.write_reg(rd, (swap16(v >> 16) << 16) | swap16(v));
        }
        Instruction::Revsh { rd, rm } => {
            let v = cpu.read_reg(rm);
            let swapped = ((v & 0xFF) << 8) | ((v >> 8) & 0xFF);
            cpu.write_reg(rd, swapped as u16 as i16 as i32 as u32);
        }

        Instruction::Cps { disable } => cpu.set_primask(disable),
        Instruction::Bkpt { imm8: _ } => {
            trace_cat!(cpu, FLAGS, "bkpt halt at pc={:#010x}", pc);
            cpu.halted = true;
        }
        Instruction::Hint => {}

        Instruction::Ldm { rn, registers } => execute_ldm(cpu, rn, registers, pc, raw_opcode)?,
        Instruction::Stm { rn, registers } => execute_stm(cpu, rn, registers, pc, raw_opcode)?,

        Instruction::BCond { cond, offset } => {
            if cond_holds(cpu, cond) {
                return cpu.branch_to(pc.wrapping_add(4).wrapping_add(offset as u32));
            }
        }
        Instruction::Svc { imm8: _ } => {
            return cpu.exception_entry(11);
        }
        Instruction::B { offset } => {
            return cpu.branch_to(pc.wrapping_add(4).wrapping_add(offset as u32));
        }
        Instruction::Bl { offset } => {
            cpu.write_reg(14, cpu.pc | 1);
            return cpu.branch_to(pc.wrapping_add(4).wrapping_add(offset as u32));
        }

        Instruction::Undefined => {
            return Err(FaultKind::IllegalInstruction { pc, opcode: raw_opcode });
        }
        Instruction::Unsupported32 { opcode } => {
            return Err(FaultKind::IllegalInstruction { pc, opcode });
        }
    }

    Ok(())
}

fn execute_dp(cpu: &mut Cpu, op: DpOp, rdn: u8, rm: u8) {
    let a = cpu.read_reg(rdn);
    let b = cpu.read_reg(rm);
    match op {
        DpOp::And => {
            let r = a & b;
            cpu.write_reg(rdn, r);
            cpu.set_nz(r);
        }
        DpOp::Eor => {
            let r = a ^ b;
            cpu.write_reg(rdn, r);
            cpu.set_nz(r);
        }
        DpOp::Lsl => {
            let (r, c) = shifter::lsl(a, b & 0xFF, cpu.c());
            cpu.write_reg(rdn, r);
            cpu.set_nzc(r, c);
        }
        DpOp::Lsr => {
            let (r, c) = shifter::lsr(a, b & 0xFF, cpu.c());
            cpu.write_reg(rdn, r);
            cpu.set_nzc(r, c);
        }
        DpOp::Asr => {
            let (r, c) = shifter::asr(a, b & 0xFF, cpu.c());
            cpu.write_reg(rdn, r);
            cpu.set_nzc(r, c);
        }
        DpOp::Adc => {
            let res = arith::add_with_carry(a, b, cpu.c());
            cpu.write_reg(rdn, res.result);
            cpu.set_nzcv(res.result, res.carry, res.overflow);
        }
        DpOp::Sbc => {
            let res = arith::sbc(a, b, cpu.c());
            cpu.write_reg(rdn, res.result);
            cpu.set_nzcv(res.result, res.carry, res.overflow);
        }
        DpOp::Ror => {
            let (r, c) = shifter::ror(a, b & 0xFF, cpu.c());
            cpu.write_reg(rdn, r);
            cpu.set_nzc(r, c);
        }
        DpOp::Tst => cpu.set_nz(a & b),
        DpOp::Neg => {
            let res = arith::sub(0, b);
            cpu.write_reg(rdn, res.result);
            cpu.set_nzcv(res.result, res.carry, res.overflow);
        }
        DpOp::Cmp => {
            let res = arith::sub(a, b);
            cpu.set_nzcv(res.result, res.carry, res.overflow);
        }
        DpOp::Cmn => {
            let res = arith::add_with_carry(a, b, false);
            cpu.set_nzcv(res.result, res.carry, res.overflow);
        }
        DpOp::Orr => {
            let r = a | b;
            cpu.write_reg(rdn, r);
            cpu.set_nz(r);
        }
        DpOp::Mul => {
            let r = a.wrapping_mul(b);
            cpu.write_reg(rdn, r);
            cpu.set_nz(r);
        }
        DpOp::Bic => {
            let r = a & !b;
            cpu.write_reg(rdn, r);
            cpu.set_nz(r);
        }
        DpOp::Mvn => {
            let r = !b;
            cpu.write_reg(rdn, r);
            cpu.set_nz(r);
        }
    }
}

fn execute_load_store_reg(cpu: &mut Cpu, op: LoadStoreRegOp, rt: u8, address: u32) -> Result<(), FaultKind> {
    let (width, signed, is_load) = match op {
        LoadStoreRegOp::Str => (4u8, false, false),
        LoadStoreRegOp::Strh => (2, false, false),
        LoadStoreRegOp::Strb => (1, false, false),
        LoadStoreRegOp::Ldrsb => (1, true, true),
        LoadStoreRegOp::Ldr => (4, false, true),
        LoadStoreRegOp::Ldrh => (2, false, true),
        LoadStoreRegOp::Ldrb => (1, false, true),
        LoadStoreRegOp::Ldrsh => (2, true, true),
    };
    if is_load {
        let value = cpu.mem.load(address, width, signed).map_err(|e| e.into_fault())?;
        cpu.write_reg(rt, value);
    } else {
        cpu.mem.store(address, cpu.read_reg(rt), width).map_err(|e| e.into_fault())?;
    }
    Ok(())
}

fn execute_push(cpu: &mut Cpu, registers: u16, lr: bool) -> Result<(), FaultKind> {
    let count = registers.count_ones() + lr as u32;
    let mut address = cpu.read_reg(13).wrapping_sub(4 * count);
    let new_sp = address;
    for i in 0..8u8 {
        if registers & (1 << i) != 0 {
            cpu.mem.store(address, cpu.read_reg(i), 4).map_err(|e| e.into_fault())?;
            address = address.wrapping_add(4);
        }
    }
    if lr {
        cpu.mem.store(address, cpu.read_reg(14), 4).map_err(|e| e.into_fault())?;
    }
    cpu.write_reg(13, new_sp);
    Ok(())
}

fn execute_pop(cpu: &mut Cpu, registers: u16, pop_pc: bool) -> Result<(), FaultKind> {
    let mut address = cpu.read_reg(13);
    for i in 0..8u8 {
        if registers & (1 << i) != 0 {
            let value = cpu.mem.load(address, 4, false).map_err(|e| e.into_fault())?;
            cpu.write_reg(i, value);
            address = address.wrapping_add(4);
        }
    }
    if pop_pc {
        let target = cpu.mem.load(address, 4, false).map_err(|e| e.into_fault())?;
        address = address.wrapping_add(4);
        cpu.write_reg(13, address);
        if super::is_exc_return(target) {
            return cpu.exception_return(target);
        }
        return cpu.branch_to(target);
    }
    cpu.write_reg(13, address);
    Ok(())
}

fn execute_ldm(cpu: &mut Cpu, rn: u8, registers: u16, pc: u32, raw_opcode: u32) -> Result<(), FaultKind> {
    if registers == 0 {
        return Err(FaultKind::IllegalInstruction { pc, opcode: raw_opcode });
    }
    let mut address = cpu.read_reg(rn);
    let rn_in_list = registers & (1 << rn) != 0;
    for i in 0..8u8 {
        if registers & (1 << i) != 0 {
            let value = cpu.mem.load(address, 4, false).map_err(|e| e.into_fault())?;
            cpu.write_reg(i, value);
            address = address.wrapping_add(4);
        }
    }
    if !rn_in_list {
        cpu.write_reg(rn, address);
    }
    Ok(())
}

fn execute_stm(cpu: &mut Cpu, rn: u8, registers: u16, pc: u32, raw_opcode: u32) -> Result<(), FaultKind> {
    if registers == 0 {
        return Err(FaultKind::IllegalInstruction { pc, opcode: raw_opcode });
    }
    let mut address = cpu.read_reg(rn);
    for i in 0..8u8 {
        if registers & (1 << i) != 0 {
            cpu.mem.store(address, cpu.read_reg(i), 4).map_err(|e| e.into_fault())?;
            address = address.wrapping_add(4);
        }
    }
    cpu.write_reg(rn, address);
    Ok(())
}
