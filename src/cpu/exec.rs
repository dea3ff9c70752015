use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::Fault;
use crate::ops::{op, Indexed, OffsetReg};
use crate::symbol::Register;

use super::{Bus, CcFlags, Control, MachineState, Regs};

/// Host-side observer of the execution engine. All notifications fire
/// synchronously on the worker thread; default methods are no-ops.
pub trait Monitor: Send {
    fn machine_started(&mut self) {}
    fn machine_stopped(&mut self) {}
    fn machine_paused(&mut self) {}
    fn machine_resumed(&mut self) {}
    /// The breakpoint opcode was reached; the machine is now paused with
    /// the program counter still at the breakpoint.
    fn breakpoint_hit(&mut self, _addr: u16) {}
    fn before_instruction(&mut self, _pc: u16, _is_store: bool, _target: Option<u16>) {}
    fn after_instruction(&mut self, _pc: u16, _is_store: bool, _target: Option<u16>) {}
    fn registers_changed(&mut self, _regs: &Regs) {}
}

/// Outcome of a single fetch-decode-execute step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Step {
    Continue,
    Halt,
    Breakpoint,
}

/// State owned by the worker thread: registers, the three stacks, and
/// handles to everything shared with the host.
pub(crate) struct Core {
    pub(crate) regs: Regs,
    byte_stack: Vec<u8>,
    word_stack: Vec<u16>,
    call_stack: Vec<u16>,
    exec_addr: u16,
    bus: Arc<Bus>,
    ctl: Arc<Control>,
    monitors: Arc<Mutex<Vec<Box<dyn Monitor>>>>,
    snapshot: Arc<Mutex<Regs>>,
}

enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

impl Core {
    pub(crate) fn new(
        regs: Regs,
        exec_addr: u16,
        bus: Arc<Bus>,
        ctl: Arc<Control>,
        monitors: Arc<Mutex<Vec<Box<dyn Monitor>>>>,
        snapshot: Arc<Mutex<Regs>>,
    ) -> Core {
        Core {
            regs,
            byte_stack: Vec::new(),
            word_stack: Vec::new(),
            call_stack: Vec::new(),
            exec_addr,
            bus,
            ctl,
            monitors,
            snapshot,
        }
    }

    /// Worker thread body. Runs until halt, stop or fault, then reports the
    /// result on the completion channel so hosts can await actual exit.
    pub(crate) fn run(mut self, done: Sender<Result<(), Fault>>) {
        self.notify(|m| m.machine_started());
        let result = self.exec_loop();
        self.ctl.set_state(MachineState::Stopped);
        self.ctl.clear_stop();
        *self.snapshot.lock().unwrap() = self.regs;
        self.notify(|m| m.machine_stopped());
        let _ = done.send(result);
    }

    fn exec_loop(&mut self) -> Result<(), Fault> {
        loop {
            // Stop and pause are only observed here, between instructions.
            if self.ctl.stop_requested() {
                self.regs.pc = self.exec_addr;
                return Ok(());
            }
            if self.ctl.state() == MachineState::Paused {
                self.notify(|m| m.machine_paused());
                if !self.ctl.block_while_paused() {
                    self.regs.pc = self.exec_addr;
                    return Ok(());
                }
                self.notify(|m| m.machine_resumed());
            }
            let delay = self.ctl.speed_ms();
            if delay > 0 {
                thread::sleep(Duration::from_millis(delay));
            }

            match self.step()? {
                Step::Continue => {
                    *self.snapshot.lock().unwrap() = self.regs;
                    let regs = self.regs;
                    self.notify(|m| m.registers_changed(&regs));
                }
                Step::Halt => {
                    self.regs.pc = self.exec_addr;
                    return Ok(());
                }
                Step::Breakpoint => {
                    let at = self.regs.pc;
                    self.ctl.set_state(MachineState::Paused);
                    *self.snapshot.lock().unwrap() = self.regs;
                    self.notify(|m| m.breakpoint_hit(at));
                    self.notify(|m| m.machine_paused());
                    if !self.ctl.block_while_paused() {
                        self.regs.pc = self.exec_addr;
                        return Ok(());
                    }
                    // Resume continues past the breakpoint byte.
                    self.regs.pc = at.wrapping_add(1);
                    self.notify(|m| m.machine_resumed());
                }
            }
        }
    }

    fn notify(&self, mut f: impl FnMut(&mut dyn Monitor)) {
        let mut monitors = self.monitors.lock().unwrap();
        for monitor in monitors.iter_mut() {
            f(monitor.as_mut());
        }
    }

    /// Execute exactly one instruction. Fetch and operand decode read raw
    /// memory; only data loads and stores go through the device-aware path.
    pub(crate) fn step(&mut self) -> Result<Step, Fault> {
        let pc = self.regs.pc;
        let opcode = self.bus.read_raw(pc)?;
        if opcode == op::BRK {
            return Ok(Step::Breakpoint);
        }
        let target = self.store_target(opcode, pc)?;
        self.notify(|m| m.before_instruction(pc, target.is_some(), target));
        let outcome = self.execute(opcode, pc)?;
        self.notify(|m| m.after_instruction(pc, target.is_some(), target));
        Ok(outcome)
    }

    fn execute(&mut self, opcode: u8, pc: u16) -> Result<Step, Fault> {
        use Register as R;
        match opcode {
            op::HLT => return Ok(Step::Halt),
            op::NOP => self.regs.pc = pc.wrapping_add(1),

            op::LDA_IMM => self.ld_imm(pc, R::A)?,
            op::LDA_EXT => self.ld_ext(pc, R::A)?,
            op::LDA_IDX => self.ld_idx(pc, R::A)?,
            op::LDB_IMM => self.ld_imm(pc, R::B)?,
            op::LDB_EXT => self.ld_ext(pc, R::B)?,
            op::LDB_IDX => self.ld_idx(pc, R::B)?,
            op::LDD_IMM => self.ld_imm(pc, R::D)?,
            op::LDD_EXT => self.ld_ext(pc, R::D)?,
            op::LDD_IDX => self.ld_idx(pc, R::D)?,
            op::LDX_IMM => self.ld_imm(pc, R::X)?,
            op::LDX_EXT => self.ld_ext(pc, R::X)?,
            op::LDX_IDX => self.ld_idx(pc, R::X)?,
            op::LDY_IMM => self.ld_imm(pc, R::Y)?,
            op::LDY_EXT => self.ld_ext(pc, R::Y)?,
            op::LDY_IDX => self.ld_idx(pc, R::Y)?,

            op::STA_EXT => self.st_ext(pc, R::A)?,
            op::STA_IDX => self.st_idx(pc, R::A)?,
            op::STB_EXT => self.st_ext(pc, R::B)?,
            op::STB_IDX => self.st_idx(pc, R::B)?,
            op::STD_EXT => self.st_ext(pc, R::D)?,
            op::STD_IDX => self.st_idx(pc, R::D)?,
            op::STX_EXT => self.st_ext(pc, R::X)?,
            op::STX_IDX => self.st_idx(pc, R::X)?,
            op::STY_EXT => self.st_ext(pc, R::Y)?,
            op::STY_IDX => self.st_idx(pc, R::Y)?,

            op::CMPA_IMM => self.cmp_imm(pc, R::A)?,
            op::CMPA_EXT => self.cmp_ext(pc, R::A)?,
            op::CMPA_REG => self.cmp_reg(pc, R::A)?,
            op::CMPB_IMM => self.cmp_imm(pc, R::B)?,
            op::CMPB_EXT => self.cmp_ext(pc, R::B)?,
            op::CMPB_REG => self.cmp_reg(pc, R::B)?,
            op::CMPD_IMM => self.cmp_imm(pc, R::D)?,
            op::CMPD_EXT => self.cmp_ext(pc, R::D)?,
            op::CMPD_REG => self.cmp_reg(pc, R::D)?,
            op::CMPX_IMM => self.cmp_imm(pc, R::X)?,
            op::CMPX_EXT => self.cmp_ext(pc, R::X)?,
            op::CMPX_REG => self.cmp_reg(pc, R::X)?,
            op::CMPY_IMM => self.cmp_imm(pc, R::Y)?,
            op::CMPY_EXT => self.cmp_ext(pc, R::Y)?,
            op::CMPY_REG => self.cmp_reg(pc, R::Y)?,

            op::JMP | op::JEQ | op::JNE | op::JGT | op::JLT | op::JGE | op::JLE | op::JCS
            | op::JCC => self.jump(pc, opcode)?,
            op::CALL => self.call(pc)?,
            op::RET => self.ret()?,

            op::PUSH => self.push_regs(pc)?,
            op::POP => self.pop_regs(pc)?,
            op::TFR => self.tfr(pc)?,

            op::ADDA_IMM => self.alu_imm(pc, AluOp::Add, R::A)?,
            op::ADDA_EXT => self.alu_ext(pc, AluOp::Add, R::A)?,
            op::ADDA_REG => self.alu_reg(pc, AluOp::Add, R::A)?,
            op::ADDB_IMM => self.alu_imm(pc, AluOp::Add, R::B)?,
            op::ADDB_EXT => self.alu_ext(pc, AluOp::Add, R::B)?,
            op::ADDB_REG => self.alu_reg(pc, AluOp::Add, R::B)?,
            op::SUBA_IMM => self.alu_imm(pc, AluOp::Sub, R::A)?,
            op::SUBA_EXT => self.alu_ext(pc, AluOp::Sub, R::A)?,
            op::SUBA_REG => self.alu_reg(pc, AluOp::Sub, R::A)?,
            op::SUBB_IMM => self.alu_imm(pc, AluOp::Sub, R::B)?,
            op::SUBB_EXT => self.alu_ext(pc, AluOp::Sub, R::B)?,
            op::SUBB_REG => self.alu_reg(pc, AluOp::Sub, R::B)?,
            op::ANDA_IMM => self.alu_imm(pc, AluOp::And, R::A)?,
            op::ANDA_EXT => self.alu_ext(pc, AluOp::And, R::A)?,
            op::ANDA_REG => self.alu_reg(pc, AluOp::And, R::A)?,
            op::ANDB_IMM => self.alu_imm(pc, AluOp::And, R::B)?,
            op::ANDB_EXT => self.alu_ext(pc, AluOp::And, R::B)?,
            op::ANDB_REG => self.alu_reg(pc, AluOp::And, R::B)?,
            op::ORA_IMM => self.alu_imm(pc, AluOp::Or, R::A)?,
            op::ORA_EXT => self.alu_ext(pc, AluOp::Or, R::A)?,
            op::ORA_REG => self.alu_reg(pc, AluOp::Or, R::A)?,
            op::ORB_IMM => self.alu_imm(pc, AluOp::Or, R::B)?,
            op::ORB_EXT => self.alu_ext(pc, AluOp::Or, R::B)?,
            op::ORB_REG => self.alu_reg(pc, AluOp::Or, R::B)?,
            op::XORA_IMM => self.alu_imm(pc, AluOp::Xor, R::A)?,
            op::XORA_EXT => self.alu_ext(pc, AluOp::Xor, R::A)?,
            op::XORA_REG => self.alu_reg(pc, AluOp::Xor, R::A)?,
            op::XORB_IMM => self.alu_imm(pc, AluOp::Xor, R::B)?,
            op::XORB_EXT => self.alu_ext(pc, AluOp::Xor, R::B)?,
            op::XORB_REG => self.alu_reg(pc, AluOp::Xor, R::B)?,

            op::MUL => self.mul(pc)?,
            op::DIV => self.div(pc)?,
            op::SHL => self.shift(pc, true)?,
            op::SHR => self.shift(pc, false)?,

            _ => return Err(Fault::IllegalOpcode { opcode, at: pc }),
        }
        Ok(Step::Continue)
    }

    // Operand fetch helpers. Operands embedded in the instruction stream
    // are never device-backed.

    fn word_at(&self, addr: u16) -> Result<u16, Fault> {
        let lo = self.bus.read_raw(addr)?;
        let hi = self.bus.read_raw(addr.wrapping_add(1))?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn imm_val(&self, pc: u16, reg: Register) -> Result<u16, Fault> {
        if reg.is_wide() {
            self.word_at(pc.wrapping_add(1))
        } else {
            Ok(self.bus.read_raw(pc.wrapping_add(1))? as u16)
        }
    }

    fn idx_operand(&self, pc: u16) -> Result<Indexed, Fault> {
        let b0 = self.bus.read_raw(pc.wrapping_add(1))?;
        let b1 = self.bus.read_raw(pc.wrapping_add(2))?;
        Indexed::decode([b0, b1]).ok_or(Fault::BadIndexedOperand { at: pc })
    }

    /// Effective address of an indexed operand, before any post-adjust.
    fn idx_ea(&self, idx: Indexed) -> u16 {
        let base = self.regs.get(idx.index);
        let offset = match idx.offset {
            OffsetReg::None => 0,
            OffsetReg::A => self.regs.a as u16,
            OffsetReg::B => self.regs.b as u16,
        };
        base.wrapping_add(offset)
    }

    /// Post-increment or -decrement the index register after the access.
    fn apply_post(&mut self, idx: Indexed) {
        let step = idx.post.step();
        if step != 0 {
            let val = self.regs.get(idx.index).wrapping_add(step as u16);
            self.regs.set(idx.index, val);
        }
    }

    fn selector_at(&self, addr: u16, pc: u16) -> Result<Register, Fault> {
        let sel = self.bus.read_raw(addr)?;
        Register::from_selector(sel).ok_or(Fault::BadRegisterSelector { at: pc })
    }

    /// Device-aware data read, low byte first for 16-bit values.
    fn read_val(&self, addr: u16, wide: bool) -> Result<u16, Fault> {
        let lo = self.bus.read(addr, false)?;
        if wide {
            let hi = self.bus.read(addr.wrapping_add(1), false)?;
            Ok(u16::from_le_bytes([lo, hi]))
        } else {
            Ok(lo as u16)
        }
    }

    /// Device-aware data write.
    fn write_val(&self, addr: u16, wide: bool, val: u16) -> Result<(), Fault> {
        let bytes = val.to_le_bytes();
        self.bus.write(addr, bytes[0])?;
        if wide {
            self.bus.write(addr.wrapping_add(1), bytes[1])?;
        }
        Ok(())
    }

    /// Target address of a store opcode, for the instruction hooks.
    fn store_target(&self, opcode: u8, pc: u16) -> Result<Option<u16>, Fault> {
        match opcode {
            op::STA_EXT | op::STB_EXT | op::STD_EXT | op::STX_EXT | op::STY_EXT => {
                Ok(Some(self.word_at(pc.wrapping_add(1))?))
            }
            op::STA_IDX | op::STB_IDX | op::STD_IDX | op::STX_IDX | op::STY_IDX => {
                let idx = self.idx_operand(pc)?;
                Ok(Some(self.idx_ea(idx)))
            }
            _ => Ok(None),
        }
    }

    // Instruction effects.

    fn ld_imm(&mut self, pc: u16, reg: Register) -> Result<(), Fault> {
        let val = self.imm_val(pc, reg)?;
        self.regs.set(reg, val);
        self.regs.pc = pc.wrapping_add(1 + reg.imm_width());
        Ok(())
    }

    fn ld_ext(&mut self, pc: u16, reg: Register) -> Result<(), Fault> {
        let addr = self.word_at(pc.wrapping_add(1))?;
        let val = self.read_val(addr, reg.is_wide())?;
        self.regs.set(reg, val);
        self.regs.pc = pc.wrapping_add(3);
        Ok(())
    }

    fn ld_idx(&mut self, pc: u16, reg: Register) -> Result<(), Fault> {
        let idx = self.idx_operand(pc)?;
        let ea = self.idx_ea(idx);
        let val = self.read_val(ea, reg.is_wide())?;
        self.regs.set(reg, val);
        self.apply_post(idx);
        self.regs.pc = pc.wrapping_add(3);
        Ok(())
    }

    fn st_ext(&mut self, pc: u16, reg: Register) -> Result<(), Fault> {
        let addr = self.word_at(pc.wrapping_add(1))?;
        self.write_val(addr, reg.is_wide(), self.regs.get(reg))?;
        self.regs.pc = pc.wrapping_add(3);
        Ok(())
    }

    fn st_idx(&mut self, pc: u16, reg: Register) -> Result<(), Fault> {
        let idx = self.idx_operand(pc)?;
        let ea = self.idx_ea(idx);
        self.write_val(ea, reg.is_wide(), self.regs.get(reg))?;
        self.apply_post(idx);
        self.regs.pc = pc.wrapping_add(3);
        Ok(())
    }

    /// Recompute all four ordering flags from an unsigned comparison.
    /// Carry is untouched.
    fn set_ordering(&mut self, lhs: u16, rhs: u16) {
        let cc = &mut self.regs.cc;
        cc.remove(CcFlags::EQUAL | CcFlags::NOT_EQUAL | CcFlags::GREATER | CcFlags::LESS);
        if lhs == rhs {
            cc.insert(CcFlags::EQUAL);
        } else {
            cc.insert(CcFlags::NOT_EQUAL);
            cc.insert(if lhs > rhs {
                CcFlags::GREATER
            } else {
                CcFlags::LESS
            });
        }
    }

    fn cmp_imm(&mut self, pc: u16, reg: Register) -> Result<(), Fault> {
        let val = self.imm_val(pc, reg)?;
        self.set_ordering(self.regs.get(reg), val);
        self.regs.pc = pc.wrapping_add(1 + reg.imm_width());
        Ok(())
    }

    fn cmp_ext(&mut self, pc: u16, reg: Register) -> Result<(), Fault> {
        let addr = self.word_at(pc.wrapping_add(1))?;
        let val = self.read_val(addr, reg.is_wide())?;
        self.set_ordering(self.regs.get(reg), val);
        self.regs.pc = pc.wrapping_add(3);
        Ok(())
    }

    fn cmp_reg(&mut self, pc: u16, reg: Register) -> Result<(), Fault> {
        let other = self.selector_at(pc.wrapping_add(1), pc)?;
        self.set_ordering(self.regs.get(reg), self.regs.get(other));
        self.regs.pc = pc.wrapping_add(2);
        Ok(())
    }

    fn jump(&mut self, pc: u16, opcode: u8) -> Result<(), Fault> {
        let target = self.word_at(pc.wrapping_add(1))?;
        let cc = self.regs.cc;
        let taken = match opcode {
            op::JMP => true,
            op::JEQ => cc.contains(CcFlags::EQUAL),
            op::JNE => cc.contains(CcFlags::NOT_EQUAL),
            op::JGE => cc.intersects(CcFlags::EQUAL | CcFlags::GREATER),
            op::JLE => cc.intersects(CcFlags::EQUAL | CcFlags::LESS),
            op::JGT => cc.contains(CcFlags::GREATER),
            op::JLT => cc.contains(CcFlags::LESS),
            op::JCS => cc.contains(CcFlags::CARRY),
            op::JCC => !cc.contains(CcFlags::CARRY),
            _ => unreachable!(),
        };
        self.regs.pc = if taken { target } else { pc.wrapping_add(3) };
        Ok(())
    }

    fn call(&mut self, pc: u16) -> Result<(), Fault> {
        let target = self.word_at(pc.wrapping_add(1))?;
        self.call_stack.push(pc.wrapping_add(3));
        self.regs.pc = target;
        Ok(())
    }

    fn ret(&mut self) -> Result<(), Fault> {
        self.regs.pc = self.call_stack.pop().ok_or(Fault::CallStackUnderflow)?;
        Ok(())
    }

    /// Push the selected registers in the canonical order A,B,D,X,Y.
    /// 8-bit registers use the byte stack, 16-bit the word stack.
    fn push_regs(&mut self, pc: u16) -> Result<(), Fault> {
        let mask = self.bus.read_raw(pc.wrapping_add(1))?;
        for reg in Register::CANONICAL {
            if mask & reg.selector() != 0 {
                let val = self.regs.get(reg);
                if reg.is_wide() {
                    self.word_stack.push(val);
                } else {
                    self.byte_stack.push(val as u8);
                }
            }
        }
        self.regs.pc = pc.wrapping_add(2);
        Ok(())
    }

    /// Pop in reverse canonical order, the inverse of `push_regs`.
    fn pop_regs(&mut self, pc: u16) -> Result<(), Fault> {
        let mask = self.bus.read_raw(pc.wrapping_add(1))?;
        for reg in Register::CANONICAL.into_iter().rev() {
            if mask & reg.selector() != 0 {
                let val = if reg.is_wide() {
                    self.word_stack.pop().ok_or(Fault::WordStackUnderflow)?
                } else {
                    self.byte_stack.pop().ok_or(Fault::ByteStackUnderflow)? as u16
                };
                self.regs.set(reg, val);
            }
        }
        self.regs.pc = pc.wrapping_add(2);
        Ok(())
    }

    fn tfr(&mut self, pc: u16) -> Result<(), Fault> {
        let src = self.selector_at(pc.wrapping_add(1), pc)?;
        let dst = self.selector_at(pc.wrapping_add(2), pc)?;
        self.regs.set(dst, self.regs.get(src));
        self.regs.pc = pc.wrapping_add(3);
        Ok(())
    }

    fn alu_imm(&mut self, pc: u16, aop: AluOp, reg: Register) -> Result<(), Fault> {
        let val = self.bus.read_raw(pc.wrapping_add(1))?;
        self.apply_alu(aop, reg, val);
        self.regs.pc = pc.wrapping_add(2);
        Ok(())
    }

    fn alu_ext(&mut self, pc: u16, aop: AluOp, reg: Register) -> Result<(), Fault> {
        let addr = self.word_at(pc.wrapping_add(1))?;
        let val = self.bus.read(addr, false)?;
        self.apply_alu(aop, reg, val);
        self.regs.pc = pc.wrapping_add(3);
        Ok(())
    }

    fn alu_reg(&mut self, pc: u16, aop: AluOp, reg: Register) -> Result<(), Fault> {
        let other = self.selector_at(pc.wrapping_add(1), pc)?;
        let val = self.regs.get(other) as u8;
        self.apply_alu(aop, reg, val);
        self.regs.pc = pc.wrapping_add(2);
        Ok(())
    }

    /// ADD sets carry on unsigned wrap, SUB on borrow; the logical ops
    /// leave the condition codes untouched.
    fn apply_alu(&mut self, aop: AluOp, reg: Register, val: u8) {
        let cur = self.regs.get(reg) as u8;
        let res = match aop {
            AluOp::Add => {
                let sum = cur as u16 + val as u16;
                self.regs.cc.set_if(CcFlags::CARRY, sum > 0xFF);
                sum as u8
            }
            AluOp::Sub => {
                self.regs.cc.set_if(CcFlags::CARRY, val > cur);
                cur.wrapping_sub(val)
            }
            AluOp::And => cur & val,
            AluOp::Or => cur | val,
            AluOp::Xor => cur ^ val,
        };
        self.regs.set(reg, res as u16);
    }

    fn mul(&mut self, pc: u16) -> Result<(), Fault> {
        let dst = self.selector_at(pc.wrapping_add(1), pc)?;
        let src = self.selector_at(pc.wrapping_add(2), pc)?;
        let product = self.regs.get(dst) as u32 * self.regs.get(src) as u32;
        let (res, overflow) = if dst.is_wide() {
            (product as u16, product > 0xFFFF)
        } else {
            ((product & 0xFF) as u16, product > 0xFF)
        };
        self.regs.cc.set_if(CcFlags::CARRY, overflow);
        self.regs.set(dst, res);
        self.regs.pc = pc.wrapping_add(3);
        Ok(())
    }

    fn div(&mut self, pc: u16) -> Result<(), Fault> {
        let dst = self.selector_at(pc.wrapping_add(1), pc)?;
        let src = self.selector_at(pc.wrapping_add(2), pc)?;
        let divisor = self.regs.get(src);
        if divisor == 0 {
            return Err(Fault::DivideByZero { at: pc });
        }
        let val = self.regs.get(dst);
        self.regs.cc.set_if(CcFlags::CARRY, val % divisor != 0);
        self.regs.set(dst, val / divisor);
        self.regs.pc = pc.wrapping_add(3);
        Ok(())
    }

    /// Shift one bit; carry takes the bit shifted out.
    fn shift(&mut self, pc: u16, left: bool) -> Result<(), Fault> {
        let reg = self.selector_at(pc.wrapping_add(1), pc)?;
        let val = self.regs.get(reg);
        let (res, out) = if left {
            let msb = if reg.is_wide() { 0x8000 } else { 0x80 };
            let res = if reg.is_wide() {
                val << 1
            } else {
                ((val as u8) << 1) as u16
            };
            (res, val & msb != 0)
        } else {
            (val >> 1, val & 1 != 0)
        };
        self.regs.cc.set_if(CcFlags::CARRY, out);
        self.regs.set(reg, res);
        self.regs.pc = pc.wrapping_add(2);
        Ok(())
    }
}
