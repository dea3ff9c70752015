use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bitflags::bitflags;

use crate::device::Device;
use crate::error::Fault;
use crate::program::Program;
use crate::symbol::Register;

pub mod exec;

pub use exec::Monitor;

/// The flat memory array holds 65,535 bytes; address `0xFFFF` is out of
/// range and faults.
pub const MEMORY_MAX: usize = 0xFFFF;

bitflags! {
    /// The 8-bit condition-code register.
    ///
    /// After any compare exactly one of EQUAL/NOT_EQUAL is set, and with
    /// NOT_EQUAL exactly one of GREATER/LESS.
    #[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
    pub struct CcFlags: u8 {
        const CARRY     = 0b00001;
        const EQUAL     = 0b00010;
        const GREATER   = 0b00100;
        const LESS      = 0b01000;
        const NOT_EQUAL = 0b10000;
    }
}

impl CcFlags {
    /// Set one or more flags if a boolean condition is true.
    pub fn set_if(&mut self, val: Self, cond: bool) {
        if cond {
            self.insert(val);
        } else {
            self.remove(val);
        }
    }
}

impl fmt::Display for CcFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            if self.contains(CcFlags::CARRY) { "C" } else { "" },
            if self.contains(CcFlags::EQUAL) { "E" } else { "" },
            if self.contains(CcFlags::GREATER) { "G" } else { "" },
            if self.contains(CcFlags::LESS) { "L" } else { "" },
            if self.contains(CcFlags::NOT_EQUAL) { "N" } else { "" },
        )
    }
}

/// The machine registers.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Regs {
    pub a: u8,
    pub b: u8,
    pub x: u16,
    pub y: u16,
    pub pc: u16,
    pub cc: CcFlags,
}

impl Regs {
    /// Registers in their power-on state.
    pub fn new() -> Regs {
        Regs::default()
    }

    /// `D` is the big-endian concatenation of `A` (high) and `B` (low),
    /// not a fourth storage cell.
    pub fn d(&self) -> u16 {
        (self.a as u16) << 8 | self.b as u16
    }

    pub fn set_d(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.b = val as u8;
    }

    /// Read any register widened to 16 bits.
    pub fn get(&self, reg: Register) -> u16 {
        match reg {
            Register::A => self.a as u16,
            Register::B => self.b as u16,
            Register::D => self.d(),
            Register::X => self.x,
            Register::Y => self.y,
        }
    }

    /// Write any register; 8-bit targets take the low byte.
    pub fn set(&mut self, reg: Register, val: u16) {
        match reg {
            Register::A => self.a = val as u8,
            Register::B => self.b = val as u8,
            Register::D => self.set_d(val),
            Register::X => self.x = val,
            Register::Y => self.y = val,
        }
    }
}

/// Run state of a machine instance.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MachineState {
    Stopped,
    Running,
    Paused,
}

/// Memory and the device list, shared between the host and the worker
/// thread. The original design read memory without a guard; Rust cannot
/// express that race safely, so reads take the same lock as writes.
pub(crate) struct Bus {
    mem: Mutex<Box<[u8; MEMORY_MAX]>>,
    devices: Mutex<Vec<Box<dyn Device>>>,
}

impl Bus {
    fn new() -> Bus {
        Bus {
            mem: Mutex::new(Box::new([0; MEMORY_MAX])),
            devices: Mutex::new(Vec::new()),
        }
    }

    /// Zero memory and copy a code image in at its origin.
    fn load_image(&self, origin: u16, code: &[u8]) -> Result<(), Fault> {
        let start = origin as usize;
        let end = start + code.len();
        if end > MEMORY_MAX {
            return Err(Fault::MemoryOutOfRange { addr: u16::MAX });
        }
        let mut mem = self.mem.lock().unwrap();
        mem.fill(0);
        mem[start..end].copy_from_slice(code);
        Ok(())
    }

    /// Raw read, bypassing devices. Instruction fetch and operand decode
    /// always come through here.
    pub(crate) fn read_raw(&self, addr: u16) -> Result<u8, Fault> {
        let mem = self.mem.lock().unwrap();
        mem.get(addr as usize)
            .copied()
            .ok_or(Fault::MemoryOutOfRange { addr })
    }

    /// Device-aware read: the first device whose range contains the address
    /// answers, otherwise raw memory.
    pub(crate) fn read(&self, addr: u16, debug: bool) -> Result<u8, Fault> {
        {
            let mut devices = self.devices.lock().unwrap();
            if let Some(dev) = devices.iter_mut().find(|dev| dev.contains(addr)) {
                return Ok(dev.peek(addr, debug));
            }
        }
        self.read_raw(addr)
    }

    /// Device-aware write: the backing memory is updated, then the store is
    /// broadcast to every device. Each device self-filters by range.
    pub(crate) fn write(&self, addr: u16, val: u8) -> Result<(), Fault> {
        {
            let mut mem = self.mem.lock().unwrap();
            let cell = mem
                .get_mut(addr as usize)
                .ok_or(Fault::MemoryOutOfRange { addr })?;
            *cell = val;
        }
        let mut devices = self.devices.lock().unwrap();
        for dev in devices.iter_mut() {
            dev.poke(addr, val);
        }
        Ok(())
    }

    pub(crate) fn reset_devices(&self) {
        let mut devices = self.devices.lock().unwrap();
        for dev in devices.iter_mut() {
            dev.reset();
        }
    }
}

/// Worker-thread control shared with the host.
pub(crate) struct Control {
    state: Mutex<MachineState>,
    cond: Condvar,
    stop: AtomicBool,
    /// Per-instruction throttle delay in milliseconds. Zero runs flat out.
    speed_ms: AtomicU64,
}

impl Control {
    fn new() -> Control {
        Control {
            state: Mutex::new(MachineState::Stopped),
            cond: Condvar::new(),
            stop: AtomicBool::new(false),
            speed_ms: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> MachineState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: MachineState) {
        *self.state.lock().unwrap() = state;
        self.cond.notify_all();
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub(crate) fn speed_ms(&self) -> u64 {
        self.speed_ms.load(Ordering::Relaxed)
    }

    /// Block until the machine leaves `Paused`. Returns false if the wait
    /// ended because a stop was requested.
    pub(crate) fn block_while_paused(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        while *state == MachineState::Paused && !self.stop_requested() {
            state = self.cond.wait(state).unwrap();
        }
        !self.stop_requested()
    }
}

/// A B33 machine instance: memory, devices and one worker thread per run.
///
/// `start` spawns the fetch-execute loop; `stop` is cooperative and
/// observed at instruction boundaries; `wait_finished` blocks until the
/// worker has actually exited and yields any runtime fault.
pub struct Machine {
    bus: Arc<Bus>,
    ctl: Arc<Control>,
    monitors: Arc<Mutex<Vec<Box<dyn Monitor>>>>,
    snapshot: Arc<Mutex<Regs>>,
    exec_addr: u16,
    worker: Option<JoinHandle<()>>,
    done: Option<Receiver<Result<(), Fault>>>,
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}

impl Machine {
    pub fn new() -> Machine {
        Machine {
            bus: Arc::new(Bus::new()),
            ctl: Arc::new(Control::new()),
            monitors: Arc::new(Mutex::new(Vec::new())),
            snapshot: Arc::new(Mutex::new(Regs::new())),
            exec_addr: 0,
            worker: None,
            done: None,
        }
    }

    /// Load a program image. Only valid while stopped; the previous image
    /// is discarded wholesale.
    pub fn load(&mut self, program: &Program) -> Result<(), Fault> {
        self.bus.load_image(program.origin, &program.code)?;
        self.exec_addr = program.exec_addr;
        Ok(())
    }

    /// Address execution starts at and returns to after halt.
    pub fn exec_addr(&self) -> u16 {
        self.exec_addr
    }

    pub fn add_device(&mut self, device: Box<dyn Device>) {
        self.bus.devices.lock().unwrap().push(device);
    }

    /// Remove every device based at `location`.
    pub fn remove_devices_at(&mut self, location: u16) {
        self.bus
            .devices
            .lock()
            .unwrap()
            .retain(|dev| dev.location() != location);
    }

    pub fn add_monitor(&mut self, monitor: Box<dyn Monitor>) {
        self.monitors.lock().unwrap().push(monitor);
    }

    /// Per-instruction throttle delay. Zero disables throttling.
    pub fn set_speed(&self, delay: Duration) {
        self.ctl
            .speed_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn state(&self) -> MachineState {
        self.ctl.state()
    }

    /// Register values as of the last completed instruction.
    pub fn registers(&self) -> Regs {
        *self.snapshot.lock().unwrap()
    }

    /// Device-aware read, callable from any thread. `debug` marks an
    /// inspecting read without device side effects.
    pub fn peek(&self, addr: u16, debug: bool) -> Result<u8, Fault> {
        self.bus.read(addr, debug)
    }

    /// Device-aware write, callable from any thread.
    pub fn poke(&self, addr: u16, val: u8) -> Result<(), Fault> {
        self.bus.write(addr, val)
    }

    /// Reset devices and registers. Only meaningful while stopped.
    pub fn reset(&mut self) {
        self.bus.reset_devices();
        let mut regs = Regs::new();
        regs.pc = self.exec_addr;
        *self.snapshot.lock().unwrap() = regs;
    }

    /// Spawn the fetch-execute worker. No-op unless currently stopped.
    pub fn start(&mut self) {
        if self.state() != MachineState::Stopped {
            return;
        }
        self.bus.reset_devices();
        self.ctl.clear_stop();
        self.ctl.set_state(MachineState::Running);

        let mut regs = Regs::new();
        regs.pc = self.exec_addr;
        *self.snapshot.lock().unwrap() = regs;

        let core = exec::Core::new(
            regs,
            self.exec_addr,
            Arc::clone(&self.bus),
            Arc::clone(&self.ctl),
            Arc::clone(&self.monitors),
            Arc::clone(&self.snapshot),
        );
        let (tx, rx) = std::sync::mpsc::channel();
        self.done = Some(rx);
        self.worker = Some(std::thread::spawn(move || core.run(tx)));
    }

    /// Request a pause at the next instruction boundary.
    pub fn pause(&self) {
        let mut state = self.ctl.state.lock().unwrap();
        if *state == MachineState::Running {
            *state = MachineState::Paused;
            self.ctl.cond.notify_all();
        }
    }

    pub fn resume(&self) {
        let mut state = self.ctl.state.lock().unwrap();
        if *state == MachineState::Paused {
            *state = MachineState::Running;
            self.ctl.cond.notify_all();
        }
    }

    /// Request a cooperative stop. The in-flight instruction always
    /// completes first; use [`Machine::wait_finished`] for the exit.
    pub fn stop(&self) {
        self.ctl.request_stop();
    }

    /// Block until the worker thread has exited. Returns the runtime fault
    /// if the run ended abnormally.
    pub fn wait_finished(&mut self) -> Result<(), Fault> {
        let result = match self.done.take() {
            Some(rx) => rx.recv().unwrap_or(Ok(())),
            None => Ok(()),
        };
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn d_register_is_a_view_over_a_and_b() {
        let mut regs = Regs::new();
        regs.set_d(0x1234);
        assert_eq!(regs.a, 0x12);
        assert_eq!(regs.b, 0x34);
        regs.a = 0xAB;
        assert_eq!(regs.d(), 0xAB34);
        regs.b = 0xCD;
        assert_eq!(regs.d(), 0xABCD);
    }

    #[test]
    fn set_get_widens_narrow_registers() {
        let mut regs = Regs::new();
        regs.set(Register::A, 0x1FF);
        assert_eq!(regs.get(Register::A), 0xFF);
        regs.set(Register::X, 0x1FF);
        assert_eq!(regs.get(Register::X), 0x1FF);
    }

    #[test]
    fn cc_set_if_inserts_and_removes() {
        let mut cc = CcFlags::default();
        cc.set_if(CcFlags::CARRY, true);
        assert!(cc.contains(CcFlags::CARRY));
        cc.set_if(CcFlags::CARRY, false);
        assert!(!cc.contains(CcFlags::CARRY));
    }

    #[test]
    fn memory_last_byte_is_out_of_range() {
        let bus = Bus::new();
        assert_eq!(bus.read_raw(0xFFFE).unwrap(), 0);
        assert!(matches!(
            bus.read_raw(0xFFFF),
            Err(Fault::MemoryOutOfRange { addr: 0xFFFF })
        ));
        assert!(matches!(
            bus.write(0xFFFF, 1),
            Err(Fault::MemoryOutOfRange { addr: 0xFFFF })
        ));
    }

    #[test]
    fn load_image_rejects_overrun() {
        let bus = Bus::new();
        assert!(bus.load_image(0xFFFE, &[1, 2, 3]).is_err());
        assert!(bus.load_image(0xFFFC, &[1, 2, 3]).is_ok());
    }
}
