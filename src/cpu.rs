//! The CPU: a dedicated worker thread that runs `step()` in a tight loop —
//! reset handling, interrupt dispatch with stack-frame construction, then
//! opcode fetch/decode/dispatch — until it halts. Grounded on the per-step
//! algorithm and opcode table; the mutex discipline (held across the
//! reset/interrupt prologue, released before instruction dispatch) follows
//! the teacher's `processor.rs` worker-thread split between CPU state and
//! the host-driven render loop.

use crate::devices::graphics::GFX_MMAP_START;
use crate::error::Result;
use crate::instructions::{self, CpuControl, ExecContext, InstructionEntry};
use crate::interrupts::{self, Interrupts};
use crate::memory::Memory;
use crate::ports::Ports;
use crate::registers::Registers;
use crate::stack;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

struct Inner {
    reset: bool,
    halt: bool,
    intr_enabled: bool,
    ip: u32,
    stopping: bool,
}

pub struct Cpu {
    inner: Mutex<Inner>,
    mem: Arc<Memory>,
    ports: Arc<Ports>,
    interrupts: Arc<Interrupts>,
    table: Vec<InstructionEntry>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Cpu {
    pub fn new(mem: Arc<Memory>, ports: Arc<Ports>, interrupts: Arc<Interrupts>) -> Arc<Self> {
        Arc::new(Cpu {
            inner: Mutex::new(Inner {
                reset: false,
                halt: false,
                intr_enabled: false,
                ip: 0,
                stopping: false,
            }),
            mem,
            ports,
            interrupts,
            table: instructions::table(),
            join: Mutex::new(None),
        })
    }

    /// Spawns the worker thread and queues a reset. The register file lives
    /// entirely on the worker thread; nothing outside it touches registers.
    /// Takes `&Arc<Cpu>` rather than `&self` since the worker thread needs
    /// its own owned handle to keep the CPU alive.
    pub fn begin(this: &Arc<Self>) {
        this.inner.lock().unwrap().reset = true;
        let cpu = this.clone();
        let handle = std::thread::spawn(move || {
            let mut regs = Registers::new();
            while cpu.step(&mut regs) {}
            cpu.inner.lock().unwrap().stopping = true;
        });
        *this.join.lock().unwrap() = Some(handle);
    }

    pub fn wait_end(&self) {
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn halting(&self) -> bool {
        self.inner.lock().unwrap().stopping
    }

    pub fn queue_reset(&self) {
        self.inner.lock().unwrap().reset = true;
    }

    pub fn queue_halt(&self) {
        log::info!("halt queued");
        self.inner.lock().unwrap().halt = true;
    }

    pub fn queue_jump(&self, addr: u32) {
        self.inner.lock().unwrap().ip = addr;
    }

    pub fn interrupt_set(&self, enabled: bool) {
        self.inner.lock().unwrap().intr_enabled = enabled;
    }

    fn flags_word(inner: &Inner) -> u32 {
        (inner.reset as u32) | ((inner.halt as u32) << 1) | ((inner.intr_enabled as u32) << 2)
    }

    /// One machine step. Returns `false` once the CPU should stop.
    fn step(&self, regs: &mut Registers) -> bool {
        let ip_for_dispatch;
        {
            let mut inner = self.inner.lock().unwrap();

            if inner.halt {
                return false;
            }

            if inner.reset {
                inner.reset = false;
                let vector = match self.mem.read_word(0) {
                    Ok(v) => v,
                    Err(_) => {
                        inner.reset = true;
                        return true;
                    }
                };
                // IVT[0] doubles as the reset vector, so it carries the same
                // 0/1 sentinels as every other IVT entry does during
                // interrupt dispatch below.
                if vector == 0 {
                    log::warn!("reset vector reads 0, re-arming reset");
                    inner.reset = true;
                    return true;
                }
                if vector == 1 {
                    log::info!("reset vector reads the halt sentinel, halting");
                    inner.halt = true;
                    return true;
                }
                log::info!("cpu reset, entry point {:#x}", vector);
                inner.ip = vector;
                regs.sp = GFX_MMAP_START;
                regs.bp = GFX_MMAP_START;
                inner.intr_enabled = true;
            }

            if inner.intr_enabled {
                let i = self.interrupts.which();
                if i != interrupts::NONE {
                    let next_ip = match self.mem.read_word((i * 4) as u32) {
                        Ok(v) => v,
                        Err(_) => {
                            inner.reset = true;
                            return true;
                        }
                    };
                    if next_ip == 0 {
                        inner.reset = true;
                        return true;
                    }
                    if next_ip == 1 {
                        log::info!("interrupt {} vector reads the halt sentinel, halting", i);
                        inner.halt = true;
                        return true;
                    }
                    let framed: Result<()> = (|| {
                        stack::enter_frame(regs, &self.mem)?;
                        stack::push(regs, &self.mem, inner.ip)?;
                        stack::push(regs, &self.mem, Self::flags_word(&inner))?;
                        stack::skip(regs, 16)?;
                        regs.write_all_mem(&self.mem, regs.sp)
                    })();
                    if framed.is_err() {
                        inner.reset = true;
                        return true;
                    }
                    inner.ip = next_ip;
                }
            }

            ip_for_dispatch = inner.ip;
        }

        let mut ip = ip_for_dispatch;
        let opcode = match self.mem.read_dbyte(ip) {
            Ok(v) => v as usize,
            Err(_) => {
                let _ = self.interrupts.raise(interrupts::INS);
                self.inner.lock().unwrap().ip = ip.wrapping_add(2);
                return true;
            }
        };
        ip = ip.wrapping_add(2);

        if opcode >= self.table.len() {
            let _ = self.interrupts.raise(interrupts::INS);
            self.inner.lock().unwrap().ip = ip;
            return true;
        }

        let entry = &self.table[opcode];
        let operands = self.mem.read_mem(ip, entry.extra as usize);
        ip = ip.wrapping_add(entry.extra as u32);

        let outcome = {
            let mut ctx = ExecContext {
                regs,
                mem: &self.mem,
                ports: &self.ports,
                ip: &mut ip,
                cpu: self,
            };
            (entry.handler)(&operands, &mut ctx)
        };
        if outcome.is_err() {
            let _ = self.interrupts.raise(interrupts::INS);
        }

        self.inner.lock().unwrap().ip = ip;
        true
    }
}

impl CpuControl for Cpu {
    fn queue_halt(&self) {
        Cpu::queue_halt(self)
    }

    fn set_interrupts_enabled(&self, enabled: bool) {
        Cpu::interrupt_set(self, enabled)
    }
}
