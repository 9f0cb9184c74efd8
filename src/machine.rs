//! Top-level composition: owns memory, the port/interrupt registries, every
//! installed device, and the CPU. `Machine::new` wires everything together
//! and loads firmware; `Machine::run` spawns the CPU worker and drives the
//! host-side graphics loop until the CPU halts. Grounded on the teacher's
//! `atari.rs` top-level struct, generalized to the reset/interrupt/device
//! model this machine actually has. Install order (system, textio, disks,
//! graphics, keyboard) and the 640x480 default window size both come
//! straight from `examples/original_source/main.c`; `Drop` unwinds in the
//! reverse of that order, per the design note that `Machine::drop` tears
//! down devices in reverse install order.

use crate::cpu::Cpu;
use crate::devices::disk::Disk;
use crate::devices::graphics::Graphics;
use crate::devices::keyboard::Keyboard;
use crate::devices::sysp::System;
use crate::devices::textio::TextIo;
use crate::error::{die_on, Result};
use crate::fwload;
use crate::interrupts::Interrupts;
use crate::memory::Memory;
use crate::ports::Ports;
use std::sync::Arc;

const DEFAULT_WIDTH: usize = 640;
const DEFAULT_HEIGHT: usize = 480;

pub struct Machine {
    mem: Arc<Memory>,
    ports: Arc<Ports>,
    interrupts: Arc<Interrupts>,
    cpu: Arc<Cpu>,
    system: System,
    textio: TextIo,
    disks: Vec<Disk>,
    graphics: Graphics,
    keyboard: Keyboard,
}

impl Machine {
    pub fn new(firmware_path: &str, disk_paths: &[String]) -> Result<Self> {
        let mem = Arc::new(Memory::new());
        let ports = Arc::new(Ports::new());
        let interrupts = Arc::new(Interrupts::new());

        fwload::firmware_load(&mem, 0, firmware_path)?;
        log::info!("firmware loaded from {}", firmware_path);

        let system = System::install(ports.clone())?;
        log::info!("system port installed");
        let textio = match TextIo::install(&ports) {
            Ok(t) => {
                log::info!("textio port installed");
                t
            }
            Err(e) => {
                let _ = system.remove(&ports);
                return Err(e);
            }
        };

        let mut disks = Vec::with_capacity(disk_paths.len());
        for (id, path) in disk_paths.iter().enumerate() {
            match Disk::install(path, id as u16, &ports, &mem) {
                Ok(disk) => {
                    log::info!("disk {} installed from {}", id, path);
                    disks.push(disk)
                }
                Err(e) => {
                    for d in disks.iter().rev() {
                        let _ = d.remove(&ports, &mem);
                    }
                    let _ = textio.remove(&ports);
                    let _ = system.remove(&ports);
                    return Err(e);
                }
            }
        }

        let graphics = match Graphics::install(&ports, &mem, DEFAULT_WIDTH, DEFAULT_HEIGHT) {
            Ok(g) => {
                log::info!("graphics installed at {}x{}", DEFAULT_WIDTH, DEFAULT_HEIGHT);
                g
            }
            Err(e) => {
                for d in disks.iter().rev() {
                    let _ = d.remove(&ports, &mem);
                }
                let _ = textio.remove(&ports);
                let _ = system.remove(&ports);
                return Err(e);
            }
        };

        let keyboard = match Keyboard::install(&ports) {
            Ok(k) => {
                log::info!("keyboard installed");
                k
            }
            Err(e) => {
                let _ = graphics.remove(&ports, &mem);
                for d in disks.iter().rev() {
                    let _ = d.remove(&ports, &mem);
                }
                let _ = textio.remove(&ports);
                let _ = system.remove(&ports);
                return Err(e);
            }
        };

        let cpu = Cpu::new(mem.clone(), ports.clone(), interrupts.clone());

        Ok(Machine { mem, ports, interrupts, cpu, system, textio, disks, graphics, keyboard })
    }

    /// Spawns the CPU worker and drives the host-side frame loop until the
    /// CPU observes halt. Must run on the thread that owns the window.
    pub fn run(&mut self) {
        Cpu::begin(&self.cpu);
        while !self.cpu.halting() {
            die_on(self.graphics.step(&self.keyboard, &self.interrupts));
            die_on(self.graphics.render());
        }
        self.cpu.wait_end();
    }

    pub fn dump(&self) -> Result<()> {
        self.mem.dump()
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        if let Err(e) = self.keyboard.remove(&self.ports) {
            log::warn!("keyboard teardown failed: {}", e);
        }
        if let Err(e) = self.graphics.remove(&self.ports, &self.mem) {
            log::warn!("graphics teardown failed: {}", e);
        }
        for d in self.disks.iter().rev() {
            if let Err(e) = d.remove(&self.ports, &self.mem) {
                log::warn!("disk teardown failed: {}", e);
            }
        }
        if let Err(e) = self.textio.remove(&self.ports) {
            log::warn!("textio teardown failed: {}", e);
        }
        if let Err(e) = self.system.remove(&self.ports) {
            log::warn!("system teardown failed: {}", e);
        }
    }
}
