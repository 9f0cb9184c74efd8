//! The fixed opcode table: each entry is a handler plus the number of
//! operand bytes following the 2-byte opcode. Grounded on the distilled
//! instruction set; the table shape (handler + extra-byte count, dispatched
//! by a flat array indexed by opcode) follows the teacher's decoder design.

use crate::error::{MachineError, Result};
use crate::memory::Memory;
use crate::ports::Ports;
use crate::registers::{Registers, NUM_REGISTERS};

/// Lets an instruction handler reach back into CPU control without the
/// instruction table depending on the CPU's internal mutex layout.
pub trait CpuControl {
    fn queue_halt(&self);
    fn set_interrupts_enabled(&self, enabled: bool);
}

pub struct ExecContext<'a> {
    pub regs: &'a mut Registers,
    pub mem: &'a Memory,
    pub ports: &'a Ports,
    pub ip: &'a mut u32,
    pub cpu: &'a dyn CpuControl,
}

type Handler = fn(&[u8], &mut ExecContext) -> Result<()>;

pub struct InstructionEntry {
    pub handler: Handler,
    pub extra: u16,
}

fn reg_id(b: u8) -> Result<usize> {
    let id = b as usize;
    if id >= NUM_REGISTERS {
        Err(MachineError::Invalid)
    } else {
        Ok(id)
    }
}

fn nop(_operands: &[u8], _ctx: &mut ExecContext) -> Result<()> {
    Ok(())
}

fn hlt(_operands: &[u8], ctx: &mut ExecContext) -> Result<()> {
    ctx.cpu.queue_halt();
    Ok(())
}

fn jmpc(operands: &[u8], ctx: &mut ExecContext) -> Result<()> {
    *ctx.ip = u32::from_le_bytes(operands[0..4].try_into().unwrap());
    Ok(())
}

fn movrc(operands: &[u8], ctx: &mut ExecContext) -> Result<()> {
    let reg = reg_id(operands[0])?;
    let imm = u32::from_le_bytes(operands[1..5].try_into().unwrap());
    ctx.regs.write_word(reg, imm)
}

fn movpcr(operands: &[u8], ctx: &mut ExecContext) -> Result<()> {
    let addr = u32::from_le_bytes(operands[0..4].try_into().unwrap());
    let reg = reg_id(operands[4])?;
    let val = ctx.regs.word(reg)?;
    ctx.mem.write_word(addr, val)
}

fn addrc(operands: &[u8], ctx: &mut ExecContext) -> Result<()> {
    let reg = reg_id(operands[0])?;
    let imm = u32::from_le_bytes(operands[2..6].try_into().unwrap());
    let cur = ctx.regs.word(reg)?;
    ctx.regs.write_word(reg, cur.wrapping_add(imm))
}

fn movprr(operands: &[u8], ctx: &mut ExecContext) -> Result<()> {
    let dst = reg_id(operands[0])?;
    let src = reg_id(operands[1])?;
    let addr = ctx.regs.word(dst)?;
    let val = ctx.regs.word(src)?;
    ctx.mem.write_word(addr, val)
}

fn outscr(operands: &[u8], ctx: &mut ExecContext) -> Result<()> {
    let port = u16::from_le_bytes(operands[0..2].try_into().unwrap()) as usize;
    let reg = reg_id(operands[2])?;
    let val = ctx.regs.word(reg)?;
    ctx.ports.write(port, val)
}

fn inxrsc(operands: &[u8], ctx: &mut ExecContext) -> Result<()> {
    let reg = reg_id(operands[0])?;
    let port = u16::from_le_bytes(operands[2..4].try_into().unwrap()) as usize;
    let val = ctx.ports.read(port)?;
    ctx.regs.write_word(reg, val)
}

fn cli(_operands: &[u8], ctx: &mut ExecContext) -> Result<()> {
    ctx.cpu.set_interrupts_enabled(false);
    Ok(())
}

fn sti(_operands: &[u8], ctx: &mut ExecContext) -> Result<()> {
    ctx.cpu.set_interrupts_enabled(true);
    Ok(())
}

pub const NOP: usize = 0;
pub const HLT: usize = 1;
pub const JMPC: usize = 2;
pub const MOVRC: usize = 3;
pub const MOVPCR: usize = 4;
pub const ADDRC: usize = 5;
pub const MOVPRR: usize = 6;
pub const OUTSCR: usize = 7;
pub const INXRSC: usize = 8;
pub const CLI: usize = 9;
pub const STI: usize = 10;
pub const NUM_OPCODES: usize = 11;

pub fn table() -> Vec<InstructionEntry> {
    vec![
        InstructionEntry { handler: nop, extra: 0 },
        InstructionEntry { handler: hlt, extra: 0 },
        InstructionEntry { handler: jmpc, extra: 4 },
        InstructionEntry { handler: movrc, extra: 5 },
        InstructionEntry { handler: movpcr, extra: 6 },
        InstructionEntry { handler: addrc, extra: 6 },
        InstructionEntry { handler: movprr, extra: 2 },
        InstructionEntry { handler: outscr, extra: 4 },
        InstructionEntry { handler: inxrsc, extra: 4 },
        InstructionEntry { handler: cli, extra: 0 },
        InstructionEntry { handler: sti, extra: 0 },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestControl {
        halted: AtomicBool,
        enabled: AtomicBool,
    }

    impl CpuControl for TestControl {
        fn queue_halt(&self) {
            self.halted.store(true, Ordering::SeqCst);
        }
        fn set_interrupts_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }
    }

    fn control() -> TestControl {
        TestControl { halted: AtomicBool::new(false), enabled: AtomicBool::new(true) }
    }

    #[test]
    fn movrc_then_addrc() {
        let mem = Memory::new();
        let ports = Ports::new();
        let mut regs = Registers::new();
        let ctl = control();
        let mut ip = 0u32;
        {
            let mut ctx = ExecContext { regs: &mut regs, mem: &mem, ports: &ports, ip: &mut ip, cpu: &ctl };
            movrc(&[0, 10, 0, 0, 0], &mut ctx).unwrap();
        }
        assert_eq!(regs.word(0).unwrap(), 10);
        {
            let mut ctx = ExecContext { regs: &mut regs, mem: &mem, ports: &ports, ip: &mut ip, cpu: &ctl };
            addrc(&[0, 0, 5, 0, 0, 0], &mut ctx).unwrap();
        }
        assert_eq!(regs.word(0).unwrap(), 15);
    }

    #[test]
    fn jmpc_sets_ip() {
        let mem = Memory::new();
        let ports = Ports::new();
        let mut regs = Registers::new();
        let ctl = control();
        let mut ip = 0u32;
        let mut ctx = ExecContext { regs: &mut regs, mem: &mem, ports: &ports, ip: &mut ip, cpu: &ctl };
        jmpc(&[0x00, 0x01, 0x00, 0x00], &mut ctx).unwrap();
        assert_eq!(*ctx.ip, 0x100);
    }

    #[test]
    fn hlt_calls_queue_halt() {
        let mem = Memory::new();
        let ports = Ports::new();
        let mut regs = Registers::new();
        let ctl = control();
        let mut ip = 0u32;
        let mut ctx = ExecContext { regs: &mut regs, mem: &mem, ports: &ports, ip: &mut ip, cpu: &ctl };
        hlt(&[], &mut ctx).unwrap();
        assert!(ctl.halted.load(Ordering::SeqCst));
    }

    #[test]
    fn cli_sti_toggle_flag() {
        let mem = Memory::new();
        let ports = Ports::new();
        let mut regs = Registers::new();
        let ctl = control();
        let mut ip = 0u32;
        let mut ctx = ExecContext { regs: &mut regs, mem: &mem, ports: &ports, ip: &mut ip, cpu: &ctl };
        cli(&[], &mut ctx).unwrap();
        assert!(!ctl.enabled.load(Ordering::SeqCst));
        sti(&[], &mut ctx).unwrap();
        assert!(ctl.enabled.load(Ordering::SeqCst));
    }

    #[test]
    fn invalid_register_index_is_invalid() {
        let mem = Memory::new();
        let ports = Ports::new();
        let mut regs = Registers::new();
        let ctl = control();
        let mut ip = 0u32;
        let mut ctx = ExecContext { regs: &mut regs, mem: &mem, ports: &ports, ip: &mut ip, cpu: &ctl };
        assert_eq!(movrc(&[99, 0, 0, 0, 0], &mut ctx), Err(MachineError::Invalid));
    }

    #[test]
    fn outscr_inxrsc_roundtrip_through_port() {
        use crate::ports::PortEntry;
        use std::sync::atomic::AtomicU32;
        use std::sync::Arc;

        let mem = Memory::new();
        let ports = Ports::new();
        let stash = Arc::new(AtomicU32::new(0));
        let stash_w = stash.clone();
        let port = ports
            .install(PortEntry {
                ident: "test".to_string(),
                writer: Some(Arc::new(move |_id, w| stash_w.store(w, Ordering::SeqCst))),
                reader: Some(Arc::new(move |_id| stash.load(Ordering::SeqCst))),
            })
            .unwrap();

        let mut regs = Registers::new();
        regs.write_word(1, 0xCAFE).unwrap();
        let ctl = control();
        let mut ip = 0u32;
        let port_bytes = (port as u16).to_le_bytes();
        {
            let mut ctx = ExecContext { regs: &mut regs, mem: &mem, ports: &ports, ip: &mut ip, cpu: &ctl };
            outscr(&[port_bytes[0], port_bytes[1], 1, 0], &mut ctx).unwrap();
        }
        {
            let mut ctx = ExecContext { regs: &mut regs, mem: &mem, ports: &ports, ip: &mut ip, cpu: &ctl };
            inxrsc(&[2, 0, port_bytes[0], port_bytes[1]], &mut ctx).unwrap();
        }
        assert_eq!(regs.word(2).unwrap(), 0xCAFE);
    }
}
