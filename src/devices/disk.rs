//! File-backed disk windows: up to `DISK_MAX_DISKS` disks, each mapping a
//! 1 MiB window of a host file into guest memory behind a cmd/data port
//! pair. Grounded on `examples/original_source/disk.c`/`disk.h`; partial
//! `install` failure unwinds file, buffer, mapping and ports in reverse
//! order, mirroring the original's bind/unbind discipline.

use crate::error::{MachineError, Result};
use crate::memory::{BlockBuf, Memory, BLOCK_SIZE};
use crate::ports::{PortEntry, Ports};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

pub const MAX_DISKS: usize = 256;
pub const MMAP_START: u32 = 0xF000_0000;

const DA_NONE: u32 = 0;
const DA_NUM: u32 = 1;
const DA_SEEK: u32 = 2;
const DA_SYNC: u32 = 3;
const DA_ADDR: u32 = 4;
const DA_BUFSZ: u32 = 5;

const DS_OK: u32 = 0;
const DS_WAIT: u32 = 1;
const DS_ERROR: u32 = 2;

pub fn addr_for(id: u16) -> u32 {
    MMAP_START + (id as u32) * BLOCK_SIZE as u32
}

struct State {
    id: u16,
    file: Mutex<File>,
    buf: BlockBuf,
    off: Mutex<u64>,
    action: Mutex<u32>,
    status: Mutex<u32>,
}

impl State {
    fn read_block_at(&self, off: u64) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        let len = file.metadata().map_err(|_| MachineError::Extern)?.len();
        if len.saturating_sub(off) < BLOCK_SIZE as u64 {
            return Err(MachineError::Extern);
        }
        file.seek(SeekFrom::Start(off)).map_err(|_| MachineError::File)?;
        let mut buf = self.buf.lock().unwrap();
        file.read_exact(&mut buf).map_err(|_| MachineError::File)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        let off = *self.off.lock().unwrap();
        file.seek(SeekFrom::Start(off)).map_err(|_| MachineError::File)?;
        let buf = self.buf.lock().unwrap();
        file.write_all(&buf).map_err(|_| MachineError::File)?;
        Ok(())
    }
}

pub struct Disk {
    state: Arc<State>,
    cmd_port: usize,
    data_port: usize,
}

impl Disk {
    pub fn install(filename: &str, id: u16, ports: &Ports, mem: &Memory) -> Result<Self> {
        let mut file =
            OpenOptions::new().read(true).write(true).open(filename).map_err(|_| MachineError::File)?;
        let len = file.metadata().map_err(|_| MachineError::Extern)?.len();
        if len < BLOCK_SIZE as u64 {
            return Err(MachineError::Extern);
        }

        let mut initial = vec![0u8; BLOCK_SIZE];
        file.seek(SeekFrom::Start(0)).map_err(|_| MachineError::File)?;
        file.read_exact(&mut initial).map_err(|_| MachineError::File)?;
        let buf: BlockBuf = Arc::new(Mutex::new(initial.into_boxed_slice()));

        let addr = addr_for(id);
        mem.map_device(addr, buf.clone()).map_err(|e| {
            // file and buf drop here; nothing else to unwind yet.
            e
        })?;

        let state = Arc::new(State {
            id,
            file: Mutex::new(file),
            buf,
            off: Mutex::new(0),
            action: Mutex::new(DA_NONE),
            status: Mutex::new(DS_OK),
        });

        let cmd_writer_state = state.clone();
        let cmd_reader_state = state.clone();
        let cmd_port = match ports.install(PortEntry {
            ident: format!("disk{}.cmd", id),
            writer: Some(Arc::new(move |_id, word| {
                *cmd_writer_state.action.lock().unwrap() = word;
                *cmd_writer_state.status.lock().unwrap() =
                    if word == DA_NONE { DS_OK } else { DS_WAIT };
            })),
            reader: Some(Arc::new(move |_id| *cmd_reader_state.status.lock().unwrap())),
        }) {
            Ok(p) => p,
            Err(e) => {
                let _ = mem.unmap_device(addr);
                return Err(e);
            }
        };

        let data_writer_state = state.clone();
        let data_reader_state = state.clone();
        let data_port = match ports.install(PortEntry {
            ident: format!("disk{}.data", id),
            writer: Some(Arc::new(move |_id, word| {
                let action = *data_writer_state.action.lock().unwrap();
                let status = match action {
                    DA_SEEK => {
                        let new_off = word as u64;
                        match data_writer_state.read_block_at(new_off) {
                            Ok(()) => {
                                *data_writer_state.off.lock().unwrap() = new_off;
                                DS_OK
                            }
                            Err(_) => DS_ERROR,
                        }
                    }
                    DA_SYNC => {
                        if data_writer_state.sync().is_ok() {
                            DS_OK
                        } else {
                            DS_ERROR
                        }
                    }
                    _ => DS_ERROR,
                };
                *data_writer_state.status.lock().unwrap() = status;
            })),
            reader: Some(Arc::new(move |_id| {
                let action = *data_reader_state.action.lock().unwrap();
                let (status, value) = match action {
                    DA_NUM => (DS_OK, data_reader_state.id as u32),
                    DA_SEEK => (DS_OK, *data_reader_state.off.lock().unwrap() as u32),
                    DA_ADDR => (DS_OK, addr_for(data_reader_state.id)),
                    DA_BUFSZ => (DS_OK, BLOCK_SIZE as u32),
                    _ => (DS_ERROR, 0),
                };
                *data_reader_state.status.lock().unwrap() = status;
                value
            })),
        }) {
            Ok(p) => p,
            Err(e) => {
                let _ = ports.remove(cmd_port);
                let _ = mem.unmap_device(addr);
                return Err(e);
            }
        };

        Ok(Disk { state, cmd_port, data_port })
    }

    /// Syncs the buffer back to the file, then unbinds, freeing ports and memory.
    pub fn remove(&self, ports: &Ports, mem: &Memory) -> Result<()> {
        let sync_result = self.state.sync();
        ports.remove(self.data_port)?;
        ports.remove(self.cmd_port)?;
        mem.unmap_device(addr_for(self.state.id))?;
        sync_result.map_err(|_| MachineError::File)
    }

    pub fn cmd_port(&self) -> usize {
        self.cmd_port
    }

    pub fn data_port(&self) -> usize {
        self.data_port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn make_backing_file(fill: u8) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![fill; BLOCK_SIZE]).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn install_maps_first_block_into_guest_memory() {
        let file = make_backing_file(0xAB);
        let mem = Memory::new();
        let ports = Ports::new();
        let disk = Disk::install(file.path().to_str().unwrap(), 0, &ports, &mem).unwrap();
        let addr = addr_for(0);
        assert_eq!(mem.read_byte(addr), 0xAB);
        assert_eq!(mem.read_byte(addr + BLOCK_SIZE as u32 - 1), 0xAB);
        disk.remove(&ports, &mem).unwrap();
    }

    #[test]
    fn install_rejects_undersized_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0u8; 16]).unwrap();
        let mem = Memory::new();
        let ports = Ports::new();
        assert_eq!(
            Disk::install(f.path().to_str().unwrap(), 0, &ports, &mem).unwrap_err(),
            MachineError::Extern
        );
    }

    #[test]
    fn num_and_bufsz_ports_report_identity() {
        let file = make_backing_file(0);
        let mem = Memory::new();
        let ports = Ports::new();
        let disk = Disk::install(file.path().to_str().unwrap(), 3, &ports, &mem).unwrap();
        ports.write(disk.cmd_port(), DA_NUM).unwrap();
        assert_eq!(ports.read(disk.data_port()).unwrap(), 3);
        ports.write(disk.cmd_port(), DA_BUFSZ).unwrap();
        assert_eq!(ports.read(disk.data_port()).unwrap(), BLOCK_SIZE as u32);
        disk.remove(&ports, &mem).unwrap();
    }

    #[test]
    fn remove_then_reinstall_reuses_disk_id_slot() {
        let file = make_backing_file(1);
        let mem = Memory::new();
        let ports = Ports::new();
        let disk = Disk::install(file.path().to_str().unwrap(), 0, &ports, &mem).unwrap();
        disk.remove(&ports, &mem).unwrap();
        let disk2 = Disk::install(file.path().to_str().unwrap(), 0, &ports, &mem).unwrap();
        assert_eq!(mem.read_byte(addr_for(0)), 1);
        disk2.remove(&ports, &mem).unwrap();
    }
}
