//! The 4096-slot port registry: numbered endpoints, each an optional
//! writer/reader callback pair keyed by port id. Grounded on
//! `examples/original_source/port.c`'s hint-accelerated lowest-free scan.

use crate::error::{MachineError, Result};
use std::sync::{Arc, Mutex};

pub const NUM_PORTS: usize = 4096;

pub type Writer = Arc<dyn Fn(usize, u32) + Send + Sync>;
pub type Reader = Arc<dyn Fn(usize) -> u32 + Send + Sync>;

pub struct PortEntry {
    pub ident: String,
    pub writer: Option<Writer>,
    pub reader: Option<Reader>,
}

struct Inner {
    slots: Vec<Option<PortEntry>>,
    hint: usize,
}

pub struct Ports {
    inner: Mutex<Inner>,
}

impl Ports {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(NUM_PORTS);
        slots.resize_with(NUM_PORTS, || None);
        Ports { inner: Mutex::new(Inner { slots, hint: 0 }) }
    }

    /// Installs a binding at the lowest free slot. Fails `Precondition` if
    /// every slot is bound.
    pub fn install(&self, entry: PortEntry) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let id = (0..NUM_PORTS)
            .map(|offset| (inner.hint + offset) % NUM_PORTS)
            .find(|&id| inner.slots[id].is_none())
            .ok_or(MachineError::Precondition)?;
        inner.slots[id] = Some(entry);
        inner.hint = (id + 1) % NUM_PORTS;
        Ok(id)
    }

    pub fn remove(&self, id: usize) -> Result<()> {
        if id >= NUM_PORTS {
            return Err(MachineError::Invalid);
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.slots[id].is_none() {
            return Err(MachineError::Precondition);
        }
        inner.slots[id] = None;
        if id < inner.hint {
            inner.hint = id;
        }
        Ok(())
    }

    /// Writes to the port's writer, if any; silently discarded if the port
    /// has no writer installed. The registry lock is released before the
    /// callback runs, so a callback may itself call back into `Ports`
    /// (e.g. the system port reading another port's `ident`).
    pub fn write(&self, id: usize, word: u32) -> Result<()> {
        if id >= NUM_PORTS {
            return Err(MachineError::Invalid);
        }
        let writer = {
            let inner = self.inner.lock().unwrap();
            let entry = inner.slots[id].as_ref().ok_or(MachineError::Precondition)?;
            entry.writer.clone()
        };
        if let Some(writer) = writer {
            writer(id, word);
        }
        Ok(())
    }

    /// Reads from the port's reader, if any; returns 0 if the port has no
    /// reader installed.
    pub fn read(&self, id: usize) -> Result<u32> {
        if id >= NUM_PORTS {
            return Err(MachineError::Invalid);
        }
        let reader = {
            let inner = self.inner.lock().unwrap();
            let entry = inner.slots[id].as_ref().ok_or(MachineError::Precondition)?;
            entry.reader.clone()
        };
        Ok(match reader {
            Some(reader) => reader(id),
            None => 0,
        })
    }

    pub fn ident(&self, id: usize) -> Option<String> {
        if id >= NUM_PORTS {
            return None;
        }
        let inner = self.inner.lock().unwrap();
        inner.slots[id].as_ref().map(|e| e.ident.clone())
    }
}

impl Default for Ports {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn dummy_entry(ident: &str) -> PortEntry {
        PortEntry { ident: ident.to_string(), writer: None, reader: None }
    }

    #[test]
    fn first_install_returns_zero() {
        let ports = Ports::new();
        assert_eq!(ports.install(dummy_entry("a")).unwrap(), 0);
    }

    #[test]
    fn lowest_free_allocation_reuses_freed_slot() {
        let ports = Ports::new();
        assert_eq!(ports.install(dummy_entry("a")).unwrap(), 0);
        assert_eq!(ports.install(dummy_entry("b")).unwrap(), 1);
        assert_eq!(ports.install(dummy_entry("c")).unwrap(), 2);
        ports.remove(1).unwrap();
        assert_eq!(ports.install(dummy_entry("d")).unwrap(), 1);
    }

    #[test]
    fn remove_twice_fails_precondition() {
        let ports = Ports::new();
        let id = ports.install(dummy_entry("a")).unwrap();
        ports.remove(id).unwrap();
        assert_eq!(ports.remove(id), Err(MachineError::Precondition));
    }

    #[test]
    fn write_without_writer_is_silently_discarded() {
        let ports = Ports::new();
        let id = ports.install(dummy_entry("a")).unwrap();
        assert_eq!(ports.write(id, 42), Ok(()));
    }

    #[test]
    fn read_without_reader_returns_zero() {
        let ports = Ports::new();
        let id = ports.install(dummy_entry("a")).unwrap();
        assert_eq!(ports.read(id), Ok(0));
    }

    #[test]
    fn write_invokes_writer_with_port_id() {
        let ports = Ports::new();
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        let entry = PortEntry {
            ident: "w".to_string(),
            writer: Some(Arc::new(move |_id, w| seen2.store(w, Ordering::SeqCst))),
            reader: None,
        };
        let id = ports.install(entry).unwrap();
        ports.write(id, 0x55).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0x55);
    }
}
