//! Single-port keyboard device: a 2048-deep ring buffer of scancodes with
//! oldest-drop overflow and a raise-on-press flag. Grounded on
//! `examples/original_source/kbd.h`.

use crate::error::Result;
use crate::interrupts::{Interrupts, KBD};
use crate::ports::{PortEntry, Ports};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const RING_DEPTH: usize = 2048;

struct State {
    ring: Mutex<VecDeque<u32>>,
    raise_on_press: AtomicBool,
}

pub struct Keyboard {
    state: Arc<State>,
    port: usize,
}

impl Keyboard {
    pub fn install(ports: &Ports) -> Result<Self> {
        let state = Arc::new(State {
            ring: Mutex::new(VecDeque::with_capacity(RING_DEPTH)),
            raise_on_press: AtomicBool::new(false),
        });
        let writer_state = state.clone();
        let reader_state = state.clone();
        let port = ports.install(PortEntry {
            ident: "keyboard".to_string(),
            writer: Some(Arc::new(move |_id, w| {
                writer_state.raise_on_press.store(w != 0, Ordering::SeqCst);
            })),
            reader: Some(Arc::new(move |_id| reader_state.ring.lock().unwrap().pop_front().unwrap_or(0))),
        })?;
        Ok(Keyboard { state, port })
    }

    pub fn remove(&self, ports: &Ports) -> Result<()> {
        ports.remove(self.port)
    }

    /// Pushes a scancode onto the ring, dropping the oldest entry if full,
    /// and raises `INTR_KBD` if the flag is set.
    pub fn enqueue(&self, scancode: u32, interrupts: &Interrupts) -> Result<()> {
        {
            let mut ring = self.state.ring.lock().unwrap();
            if ring.len() == RING_DEPTH {
                ring.pop_front();
            }
            ring.push_back(scancode);
        }
        if self.state.raise_on_press.load(Ordering::SeqCst) {
            interrupts.raise(KBD)?;
        }
        Ok(())
    }

    pub fn port(&self) -> usize {
        self.port
    }
}
