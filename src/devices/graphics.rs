//! The graphics device: an 8 MiB ABGR8888 framebuffer mapped into guest
//! memory, a `minifb` window on the host thread, and a cmd/data port pair
//! for querying the base address/size and changing resolution. Grounded
//! on `examples/original_source/graphics.h` for the port contract and the
//! teacher's `devices.rs::Monitor` for the `minifb` usage pattern.

use crate::devices::keyboard::Keyboard;
use crate::error::{MachineError, Result};
use crate::interrupts::{Interrupts, HALT};
use crate::memory::{BlockBuf, Memory, BLOCK_SIZE};
use crate::ports::{PortEntry, Ports};
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use std::sync::{Arc, Mutex};

pub const GFX_MEM_MAX: usize = 8 * BLOCK_SIZE;
pub const DISK_MMAP_START: u32 = super::disk::MMAP_START;
pub const GFX_MMAP_START: u32 = DISK_MMAP_START - GFX_MEM_MAX as u32;

const GA_NONE: u32 = 0;
const GA_ADDR: u32 = 1;
const GA_BUFSZ: u32 = 2;
const GA_RES: u32 = 3;

struct Shared {
    action: u32,
    width: usize,
    height: usize,
    pending_resize: Option<(usize, usize)>,
}

pub struct Graphics {
    window: Window,
    // GFX_MEM_MAX spans 8 contiguous 1 MiB blocks; each gets its own buffer,
    // since every memory block is independently sized to BLOCK_SIZE.
    framebuffer: Vec<BlockBuf>,
    shared: Arc<Mutex<Shared>>,
    cmd_port: usize,
    data_port: usize,
}

impl Graphics {
    pub fn install(ports: &Ports, mem: &Memory, width: usize, height: usize) -> Result<Self> {
        if width * height * 4 >= GFX_MEM_MAX {
            return Err(MachineError::Invalid);
        }
        let window = Window::new("machine", width, height, WindowOptions::default())
            .map_err(|_| MachineError::Extern)?;

        let num_blocks = GFX_MEM_MAX / BLOCK_SIZE;
        let mut framebuffer = Vec::with_capacity(num_blocks);
        for i in 0..num_blocks {
            let block: BlockBuf = Arc::new(Mutex::new(vec![0u8; BLOCK_SIZE].into_boxed_slice()));
            if let Err(e) = mem.map_device(GFX_MMAP_START + (i * BLOCK_SIZE) as u32, block.clone()) {
                for (j, _) in framebuffer.iter().enumerate() {
                    let _ = mem.unmap_device(GFX_MMAP_START + (j * BLOCK_SIZE) as u32);
                }
                return Err(e);
            }
            framebuffer.push(block);
        }

        let shared = Arc::new(Mutex::new(Shared { action: GA_NONE, width, height, pending_resize: None }));

        let cmd_writer_shared = shared.clone();
        let cmd_port = ports.install(PortEntry {
            ident: "graphics.cmd".to_string(),
            writer: Some(Arc::new(move |_id, word| {
                cmd_writer_shared.lock().unwrap().action = word;
            })),
            reader: None,
        })?;

        let data_reader_shared = shared.clone();
        let data_writer_shared = shared.clone();
        let data_port = match ports.install(PortEntry {
            ident: "graphics.data".to_string(),
            writer: Some(Arc::new(move |_id, word| {
                let mut s = data_writer_shared.lock().unwrap();
                if s.action == GA_RES {
                    s.pending_resize = Some(((word & 0xFFFF) as usize, (word >> 16) as usize));
                }
            })),
            reader: Some(Arc::new(move |_id| {
                let s = data_reader_shared.lock().unwrap();
                match s.action {
                    GA_ADDR => GFX_MMAP_START,
                    GA_BUFSZ => GFX_MEM_MAX as u32,
                    GA_RES => (s.width as u32) | ((s.height as u32) << 16),
                    _ => 0,
                }
            })),
        }) {
            Ok(p) => p,
            Err(e) => {
                let _ = ports.remove(cmd_port);
                for i in 0..(GFX_MEM_MAX / BLOCK_SIZE) {
                    let _ = mem.unmap_device(GFX_MMAP_START + (i * BLOCK_SIZE) as u32);
                }
                return Err(e);
            }
        };

        Ok(Graphics { window, framebuffer, shared, cmd_port, data_port })
    }

    pub fn remove(&self, ports: &Ports, mem: &Memory) -> Result<()> {
        ports.remove(self.data_port)?;
        ports.remove(self.cmd_port)?;
        for i in 0..(GFX_MEM_MAX / BLOCK_SIZE) {
            mem.unmap_device(GFX_MMAP_START + (i * BLOCK_SIZE) as u32)?;
        }
        Ok(())
    }

    /// Pumps window events on the host thread: raises HALT on close/escape,
    /// forwards key-down events to the keyboard queue, and applies any
    /// resolution change requested through the data port.
    pub fn step(&mut self, keyboard: &Keyboard, interrupts: &Interrupts) -> Result<()> {
        self.window.update();
        if !self.window.is_open() || self.window.is_key_down(Key::Escape) {
            interrupts.raise(HALT)?;
        }
        for key in self.window.get_keys_pressed(KeyRepeat::No) {
            let scancode = (key as u32) & 0xFFFF;
            keyboard.enqueue(scancode, interrupts)?;
        }

        let resize = self.shared.lock().unwrap().pending_resize.take();
        if let Some((w, h)) = resize {
            if w > 0 && h > 0 && w * h * 4 < GFX_MEM_MAX {
                if let Ok(new_window) = Window::new("machine", w, h, WindowOptions::default()) {
                    self.window = new_window;
                    let mut s = self.shared.lock().unwrap();
                    s.width = w;
                    s.height = h;
                }
            }
        }
        Ok(())
    }

    /// Blits the framebuffer (ABGR, little-endian) to the window, converting
    /// to the host-endian 0x00RRGGBB words `minifb` expects.
    pub fn render(&mut self) -> Result<()> {
        let (width, height) = {
            let s = self.shared.lock().unwrap();
            (s.width, s.height)
        };
        let mut pixels = Vec::with_capacity(width * height);
        for i in 0..width * height {
            let byte_off = i * 4;
            let block = self.framebuffer[byte_off / BLOCK_SIZE].lock().unwrap();
            let off = byte_off % BLOCK_SIZE;
            let (a, b, g, r) = (block[off], block[off + 1], block[off + 2], block[off + 3]);
            let _ = a;
            pixels.push(((r as u32) << 16) | ((g as u32) << 8) | b as u32);
        }
        self.window
            .update_with_buffer(&pixels, width, height)
            .map_err(|_| MachineError::Extern)
    }
}
