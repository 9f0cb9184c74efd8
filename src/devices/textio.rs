//! Single-port stdin/stdout passthrough. Grounded on the original source's
//! textio device contract (write = stdout byte, read = one stdin byte or 0 on EOF).

use crate::error::Result;
use crate::ports::{PortEntry, Ports};
use std::io::{Read, Write};
use std::sync::Arc;

pub struct TextIo {
    port: usize,
}

impl TextIo {
    pub fn install(ports: &Ports) -> Result<Self> {
        let port = ports.install(PortEntry {
            ident: "textio".to_string(),
            writer: Some(Arc::new(|_id, w| {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(&[w as u8]);
                let _ = stdout.flush();
            })),
            reader: Some(Arc::new(|_id| {
                let mut byte = [0u8; 1];
                match std::io::stdin().read(&mut byte) {
                    Ok(1) => byte[0] as u32,
                    _ => 0,
                }
            })),
        })?;
        Ok(TextIo { port })
    }

    pub fn remove(&self, ports: &Ports) -> Result<()> {
        ports.remove(self.port)
    }

    pub fn port(&self) -> usize {
        self.port
    }
}
