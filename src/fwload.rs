//! Firmware loading: read a whole file into guest memory at a given
//! address. Grounded on `examples/original_source/fwload.c`.

use crate::error::{MachineError, Result};
use crate::memory::Memory;
use std::fs;

pub fn firmware_load(mem: &Memory, loc: u32, filename: &str) -> Result<()> {
    let bytes = fs::read(filename).map_err(|_| MachineError::File)?;
    mem.write_mem(loc, &bytes);
    Ok(())
}
