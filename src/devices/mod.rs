//! Devices that claim ports and/or memory blocks: graphics, disk, keyboard,
//! text I/O, and the system port. Each module owns its own port/memory
//! lifecycle; `crate::machine::Machine` composes them and tears them down
//! in reverse install order.

pub mod disk;
pub mod graphics;
pub mod keyboard;
pub mod sysp;
pub mod textio;
