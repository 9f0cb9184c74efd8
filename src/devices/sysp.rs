//! The system port: a three-state command/data protocol on a single port,
//! plus `PortInfo`'s byte-at-a-time ident streaming. Grounded on
//! `examples/original_source/sysp.c`'s `command_issue`/`command_execute`/
//! `read_port_ident` state machines, kept here as explicit struct fields
//! per the "static singletons become struct fields" note.

use crate::error::Result;
use crate::ports::{PortEntry, Ports};
use std::sync::{Arc, Mutex};

const SYS_CLEAR: u32 = 0;
const SYS_RESET: u32 = 1;
const SYS_HALT: u32 = 2;
const SYS_PORTINFO: u32 = 3;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CmdState {
    Start,
    Mid,
    Done,
}

struct Op {
    act: u32,
    data: u32,
}

struct IdentStream {
    state: CmdState,
    ident: Option<Vec<u8>>,
    pos: usize,
}

struct State {
    issue_state: Mutex<CmdState>,
    op: Mutex<Op>,
    stream: Mutex<IdentStream>,
    ports: Arc<Ports>,
}

impl State {
    fn clear(&self) {
        *self.op.lock().unwrap() = Op { act: SYS_CLEAR, data: 0 };
        self.read_port_ident(0, true);
    }

    fn read_port_ident(&self, port: usize, reset: bool) -> u32 {
        let mut stream = self.stream.lock().unwrap();
        if reset {
            stream.ident = None;
            stream.pos = 0;
            stream.state = CmdState::Start;
            return 0;
        }
        match stream.state {
            CmdState::Start => {
                stream.ident = self.ports.ident(port).map(|s| {
                    let mut bytes = s.into_bytes();
                    bytes.push(0);
                    bytes
                });
                stream.pos = 0;
                stream.state = CmdState::Mid;
                self.next_ident_byte(&mut stream)
            }
            CmdState::Mid => self.next_ident_byte(&mut stream),
            CmdState::Done => 0,
        }
    }

    fn next_ident_byte(&self, stream: &mut IdentStream) -> u32 {
        match &stream.ident {
            None => 0,
            Some(bytes) => {
                let out = bytes.get(stream.pos).copied().unwrap_or(0);
                stream.pos += 1;
                if out == 0 {
                    stream.state = CmdState::Done;
                }
                out as u32
            }
        }
    }
}

pub struct System {
    state: Arc<State>,
    port: usize,
}

impl System {
    pub fn install(ports: Arc<Ports>) -> Result<Self> {
        let state = Arc::new(State {
            issue_state: Mutex::new(CmdState::Start),
            op: Mutex::new(Op { act: SYS_CLEAR, data: 0 }),
            stream: Mutex::new(IdentStream { state: CmdState::Start, ident: None, pos: 0 }),
            ports: ports.clone(),
        });
        let writer_state = state.clone();
        let reader_state = state.clone();
        let port = ports.install(PortEntry {
            ident: "system".to_string(),
            writer: Some(Arc::new(move |_id, word| {
                let mut issue_state = writer_state.issue_state.lock().unwrap();
                match *issue_state {
                    CmdState::Start => {
                        if word == SYS_CLEAR {
                            writer_state.clear();
                        } else {
                            writer_state.op.lock().unwrap().act = word;
                            *issue_state = CmdState::Mid;
                        }
                    }
                    CmdState::Mid => {
                        writer_state.op.lock().unwrap().data = word;
                        *issue_state = CmdState::Done;
                    }
                    CmdState::Done => {
                        if word == SYS_CLEAR {
                            writer_state.clear();
                            *issue_state = CmdState::Start;
                        }
                    }
                }
            })),
            reader: Some(Arc::new(move |_id| {
                let act = reader_state.op.lock().unwrap().act;
                match act {
                    SYS_PORTINFO => {
                        let data = reader_state.op.lock().unwrap().data;
                        reader_state.read_port_ident(data as usize, false)
                    }
                    _ => 0,
                }
            })),
        })?;
        Ok(System { state, port })
    }

    pub fn remove(&self, ports: &Ports) -> Result<()> {
        ports.remove(self.port)
    }

    pub fn port(&self) -> usize {
        self.port
    }

    /// Whether the last completed command was `SYS_RESET`/`SYS_HALT`; the
    /// original source stores these actions but never acts on them beyond
    /// bookkeeping, so this is exposed for a caller to poll if desired.
    pub fn pending_action(&self) -> u32 {
        self.state.op.lock().unwrap().act
    }
}

pub const RESET_ACTION: u32 = SYS_RESET;
pub const HALT_ACTION: u32 = SYS_HALT;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portinfo_streams_ident_bytes_then_zero() {
        let ports = Arc::new(Ports::new());
        let target = ports
            .install(PortEntry { ident: "target".to_string(), writer: None, reader: None })
            .unwrap();
        let sys = System::install(ports.clone()).unwrap();

        ports.write(sys.port(), SYS_PORTINFO).unwrap();
        ports.write(sys.port(), target as u32).unwrap();

        let mut out = Vec::new();
        loop {
            let b = ports.read(sys.port()).unwrap();
            if b == 0 {
                break;
            }
            out.push(b as u8);
        }
        assert_eq!(out, b"target");
        assert_eq!(ports.read(sys.port()).unwrap(), 0);
    }

    #[test]
    fn clear_resets_state_machine() {
        let ports = Arc::new(Ports::new());
        let sys = System::install(ports.clone()).unwrap();
        ports.write(sys.port(), SYS_PORTINFO).unwrap();
        ports.write(sys.port(), SYS_CLEAR).unwrap();
        assert_eq!(sys.pending_action(), SYS_CLEAR);
    }
}
