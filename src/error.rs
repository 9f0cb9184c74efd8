//! The machine's error taxonomy. One variant per `error_t` code the original
//! firmware-host boundary defines: a precondition violation, an allocation
//! failure, an out-of-range/misaligned argument, a request that can't be
//! serviced right now, a host-side library failure, a file error, or a port
//! exhaustion. `NoErr` has no variant here — it's `Ok(())`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MachineError {
    /// A function's precondition was violated (e.g. unmapping an unmapped block).
    #[error("a function's precondition was violated")]
    Precondition,
    /// A memory allocation failed.
    #[error("a memory allocation failed")]
    NoMem,
    /// A function's argument was invalid (out of range, or misaligned).
    #[error("a function's argument was invalid")]
    Invalid,
    /// A request could not be fulfilled at the required time.
    #[error("a request could not be fulfilled at the required time")]
    Again,
    /// An error occurred in an external (host-side) library or thread.
    #[error("an error occurred in an external function")]
    Extern,
    /// A file operation failed.
    #[error("a file operation failed")]
    File,
    /// No available port slot.
    #[error("no port slot was available")]
    Port,
}

impl MachineError {
    /// The numeric code exposed across the external interface (process exit codes, etc).
    pub fn code(&self) -> i32 {
        match self {
            MachineError::Precondition => 1,
            MachineError::NoMem => 2,
            MachineError::Invalid => 3,
            MachineError::Again => 4,
            MachineError::Extern => 5,
            MachineError::File => 6,
            MachineError::Port => 7,
        }
    }
}

pub type Result<T> = std::result::Result<T, MachineError>;

/// Log a fatal setup error with its origin and exit with the error's numeric code.
/// The host-side-setup analogue of the original source's `DIE_ON`/`error_exit`.
#[track_caller]
pub fn die_on<T>(result: Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(err) => {
            let loc = std::panic::Location::caller();
            log::error!("{} ({}:{})", err, loc.file(), loc.line());
            std::process::exit(err.code());
        }
    }
}
