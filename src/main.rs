//! CLI entry point: `program [disk-file...]`. Firmware is always loaded
//! from `fw.bin` in the current directory; each positional argument binds
//! a successive disk. Grounded on the external-interface contract (exit
//! code 0 on clean halt, the error's numeric code on any fatal setup
//! failure).

use vx4::error::die_on;

const DEFAULT_FIRMWARE: &str = "fw.bin";

/// No flag surface: firmware always comes from `fw.bin` in the working
/// directory, remaining positional arguments are disk images in order.
struct Config {
    firmware_path: String,
    disk_paths: Vec<String>,
}

impl Config {
    fn from_args() -> Self {
        Config {
            firmware_path: DEFAULT_FIRMWARE.to_string(),
            disk_paths: std::env::args().skip(1).collect(),
        }
    }
}

fn main() {
    env_logger::init();

    let config = Config::from_args();
    let mut machine = die_on(vx4::Machine::new(&config.firmware_path, &config.disk_paths));
    machine.run();
    std::process::exit(0);
}
