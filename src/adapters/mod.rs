use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::core::volume::VolumeEnumerator;

#[cfg(target_os = "linux")]
mod linux;
mod simulated;

#[cfg(target_os = "linux")]
pub use linux::{
    LinuxEnumerator, LinuxEnumeratorConfig, MountEntry, parse_mount_table, unescape_mount_field,
};
pub use simulated::{SimulatedController, SimulatedEnumerator};

/// Build the enumerator the daemon should use.
///
/// In simulation mode a stdin reader accepts `add <id>`, `rm <id>` and
/// `fail on|off`; each added volume is backed by `simulation_root/<id>`.
pub fn get_enumerator(config: &AppConfig) -> anyhow::Result<Arc<dyn VolumeEnumerator>> {
    if config.simulation {
        let (enumerator, controller) = SimulatedEnumerator::new();
        let root = config.simulation_root.clone();

        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines().map_while(Result::ok) {
                run_simulator_command(&controller, &root, &line);
            }
        });

        return Ok(Arc::new(enumerator));
    }

    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxEnumerator::with_defaults()))
    }

    #[cfg(not(target_os = "linux"))]
    {
        anyhow::bail!("removable volume detection is only supported on Linux; use --simulation")
    }
}

fn run_simulator_command(controller: &SimulatedController, root: &Path, line: &str) {
    let parts: Vec<&str> = line.split_whitespace().collect();

    match parts.as_slice() {
        ["add", id] => {
            let mount = root.join(id.replace('/', "_"));
            if let Err(e) = std::fs::create_dir_all(&mount) {
                warn!(mount = %mount.display(), error = %e, "(Simulator) Cannot create volume directory");
                return;
            }
            info!(volume = %id, mount = %mount.display(), "(Simulator) Volume attached");
            controller.insert(id, mount);
        }
        ["rm", id] => {
            if controller.eject(id) {
                info!(volume = %id, "(Simulator) Volume ejected");
            }
        }
        ["fail", "on"] => controller.set_failing(true),
        ["fail", "off"] => controller.set_failing(false),
        _ => println!("(Simulator) Use: 'add <id>', 'rm <id>' or 'fail on|off'"),
    }
}
