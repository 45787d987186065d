//! Host probing: NIC queue counts, CPU cores, boot id.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use shapeplan_config::Config;
use shapeplan_core::CoreError;
use shapeplan_core::shard::usable_queues;

const SYS_NET: &str = "/sys/class/net";
const BOOT_ID: &str = "/proc/sys/kernel/random/boot_id";

/// Queue pairs exposed by `interface`: the smaller of its tx and rx
/// counts, if sysfs knows it.
fn nic_queues(sys_net: &Path, interface: &str) -> Option<u32> {
    let dir = sys_net.join(interface).join("queues");
    let names: Vec<String> = fs::read_dir(&dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    let count = |prefix: &str| names.iter().filter(|n| n.starts_with(prefix)).count();
    let pairs = count("tx-").min(count("rx-"));
    u32::try_from(pairs).ok().filter(|c| *c > 0)
}

fn cpu_cores() -> u32 {
    std::thread::available_parallelism()
        .ok()
        .and_then(|n| u32::try_from(n.get()).ok())
        .unwrap_or(1)
}

/// Usable queues per direction. An explicit count (flag, then
/// `queues.count`) replaces the probed one; a stick still halves it.
pub fn queue_count(cfg: &Config, cli_override: Option<u32>) -> Result<u32, CoreError> {
    let cores = cpu_cores();
    let mut interfaces = vec![cfg.interfaces.download.as_str()];
    if !cfg.interfaces.on_a_stick {
        interfaces.push(cfg.interfaces.upload.as_str());
    }
    let nic = interfaces
        .iter()
        .filter_map(|iface| {
            let queues = nic_queues(Path::new(SYS_NET), iface);
            if queues.is_none() {
                debug!(interface = %iface, "no queue information in sysfs");
            }
            queues
        })
        .min()
        .unwrap_or(cores);
    usable_queues(
        nic,
        cores,
        cli_override.or(cfg.queues.count),
        cfg.interfaces.on_a_stick,
    )
}

/// Identifier of the current boot. Changes on every reboot.
pub fn boot_id() -> String {
    match fs::read_to_string(BOOT_ID) {
        Ok(id) => id.trim().to_owned(),
        Err(e) => {
            warn!(error = %e, "boot id unavailable; reboots will not be detected");
            String::from("unknown")
        }
    }
}
