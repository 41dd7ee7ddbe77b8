//! Serial port discovery.
//!
//! The connect order is: ports enumerated by the OS that match a known
//! controller pattern, then the configured port, then the platform fallback
//! list. Duplicates are dropped while preserving the first position.
//!
//! Known patterns:
//! - Linux / Raspberry Pi: `/dev/ttyUSB*`, `/dev/ttyACM*`, `/dev/serial/by-id/*`
//! - macOS: `/dev/cu.usbserial*`, `/dev/cu.usbmodem*`
//! - Windows: `COM*`

use tracing::{debug, warn};

use crate::link::LinkSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    RaspberryPi,
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub fn detect() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
            Self::from_cpuinfo(&cpuinfo)
        }
    }

    /// Classify a Linux host from the contents of `/proc/cpuinfo`.
    pub fn from_cpuinfo(cpuinfo: &str) -> Self {
        let lower = cpuinfo.to_ascii_lowercase();
        if lower.contains("raspberry pi") || lower.contains("bcm2") {
            Platform::RaspberryPi
        } else {
            Platform::Linux
        }
    }

    /// Port names and `*` patterns worth trying on this platform.
    pub fn fallback_ports(&self) -> &'static [&'static str] {
        match self {
            Platform::RaspberryPi => &[
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB2",
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM2",
                "/dev/serial/by-id/*",
                "/dev/serial/by-path/*",
            ],
            Platform::Linux => &[
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB2",
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM2",
            ],
            Platform::MacOs => &[
                "/dev/cu.usbserial-*",
                "/dev/cu.usbmodem*",
                "/dev/cu.usbserial-0001",
                "/dev/cu.usbserial-0002",
            ],
            Platform::Windows => &[
                "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9", "COM10",
            ],
        }
    }
}

pub fn default_port(platform: Platform) -> &'static str {
    match platform {
        Platform::RaspberryPi | Platform::Linux => "/dev/ttyUSB0",
        Platform::MacOs => "/dev/cu.usbserial-0001",
        Platform::Windows => "COM3",
    }
}

/// `true` when `port` looks like a controller board.
pub fn is_controller_port(port: &str) -> bool {
    if let Some(num) = port.strip_prefix("COM") {
        return !num.is_empty() && num.chars().all(|c| c.is_ascii_digit());
    }
    [
        "/dev/ttyUSB",
        "/dev/ttyACM",
        "/dev/serial/by-id/",
        "/dev/serial/by-path/",
        "/dev/cu.usbserial",
        "/dev/cu.usbmodem",
    ]
    .iter()
    .any(|prefix| port.starts_with(prefix))
}

/// Match `port` against a fallback entry, where a trailing `*` is a prefix
/// wildcard.
pub fn matches_pattern(port: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => port.starts_with(prefix),
        None => port == pattern,
    }
}

/// Enumerate OS serial ports that look like a controller board.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => {
            let mut names: Vec<String> = ports
                .into_iter()
                .map(|p| p.port_name)
                .filter(|name| is_controller_port(name))
                .collect();
            names.sort();
            debug!(ports = ?names, "enumerated serial ports");
            names
        }
        Err(e) => {
            warn!(error = %e, "failed to enumerate serial ports");
            Vec::new()
        }
    }
}

/// Build the ordered list of ports to try, given what the OS reported.
///
/// Wildcard fallback entries only select from `available`; they are never
/// tried literally.
pub fn candidate_ports(settings: &LinkSettings, available: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    let mut push = |port: &str| {
        if !ordered.iter().any(|p| p == port) {
            ordered.push(port.to_string());
        }
    };

    for port in available {
        push(port);
    }
    if !settings.port.contains('*') {
        push(&settings.port);
    }
    for entry in &settings.fallback_ports {
        if entry.contains('*') {
            for port in available.iter().filter(|p| matches_pattern(p, entry)) {
                push(port);
            }
        } else {
            push(entry);
        }
    }
    ordered
}
