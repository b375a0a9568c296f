//! Serial device snapshots and the logical port selection

use serde::{Deserialize, Serialize};

/// One enumerated serial device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    /// Platform device identifier, e.g. "/dev/ttyACM0" or "COM3"
    pub device_id: String,
    /// Whether the device exposes a USB vendor id. Only such devices are
    /// offered for selection; motherboard UARTs and the like are not.
    pub has_vendor_id: bool,
}

/// Ordered view of the serial devices present at one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub entries: Vec<PortEntry>,
}

impl PortSnapshot {
    pub fn new(entries: Vec<PortEntry>) -> Self {
        Self { entries }
    }

    /// Total device count, selectable or not. The selection-reset policy
    /// keys off this number.
    pub fn device_count(&self) -> usize {
        self.entries.len()
    }

    /// Devices offered to the user, in enumeration order.
    pub fn selectable(&self) -> impl Iterator<Item = &PortEntry> {
        self.entries.iter().filter(|e| e.has_vendor_id)
    }
}

/// The logical port selection. `Sentinel` means "no device chosen" and is
/// what a flash request is rejected on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortSelection {
    Sentinel,
    Device(String),
}

impl PortSelection {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, PortSelection::Sentinel)
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            PortSelection::Sentinel => None,
            PortSelection::Device(id) => Some(id.as_str()),
        }
    }
}

impl Default for PortSelection {
    fn default() -> Self {
        PortSelection::Sentinel
    }
}

impl std::fmt::Display for PortSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortSelection::Sentinel => write!(f, "none"),
            PortSelection::Device(id) => write!(f, "{}", id),
        }
    }
}
