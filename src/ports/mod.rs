//! Serial device polling and the logical port selection
//!
//! Polling runs on a background cadence and is the only activity allowed to
//! overlap a build; the dispatcher captures the selection by value at
//! invocation start, so a mid-build poll can never hand the uploader a stale
//! device.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::Result;
use crate::models::{AppEvent, PortEntry, PortSelection, PortSnapshot};

/// Tracks enumerated serial devices and a stable logical selection.
pub struct PortMonitor {
    last_count: Option<usize>,
    selection: PortSelection,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl PortMonitor {
    pub fn new(events: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            last_count: None,
            selection: PortSelection::Sentinel,
            events,
        }
    }

    pub fn selection(&self) -> &PortSelection {
        &self.selection
    }

    /// Explicit user choice from the selectable list.
    pub fn select(&mut self, device_id: impl Into<String>) {
        self.selection = PortSelection::Device(device_id.into());
    }

    /// Enumerate serial devices through the host facility.
    pub fn enumerate() -> Result<PortSnapshot> {
        let ports = serialport::available_ports()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let entries = ports
            .into_iter()
            .map(|info| PortEntry {
                device_id: info.port_name,
                has_vendor_id: matches!(info.port_type, serialport::SerialPortType::UsbPort(_)),
            })
            .collect();
        Ok(PortSnapshot::new(entries))
    }

    /// Enumerate and apply the selection policy.
    pub fn poll(&mut self) -> Result<PortSnapshot> {
        let snapshot = Self::enumerate()?;
        self.apply(&snapshot);
        Ok(snapshot)
    }

    /// Selection policy, separated from enumeration so it is testable with
    /// synthetic snapshots.
    ///
    /// If the device count is unchanged the selection persists. On any count
    /// change the selection is discarded and the selectable list rebuilt;
    /// the first vendor-id device is auto-selected only when exactly one new
    /// device appeared, otherwise the user must choose again.
    pub fn apply(&mut self, snapshot: &PortSnapshot) {
        let count = snapshot.device_count();
        let previous = self.last_count;
        self.last_count = Some(count);

        if previous == Some(count) {
            return;
        }

        if !self.selection.is_sentinel() {
            self.selection = PortSelection::Sentinel;
            let _ = self.events.send(AppEvent::PortSelectionCleared);
        }

        let grew_by_one = count == previous.unwrap_or(0) + 1;
        if grew_by_one {
            if let Some(entry) = snapshot.selectable().next() {
                self.selection = PortSelection::Device(entry.device_id.clone());
                let _ = self
                    .events
                    .send(AppEvent::PortAutoSelected(entry.device_id.clone()));
            }
        }

        let _ = self.events.send(AppEvent::PortsChanged(snapshot.clone()));
        log::debug!(
            "Port snapshot changed: {} device(s), selection {}",
            count,
            self.selection
        );
    }
}

/// Run the monitor on a fixed interval until the handle is aborted.
pub fn spawn_polling(monitor: Arc<Mutex<PortMonitor>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let result = {
                let mut guard = match monitor.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                guard.poll()
            };
            if let Err(e) = result {
                log::warn!("Port poll failed: {}", e);
            }
        }
    })
}
