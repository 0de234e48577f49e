use std::{
    net::{Ipv4Addr, TcpListener},
    sync::Arc,
};

use dashmap::DashSet;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("no available port at or above {start}")]
    NoAvailablePort { start: u16 },
}

/// Ports currently held by live renderer processes or in-flight starts.
#[derive(Debug, Default, Clone)]
pub struct PortLedger {
    reserved: Arc<DashSet<u16>>,
}

impl PortLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the first port at or above `start` that is neither in the ledger nor bound
    /// by another socket on the loopback interface.
    pub fn allocate(&self, start: u16) -> Result<PortLease, PortError> {
        for port in start.max(1)..=u16::MAX {
            if self.reserved.contains(&port) || !is_bindable(port) {
                continue;
            }
            // insert-if-absent; a concurrent caller may have claimed it after our probe
            if self.reserved.insert(port) {
                debug!(
                    target = "runtime::ports",
                    op = "allocate",
                    port,
                    start,
                    "Reserved renderer port"
                );
                return Ok(PortLease {
                    port,
                    reserved: Arc::clone(&self.reserved),
                });
            }
        }

        Err(PortError::NoAvailablePort { start })
    }

    pub fn contains(&self, port: u16) -> bool {
        self.reserved.contains(&port)
    }

    pub fn reserved_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.reserved.iter().map(|entry| *entry).collect();
        ports.sort_unstable();
        ports
    }

    pub fn is_empty(&self) -> bool {
        self.reserved.is_empty()
    }
}

fn is_bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// Reservation of one port; releases it from the ledger exactly once, on drop.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    reserved: Arc<DashSet<u16>>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.reserved.remove(&self.port);
    }
}
