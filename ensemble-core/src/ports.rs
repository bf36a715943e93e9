//! Process-wide TCP port reservation for locally hosted tool servers
//!
//! Every MCP server instance needs a loopback port before it can bind.
//! Binding alone is not enough under concurrent spawns: two servers can
//! probe the same free port before either has bound it for real. The
//! allocator therefore keeps a process-wide reservation set; a port stays
//! reserved until [`PortAllocator::release`] is called, whether or not the
//! caller ended up binding it.

use std::collections::HashSet;

use parking_lot::Mutex;
use rand::Rng;
use tokio::net::TcpListener;

/// Inclusive lower bound of the allocation range.
pub const PORT_RANGE_START: u16 = 8080;
/// Exclusive upper bound of the allocation range.
pub const PORT_RANGE_END: u16 = 9100;

/// Number of random probes before falling back to a sequential scan.
const RANDOM_PROBES: usize = 50;

/// Errors from port allocation.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// Every port in the range is reserved or unbindable.
    #[error("no free port in range {PORT_RANGE_START}..{PORT_RANGE_END}")]
    Exhausted,
}

/// Reserves loopback ports in a fixed range.
///
/// Use [`PortAllocator::global`] for the shared process-wide instance;
/// separate instances exist only so tests can run in isolation.
pub struct PortAllocator {
    reserved: Mutex<HashSet<u16>>,
}

lazy_static::lazy_static! {
    static ref GLOBAL: PortAllocator = PortAllocator::new();
}

impl PortAllocator {
    /// Create an allocator with an empty reservation set.
    pub fn new() -> Self {
        Self {
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// The process-wide allocator shared by all MCP server fleets.
    pub fn global() -> &'static PortAllocator {
        &GLOBAL
    }

    /// Reserve a free port.
    ///
    /// Tries `preferred` first when supplied, then up to 50 random ports,
    /// then a sequential scan of the whole range. A port counts as free when
    /// a fresh listener binds on localhost and is immediately closed.
    pub async fn acquire(&self, preferred: Option<u16>) -> Result<u16, PortError> {
        if let Some(port) = preferred {
            if in_range(port) && self.try_reserve(port).await {
                return Ok(port);
            }
        }

        for _ in 0..RANDOM_PROBES {
            let port = rand::thread_rng().gen_range(PORT_RANGE_START..PORT_RANGE_END);
            if self.try_reserve(port).await {
                return Ok(port);
            }
        }

        for port in PORT_RANGE_START..PORT_RANGE_END {
            if self.try_reserve(port).await {
                return Ok(port);
            }
        }

        Err(PortError::Exhausted)
    }

    /// Return a port to the pool. Idempotent; releasing an unreserved port
    /// is a no-op.
    pub fn release(&self, port: u16) {
        self.reserved.lock().remove(&port);
    }

    /// Number of currently reserved ports.
    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().len()
    }

    async fn try_reserve(&self, port: u16) -> bool {
        {
            let mut reserved = self.reserved.lock();
            if reserved.contains(&port) {
                return false;
            }
            // Claim before probing so a racing acquire skips this port.
            reserved.insert(port);
        }

        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(_) => {
                self.reserved.lock().remove(&port);
                false
            }
        }
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn in_range(port: u16) -> bool {
    (PORT_RANGE_START..PORT_RANGE_END).contains(&port)
}
