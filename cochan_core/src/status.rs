use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

// === Coroutine Status ===

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Created = 0,   // Body spawned, startup rendezvous not done yet
    Running = 1,   // Body is the active side
    Suspended = 2, // Body parked inside yield
    Closed = 3,    // Terminal
}

impl Status {
    pub fn is_closed(self) -> bool {
        self == Status::Closed
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Created => "Created",
            Status::Running => "Running",
            Status::Suspended => "Suspended",
            Status::Closed => "Closed",
        };
        f.write_str(name)
    }
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Created),
            1 => Ok(Status::Running),
            2 => Ok(Status::Suspended),
            3 => Ok(Status::Closed),
            _ => Err(format!("Unknown Status: {}", value)),
        }
    }
}

/// Lock-free status cell shared by the controller, the body task and the
/// timeout wrappers.
///
/// Reads never block. Every write except [`close`](StatusCell::close) is a
/// compare-and-swap from an expected state, so once `Closed` is stored no
/// later transition can overwrite it.
#[derive(Debug)]
pub struct StatusCell {
    state: AtomicU8,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(Status::Created as u8),
        }
    }

    pub fn load(&self) -> Status {
        // Only valid discriminants are ever stored.
        Status::try_from(self.state.load(Ordering::Acquire)).unwrap_or(Status::Closed)
    }

    /// Move `from -> to`. Returns false (and changes nothing) if the cell was
    /// not in `from`.
    pub fn transition(&self, from: Status, to: Status) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Force the terminal state. Returns the previous status so callers can
    /// tell whether they were the ones who closed it.
    pub fn close(&self) -> Status {
        let prev = self.state.swap(Status::Closed as u8, Ordering::AcqRel);
        Status::try_from(prev).unwrap_or(Status::Closed)
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
