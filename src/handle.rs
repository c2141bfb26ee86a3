use serde::Serialize;
use std::fmt::{self, Display, Formatter};

/// Opaque, process-unique identifier of a thread known to a [`crate::Runtime`].
///
/// Handles come from a global counter and are never reused, so a stale handle
/// can only ever resolve to "not found".
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ThreadHandle(pub u64);

impl Display for ThreadHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ThreadHandle {
    fn from(id: u64) -> Self {
        ThreadHandle(id)
    }
}

impl From<ThreadHandle> for u64 {
    fn from(id: ThreadHandle) -> Self {
        id.0
    }
}

impl ThreadHandle {
    pub const INVALID: Self = ThreadHandle(0);

    pub fn new(id: u64) -> Self {
        ThreadHandle(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Index of a slot in the mutex pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MutexId(pub usize);

impl Display for MutexId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl From<usize> for MutexId {
    fn from(index: usize) -> Self {
        MutexId(index)
    }
}

impl MutexId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Index of a slot in the condition-variable pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CondId(pub usize);

impl Display for CondId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl From<usize> for CondId {
    fn from(index: usize) -> Self {
        CondId(index)
    }
}

impl CondId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}
