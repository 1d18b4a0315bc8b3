use core::fmt;

use crate::ids::TaskId;

/// Failure of a `Transport` operation (§6.1). Distinct from `vfsb_proto::CodecError`,
/// which only ever judges bytes already received; this is the collaborator that
/// hands those bytes over in the first place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// `send`'s destination task no longer exists.
    NoSuchTask(TaskId),
    /// The kernel could not allocate the resources the call needed.
    NoMemory,
    /// `recv` exceeded its deadline without a message arriving.
    Timeout,
    /// `register_name` was called with a name already owned by another task.
    NameTaken,
    /// `resolve_name` found no task registered under that name.
    NameNotFound,
    /// A buffer passed to `recv` was smaller than the message that arrived.
    BufferTooSmall,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchTask(id) => write!(f, "no such task: {}", id),
            Self::NoMemory => write!(f, "kernel out of memory"),
            Self::Timeout => write!(f, "receive timed out"),
            Self::NameTaken => write!(f, "task name already registered"),
            Self::NameNotFound => write!(f, "task name not registered"),
            Self::BufferTooSmall => write!(f, "receive buffer smaller than the pending message"),
        }
    }
}

impl std::error::Error for TransportError {}
