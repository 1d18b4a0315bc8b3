use core::fmt;

use vfsb_kernel::TaskId;
use vfsb_proto::GlobalFd;

/// Every broker-visible failure kind (§7). A single enum, hand-rolled
/// `Display`/`Error` impls, matching the `ErrorCode`-enum style used
/// elsewhere in this workspace rather than a derive-macro error crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    /// The message failed `vfsb_proto` structural validation.
    MalformedInbound,
    /// A message referenced a `global_fd` with no live `FdEntry`.
    UnknownFd(GlobalFd),
    /// A message referenced a `global_fd` owned by a different process.
    WrongOwnerProcess(GlobalFd),
    /// `OpenReq`'s path did not resolve to any node.
    NodeNotFound,
    /// `OpenReq`'s path resolved to a node that is not a `MountFile`.
    NodeWrongType,
    /// `MountReq`'s path already names a node under root.
    NodeNameConflict,
    /// The FD table or node tree could not grow to satisfy the request.
    AllocFailure,
    /// The kernel transport rejected an outbound send.
    SendFailure(TaskId),
    /// A response arrived for a conversation that is no longer pending.
    LatePairingLoss,
    /// Registering the broker's own task name with the kernel failed; the
    /// one condition that is fatal at boot (§7, §4.7).
    NameRegistrationFailed,
    /// The kernel transport itself failed on a blocking receive.
    TransportFailure,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedInbound => write!(f, "inbound message failed structural validation"),
            Self::UnknownFd(fd) => write!(f, "unknown global_fd {}", fd.0),
            Self::WrongOwnerProcess(fd) => {
                write!(f, "global_fd {} is not owned by the sender's process", fd.0)
            },
            Self::NodeNotFound => write!(f, "path does not resolve to any node"),
            Self::NodeWrongType => write!(f, "path does not resolve to a mount file"),
            Self::NodeNameConflict => write!(f, "a node with that name already exists under root"),
            Self::AllocFailure => write!(f, "fd table or node tree allocation failed"),
            Self::SendFailure(dst) => write!(f, "send to {} failed", dst),
            Self::LatePairingLoss => write!(f, "response has no matching pending conversation"),
            Self::NameRegistrationFailed => write!(f, "failed to register broker task name with the kernel"),
            Self::TransportFailure => write!(f, "kernel transport failed on receive"),
        }
    }
}

impl std::error::Error for BrokerError {}
