use std::time::Duration;

use crate::error::TransportError;
use crate::ids::{Pid, TaskId};

/// The kernel message primitive the broker is built on top of (§6.1):
/// addressed send/receive plus a task-name registry, modeled as a trait so
/// the broker core can be driven by an in-process fake (`local::LocalBus`)
/// in tests instead of a real kernel.
pub trait Transport {
    /// Sends `buf` to `dst`. Non-blocking: the broker never waits on send
    /// (§5 "outbound send is non-blocking"), so a destination that cannot
    /// currently accept the message is a `TransportError`, not a stall.
    fn send(&self, dst: TaskId, buf: &[u8]) -> Result<(), TransportError>;

    /// Blocks for a message from any sender, writing it into `buf` and
    /// returning the sender and the number of bytes written. `timeout` of
    /// `None` blocks indefinitely, matching the dispatcher loop's own use
    /// (§4.6 "receive any message from any sender with no timeout").
    fn recv(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<(TaskId, usize), TransportError>;

    /// Registers `name` as resolvable to this transport's own task (§6.3).
    fn register_name(&self, name: &str) -> Result<(), TransportError>;

    /// Resolves a previously registered name to its task id.
    fn resolve_name(&self, name: &str) -> Result<TaskId, TransportError>;

    /// Maps a task id to the process id it belongs to, for ownership
    /// credentialing (§4.1).
    fn taskid_to_pid(&self, task: TaskId) -> Result<Pid, TransportError>;
}
