use core::fmt;

/// Kernel-assigned task identifier, the unit of addressing for `send`/`recv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn from_u64(v: u64) -> Self {
        Self(v)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Process identifier, as reported by `taskid_to_pid` (§6.1). Two tasks that
/// belong to the same process share a `Pid`; this is the unit of ownership
/// credentialing for `global_fd`s (§4.1). Kept at the wire's own width
/// (`u32`, matching `VfsOpenReq`'s `pid` field, §6.2) rather than a wider
/// kernel-internal type, since every pid this broker ever handles either
/// came from or is going straight back out onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl Pid {
    pub fn from_u32(v: u32) -> Self {
        Self(v)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid#{}", self.0)
    }
}
