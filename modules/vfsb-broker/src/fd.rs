//! FD table (§3, §4.3): a process-global allocator keyed by `global_fd`,
//! free slots reused, modeled on a `MLibDynamicArray`-backed `FdInfo_t`
//! table (`Fd.c`/`Fd.h`) and cast into an enum-of-variants state style
//! (`ClientState` in `filesystem/attachment/client.rs`) instead of a flat
//! struct with "unused fields" depending on state (§9).

use vfsb_kernel::{Pid, TaskId};
use vfsb_proto::GlobalFd;

use crate::error::BrokerError;
use crate::node::NodeId;

/// Per-FD state (§4.3). Every state here is reachable only via the dispatch
/// table in `dispatch.rs`; an event that doesn't match the current state is
/// a logged no-op, never a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdState {
    Init,
    AwaitVfsOpen,
    AwaitVfsRead,
    AwaitVfsWrite,
    AwaitVfsClose,
}

#[derive(Debug)]
pub struct FdEntry {
    pub global_fd: GlobalFd,
    pub local_fd: u32,
    pub owner_task: TaskId,
    pub owner_pid: Pid,
    pub node: NodeId,
    pub read_cursor: u64,
    pub write_cursor: u64,
    pub state: FdState,
}

/// Dynamic array of `Option<FdEntry>` with a free-slot stack, mirroring the
/// original `FdAlloc`/`FdFree` pair: a freed slot's index is handed back out
/// before the array ever grows.
pub struct FdTable {
    slots: Vec<Option<FdEntry>>,
    free: Vec<u32>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn alloc(
        &mut self,
        local_fd: u32,
        owner_task: TaskId,
        owner_pid: Pid,
        node: NodeId,
    ) -> Result<GlobalFd, BrokerError> {
        let index = if let Some(index) = self.free.pop() {
            index
        } else {
            let index: u32 = self
                .slots
                .len()
                .try_into()
                .map_err(|_| BrokerError::AllocFailure)?;
            self.slots.push(None);
            index
        };
        let global_fd = GlobalFd(index);
        self.slots[index as usize] = Some(FdEntry {
            global_fd,
            local_fd,
            owner_task,
            owner_pid,
            node,
            read_cursor: 0,
            write_cursor: 0,
            state: FdState::Init,
        });
        Ok(global_fd)
    }

    pub fn get(&self, fd: GlobalFd) -> Option<&FdEntry> {
        self.slots.get(fd.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, fd: GlobalFd) -> Option<&mut FdEntry> {
        self.slots.get_mut(fd.0 as usize)?.as_mut()
    }

    /// Releases a descriptor's slot for reuse (§3: freed "only after a
    /// `VfsClose` response ... has been replied to the client").
    pub fn free(&mut self, fd: GlobalFd) {
        if fd.0 as usize >= self.slots.len() {
            return;
        }
        self.slots[fd.0 as usize] = None;
        self.free.push(fd.0);
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_id() -> NodeId {
        NodeId::ROOT
    }

    #[test]
    fn alloc_then_free_reuses_slot() {
        let mut table = FdTable::new();
        let a = table.alloc(3, TaskId::from_u64(1), Pid::from_u32(1), node_id()).unwrap();
        table.free(a);
        let b = table.alloc(4, TaskId::from_u64(2), Pid::from_u32(2), node_id()).unwrap();
        assert_eq!(a, b, "freed slot should be reused before the array grows");
    }

    #[test]
    fn freed_fd_is_no_longer_addressable() {
        let mut table = FdTable::new();
        let a = table.alloc(3, TaskId::from_u64(1), Pid::from_u32(1), node_id()).unwrap();
        table.free(a);
        assert!(table.get(a).is_none());
    }

    #[test]
    fn distinct_open_fds_get_distinct_global_fds() {
        let mut table = FdTable::new();
        let a = table.alloc(1, TaskId::from_u64(1), Pid::from_u32(1), node_id()).unwrap();
        let b = table.alloc(2, TaskId::from_u64(1), Pid::from_u32(1), node_id()).unwrap();
        assert_ne!(a, b);
    }
}
