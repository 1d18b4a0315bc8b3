//! Per-task state machine (§3, §4.4): owns Mount and Select for one client
//! task. Created on demand, freed once idle — no process-wide singleton
//! holds this state (§9 "Singleton 'current requester' task-id globals").

use std::collections::HashMap;

use vfsb_kernel::TaskId;
use vfsb_proto::GlobalFd;

/// Only `AwaitReady` carries data; `Init` needs none, matching the same
/// per-state-data discipline as `fd::FdState`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Init,
    AwaitReady {
        read_watch: Vec<GlobalFd>,
        write_watch: Vec<GlobalFd>,
    },
}

pub struct TaskEntry {
    pub state: TaskState,
}

/// Created on first Mount or Select from a task id, freed once its state
/// returns to `Init` (§3 "freed once its state returns to `Init` and no
/// watch lists are held").
pub struct TaskTable {
    tasks: HashMap<TaskId, TaskEntry>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    pub fn entry(&mut self, task: TaskId) -> &mut TaskEntry {
        self.tasks.entry(task).or_insert_with(|| TaskEntry {
            state: TaskState::Init,
        })
    }

    pub fn get(&self, task: TaskId) -> Option<&TaskEntry> {
        self.tasks.get(&task)
    }

    pub fn set_state(&mut self, task: TaskId, state: TaskState) {
        self.entry(task).state = state;
    }

    /// Drops the entry once a transition leaves it idle, so idle tasks
    /// don't accumulate in the table forever.
    pub fn prune_if_idle(&mut self, task: TaskId) {
        if let Some(entry) = self.tasks.get(&task) {
            if entry.state == TaskState::Init {
                self.tasks.remove(&task);
            }
        }
    }

    /// Task ids currently blocked in `AwaitReady`, snapshotted so the
    /// caller can scan and mutate the table without holding this borrow.
    pub fn awaiting_ready(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|(_, entry)| matches!(entry.state, TaskState::AwaitReady { .. }))
            .map(|(&task, _)| task)
            .collect()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_defaults_to_init() {
        let mut table = TaskTable::new();
        let entry = table.entry(TaskId::from_u64(1));
        assert_eq!(entry.state, TaskState::Init);
    }

    #[test]
    fn prune_removes_idle_task() {
        let mut table = TaskTable::new();
        table.entry(TaskId::from_u64(1));
        table.prune_if_idle(TaskId::from_u64(1));
        assert!(table.get(TaskId::from_u64(1)).is_none());
    }

    #[test]
    fn prune_keeps_awaiting_task() {
        let mut table = TaskTable::new();
        table.set_state(
            TaskId::from_u64(1),
            TaskState::AwaitReady {
                read_watch: vec![GlobalFd(1)],
                write_watch: vec![],
            },
        );
        table.prune_if_idle(TaskId::from_u64(1));
        assert!(table.get(TaskId::from_u64(1)).is_some());
    }

    #[test]
    fn awaiting_ready_lists_only_blocked_tasks() {
        let mut table = TaskTable::new();
        table.entry(TaskId::from_u64(1));
        table.set_state(
            TaskId::from_u64(2),
            TaskState::AwaitReady {
                read_watch: vec![],
                write_watch: vec![],
            },
        );
        assert_eq!(table.awaiting_ready(), vec![TaskId::from_u64(2)]);
    }
}
