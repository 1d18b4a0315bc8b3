//! In-process fake bus standing in for the kernel message primitive (§6.1)
//! in tests. Each spawned task gets its own mailbox; `send` looks the
//! destination's mailbox up and hands it a copy of the bytes, mirroring the
//! addressed, copying semantics `vfsb-broker` is written against.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TransportError;
use crate::ids::{Pid, TaskId};
use crate::transport::Transport;

struct Inner {
    next_task_id: u64,
    mailboxes: HashMap<TaskId, Sender<(TaskId, Vec<u8>)>>,
    names: HashMap<String, TaskId>,
    pids: HashMap<TaskId, Pid>,
}

/// Shared registry backing every `LocalTransport` spawned from it.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Mutex<Inner>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_task_id: 1,
                mailboxes: HashMap::new(),
                names: HashMap::new(),
                pids: HashMap::new(),
            })),
        }
    }

    /// Creates a new task belonging to `pid` and returns its transport handle.
    pub fn spawn(&self, pid: Pid) -> LocalTransport {
        let mut inner = self.inner.lock().unwrap();
        let task_id = TaskId(inner.next_task_id);
        inner.next_task_id += 1;
        let (tx, rx) = mpsc::channel();
        inner.mailboxes.insert(task_id, tx);
        inner.pids.insert(task_id, pid);
        LocalTransport {
            bus: self.inner.clone(),
            task_id,
            receiver: Mutex::new(rx),
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One task's handle onto a `LocalBus`; implements `Transport`.
pub struct LocalTransport {
    bus: Arc<Mutex<Inner>>,
    task_id: TaskId,
    receiver: Mutex<Receiver<(TaskId, Vec<u8>)>>,
}

impl LocalTransport {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

impl Transport for LocalTransport {
    fn send(&self, dst: TaskId, buf: &[u8]) -> Result<(), TransportError> {
        let inner = self.bus.lock().unwrap();
        let mailbox = inner
            .mailboxes
            .get(&dst)
            .ok_or(TransportError::NoSuchTask(dst))?;
        mailbox
            .send((self.task_id, buf.to_vec()))
            .map_err(|_| TransportError::NoSuchTask(dst))
    }

    fn recv(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<(TaskId, usize), TransportError> {
        let receiver = self.receiver.lock().unwrap();
        let (sender, data) = match timeout {
            Some(d) => receiver.recv_timeout(d).map_err(|err| match err {
                RecvTimeoutError::Timeout => TransportError::Timeout,
                RecvTimeoutError::Disconnected => TransportError::Timeout,
            })?,
            None => receiver.recv().map_err(|_| TransportError::Timeout)?,
        };
        if data.len() > buf.len() {
            return Err(TransportError::BufferTooSmall);
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok((sender, data.len()))
    }

    fn register_name(&self, name: &str) -> Result<(), TransportError> {
        let mut inner = self.bus.lock().unwrap();
        if inner.names.contains_key(name) {
            return Err(TransportError::NameTaken);
        }
        inner.names.insert(name.to_owned(), self.task_id);
        Ok(())
    }

    fn resolve_name(&self, name: &str) -> Result<TaskId, TransportError> {
        let inner = self.bus.lock().unwrap();
        inner
            .names
            .get(name)
            .copied()
            .ok_or(TransportError::NameNotFound)
    }

    fn taskid_to_pid(&self, task: TaskId) -> Result<Pid, TransportError> {
        let inner = self.bus.lock().unwrap();
        inner
            .pids
            .get(&task)
            .copied()
            .ok_or(TransportError::NoSuchTask(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_recv_roundtrips() {
        let bus = LocalBus::new();
        let a = bus.spawn(Pid(1));
        let b = bus.spawn(Pid(2));

        a.send(b.task_id(), b"hello").unwrap();

        let mut buf = [0u8; 16];
        let (sender, n) = b.recv(&mut buf, None).unwrap();
        assert_eq!(sender, a.task_id());
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn send_to_unknown_task_fails() {
        let bus = LocalBus::new();
        let a = bus.spawn(Pid(1));
        let result = a.send(TaskId(9999), b"x");
        assert_eq!(result, Err(TransportError::NoSuchTask(TaskId(9999))));
    }

    #[test]
    fn recv_times_out_with_no_pending_message() {
        let bus = LocalBus::new();
        let a = bus.spawn(Pid(1));
        let mut buf = [0u8; 16];
        let result = a.recv(&mut buf, Some(Duration::from_millis(10)));
        assert_eq!(result, Err(TransportError::Timeout));
    }

    #[test]
    fn name_registry_roundtrips() {
        let bus = LocalBus::new();
        let a = bus.spawn(Pid(1));
        a.register_name("VFS").unwrap();

        let b = bus.spawn(Pid(2));
        assert_eq!(b.resolve_name("VFS").unwrap(), a.task_id());
        assert_eq!(b.resolve_name("nope"), Err(TransportError::NameNotFound));
    }

    #[test]
    fn name_cannot_be_registered_twice() {
        let bus = LocalBus::new();
        let a = bus.spawn(Pid(1));
        let b = bus.spawn(Pid(2));
        a.register_name("VFS").unwrap();
        assert_eq!(b.register_name("VFS"), Err(TransportError::NameTaken));
    }

    #[test]
    fn taskid_to_pid_resolves_spawning_process() {
        let bus = LocalBus::new();
        let a = bus.spawn(Pid(42));
        assert_eq!(a.taskid_to_pid(a.task_id()), Ok(Pid(42)));
    }
}
