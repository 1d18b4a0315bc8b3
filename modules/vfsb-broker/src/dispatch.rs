//! Dispatcher loop (§4.6) and the per-FD/per-task event handlers (§4.3,
//! §4.4) that drive it. Receive is the only suspension point; every send is
//! non-blocking and a failed one unwinds whatever state transition depended
//! on it (§5).

use log::{debug, error, info};

use vfsb_kernel::{TaskId, Transport};
use vfsb_proto::{
    CloseReq, CloseResp, GlobalFd, Message, MountReq, MountResp, OpenReq, OpenResp, Pid as WirePid,
    ReadReq, ReadResp, Ready, SelectReq, SelectResp, VfsCloseReq, VfsCloseResp, VfsOpenReq,
    VfsOpenResp, VfsReadReq, VfsReadResp, VfsReadyNtc, VfsWriteReq, VfsWriteResp, WireResult,
    WriteReq, WriteResp,
};

use crate::error::BrokerError;
use crate::fd::{FdState, FdTable};
use crate::node::{NodeId, NodeTree, NodeType};
use crate::task::{TaskState, TaskTable};

pub struct Broker<T: Transport> {
    transport: T,
    nodes: NodeTree,
    fds: FdTable,
    tasks: TaskTable,
    recv_buf: Vec<u8>,
}

impl<T: Transport> Broker<T> {
    pub fn new(transport: T, recv_buffer: usize) -> Self {
        Self {
            transport,
            nodes: NodeTree::new(),
            fds: FdTable::new(),
            tasks: TaskTable::new(),
            recv_buf: vec![0u8; recv_buffer],
        }
    }

    /// Registers the broker's own task name (§6.3); a failure here is the
    /// one condition that is fatal at boot (§7, §4.7).
    pub fn register(&self, name: &str) -> Result<(), BrokerError> {
        self.transport
            .register_name(name)
            .map_err(|_| BrokerError::NameRegistrationFailed)
    }

    /// Runs the dispatcher forever (§4.6). Only `main` calls this; the rest
    /// of the broker is driven message-by-message through `step` so tests
    /// can single-step it.
    pub fn run(&mut self) -> ! {
        loop {
            if let Err(err) = self.step() {
                error!("dispatcher step failed: {}", err);
            }
        }
    }

    /// Blocks for exactly one message, validates it, and dispatches it.
    /// Codec failures and unknown func_ids are logged and dropped, never
    /// propagated as an error the caller must handle specially (§4.1, §7).
    pub fn step(&mut self) -> Result<(), BrokerError> {
        let (sender, received) = self
            .transport
            .recv(&mut self.recv_buf, None)
            .map_err(|_| BrokerError::TransportFailure)?;
        match Message::decode(&self.recv_buf, received) {
            Ok(message) => self.dispatch(sender, message),
            Err(err) => {
                error!("rejected message from {} ({}): {}", sender, BrokerError::MalformedInbound, err);
                Ok(())
            },
        }
    }

    fn dispatch(&mut self, sender: TaskId, message: Message) -> Result<(), BrokerError> {
        match message {
            Message::MountReq(m) => self.handle_mount_req(sender, m),
            Message::OpenReq(m) => self.handle_open_req(sender, m),
            Message::ReadReq(m) => self.handle_read_req(sender, m),
            Message::WriteReq(m) => self.handle_write_req(sender, m),
            Message::CloseReq(m) => self.handle_close_req(sender, m),
            Message::SelectReq(m) => self.handle_select_req(sender, m),
            Message::VfsOpenResp(m) => self.handle_vfs_open_resp(sender, m),
            Message::VfsReadResp(m) => self.handle_vfs_read_resp(sender, m),
            Message::VfsWriteResp(m) => self.handle_vfs_write_resp(sender, m),
            Message::VfsCloseResp(m) => self.handle_vfs_close_resp(sender, m),
            Message::VfsReadyNtc(m) => self.handle_vfs_ready_ntc(sender, m),
            // The broker only ever sends these shapes; receiving one back
            // is nobody's valid protocol step (§4.6 "Unknown func_id is
            // dropped" extends naturally to a known func_id in the wrong
            // direction for dispatch purposes).
            Message::MountResp(_)
            | Message::OpenResp(_)
            | Message::VfsOpenReq(_)
            | Message::ReadResp(_)
            | Message::VfsReadReq(_)
            | Message::WriteResp(_)
            | Message::VfsWriteReq(_)
            | Message::CloseResp(_)
            | Message::VfsCloseReq(_)
            | Message::SelectResp(_) => {
                debug!("dropping message shaped for outbound use: {:?}", message);
                Ok(())
            },
        }
    }

    fn send(&self, dst: TaskId, message: Message) -> Result<(), BrokerError> {
        self.transport
            .send(dst, &message.encode())
            .map_err(|_| BrokerError::SendFailure(dst))
    }

    fn mount_task_for(&self, node_id: NodeId) -> Option<TaskId> {
        match self.nodes.node(node_id).node_type {
            NodeType::MountFile { mount_task } => Some(mount_task),
            NodeType::Directory => None,
        }
    }

    /// §4.1 "for server-originated messages the sender's process id equals
    /// the node's mount-server process id".
    fn sender_is_mount_server(&self, sender: TaskId, node_id: NodeId) -> bool {
        let mount_task = match self.mount_task_for(node_id) {
            Some(task) => task,
            None => return false,
        };
        match (
            self.transport.taskid_to_pid(sender),
            self.transport.taskid_to_pid(mount_task),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    // --- §4.4 Mount/Select (per-task) ------------------------------------

    fn handle_mount_req(&mut self, sender: TaskId, m: MountReq) -> Result<(), BrokerError> {
        let name = m.path.trim_start_matches('/');
        // §3 invariant: "every MountFile is a direct child of the root (the
        // broker only supports single-segment mount points in the current
        // core)". A path with an embedded '/' beyond the leading one would
        // otherwise create a node `lookup` can never walk to.
        if name.is_empty() || name.contains('/') {
            error!("mount: {:?} is not a single path segment", m.path);
            return self.send(sender, Message::MountResp(MountResp { result: WireResult::Failure }));
        }
        match self
            .nodes
            .create(NodeId::ROOT, name, &m.path, NodeType::MountFile { mount_task: sender })
        {
            Ok(_) => {
                debug!("mount: {:?} now served by {}", m.path, sender);
                self.send(sender, Message::MountResp(MountResp { result: WireResult::Success }))
            },
            Err(err) => {
                error!("mount: {:?} rejected: {}", m.path, err);
                self.send(sender, Message::MountResp(MountResp { result: WireResult::Failure }))
            },
        }
    }

    fn compute_select_hits(&self, reads: &[GlobalFd], writes: &[GlobalFd]) -> (Vec<GlobalFd>, Vec<GlobalFd>) {
        let ready_reads = reads
            .iter()
            .copied()
            .filter(|&fd| self.fd_has_readiness(fd, Ready::READ))
            .collect();
        let ready_writes = writes
            .iter()
            .copied()
            .filter(|&fd| self.fd_has_readiness(fd, Ready::WRITE))
            .collect();
        (ready_reads, ready_writes)
    }

    fn fd_has_readiness(&self, fd: GlobalFd, kind: Ready) -> bool {
        self.fds
            .get(fd)
            .map_or(false, |entry| self.nodes.node(entry.node).ready.contains(kind))
    }

    /// §4.1 "For `Select`: ... every referenced `global_fd` is owned by the
    /// sender's process." Unlike the per-FD ops this spans a whole vector of
    /// fds, so it is checked once up front rather than fd-by-fd inline.
    fn all_fds_owned_by(&self, sender: TaskId, fds: &[GlobalFd]) -> bool {
        let sender_pid = match self.transport.taskid_to_pid(sender) {
            Ok(pid) => pid,
            Err(_) => return false,
        };
        fds.iter().all(|&fd| {
            self.fds
                .get(fd)
                .map_or(false, |entry| entry.owner_pid.as_u32() == sender_pid.as_u32())
        })
    }

    fn handle_select_req(&mut self, sender: TaskId, m: SelectReq) -> Result<(), BrokerError> {
        if !self.all_fds_owned_by(sender, &m.read_fds) || !self.all_fds_owned_by(sender, &m.write_fds) {
            error!("select: {} watches a global_fd it does not own", sender);
            return self.send(
                sender,
                Message::SelectResp(SelectResp { result: WireResult::Failure, ready_reads: Vec::new(), ready_writes: Vec::new() }),
            );
        }
        // AwaitReady | SelectReq discards the stale watch (§4.4: "the task
        // cannot block on two Selects"); Init | SelectReq has nothing to
        // discard. Either way this call replaces whatever watch existed.
        let (ready_reads, ready_writes) = self.compute_select_hits(&m.read_fds, &m.write_fds);
        if !ready_reads.is_empty() || !ready_writes.is_empty() {
            self.tasks.set_state(sender, TaskState::Init);
            self.tasks.prune_if_idle(sender);
            self.send(
                sender,
                Message::SelectResp(SelectResp {
                    result: WireResult::Success,
                    ready_reads,
                    ready_writes,
                }),
            )
        } else {
            debug!("task {}: -> AwaitReady ({} reads, {} writes watched)", sender, m.read_fds.len(), m.write_fds.len());
            self.tasks.set_state(
                sender,
                TaskState::AwaitReady {
                    read_watch: m.read_fds,
                    write_watch: m.write_fds,
                },
            );
            Ok(())
        }
    }

    fn rescan_select_waiters(&mut self, node_id: NodeId) -> Result<(), BrokerError> {
        let ready = self.nodes.node(node_id).ready;
        for task_id in self.tasks.awaiting_ready() {
            let (read_watch, write_watch) = match self.tasks.get(task_id) {
                Some(entry) => match &entry.state {
                    TaskState::AwaitReady { read_watch, write_watch } => (read_watch.clone(), write_watch.clone()),
                    TaskState::Init => continue,
                },
                None => continue,
            };
            let ready_reads: Vec<GlobalFd> = read_watch
                .iter()
                .copied()
                .filter(|&fd| self.fds.get(fd).map_or(false, |e| e.node == node_id) && ready.contains(Ready::READ))
                .collect();
            let ready_writes: Vec<GlobalFd> = write_watch
                .iter()
                .copied()
                .filter(|&fd| self.fds.get(fd).map_or(false, |e| e.node == node_id) && ready.contains(Ready::WRITE))
                .collect();
            if !ready_reads.is_empty() || !ready_writes.is_empty() {
                self.tasks.set_state(task_id, TaskState::Init);
                self.tasks.prune_if_idle(task_id);
                self.send(
                    task_id,
                    Message::SelectResp(SelectResp {
                        result: WireResult::Success,
                        ready_reads,
                        ready_writes,
                    }),
                )?;
            }
        }
        Ok(())
    }

    fn handle_vfs_ready_ntc(&mut self, sender: TaskId, m: VfsReadyNtc) -> Result<(), BrokerError> {
        let node_id = match self.nodes.lookup(&m.path) {
            Some(id) => id,
            None => {
                error!("VfsReadyNtc for unknown path {:?} from {}", m.path, sender);
                return Ok(());
            },
        };
        if !self.sender_is_mount_server(sender, node_id) {
            error!("VfsReadyNtc for {:?} from non-owning task {}", m.path, sender);
            return Ok(());
        }
        self.nodes.set_ready(node_id, m.ready);
        self.rescan_select_waiters(node_id)
    }

    // --- §4.3 Open/Read/Write/Close (per-FD) ------------------------------

    fn handle_open_req(&mut self, sender: TaskId, m: OpenReq) -> Result<(), BrokerError> {
        let fail = Message::OpenResp(OpenResp { result: WireResult::Failure, global_fd: GlobalFd::NONE });

        let node_id = match self.nodes.lookup(&m.path) {
            Some(id) => id,
            None => {
                error!("open: {:?}: {}", m.path, BrokerError::NodeNotFound);
                return self.send(sender, fail);
            },
        };
        let mount_task = match self.mount_task_for(node_id) {
            Some(task) => task,
            None => {
                error!("open: {:?}: {}", m.path, BrokerError::NodeWrongType);
                return self.send(sender, fail);
            },
        };
        let owner_pid = match self.transport.taskid_to_pid(sender) {
            Ok(kpid) => WirePid(kpid.as_u32()),
            Err(_) => {
                error!("open: could not resolve pid for {}", sender);
                return self.send(sender, fail);
            },
        };
        let global_fd = match self.fds.alloc(m.local_fd, sender, owner_pid, node_id) {
            Ok(fd) => fd,
            Err(err) => {
                error!("open: {}", err);
                return self.send(sender, fail);
            },
        };
        self.fds.get_mut(global_fd).expect("just allocated").state = FdState::AwaitVfsOpen;
        debug!("fd {:?}: Init -> AwaitVfsOpen (OpenReq from {})", global_fd, sender);

        let request = Message::VfsOpenReq(VfsOpenReq { pid: owner_pid, global_fd, path: m.path });
        if self.send(mount_task, request).is_err() {
            self.fds.free(global_fd);
            error!("open: send to mount server {} failed, releasing {:?}", mount_task, global_fd);
        }
        Ok(())
    }

    fn handle_vfs_open_resp(&mut self, sender: TaskId, m: VfsOpenResp) -> Result<(), BrokerError> {
        let (node_id, requester) = match self.fds.get(m.global_fd) {
            Some(e) if e.state == FdState::AwaitVfsOpen => (e.node, e.owner_task),
            _ => {
                debug!("{}: {:?}", BrokerError::LatePairingLoss, m.global_fd);
                return Ok(());
            },
        };
        if !self.sender_is_mount_server(sender, node_id) {
            error!("{} from task {}: {:?}", BrokerError::WrongOwnerProcess(m.global_fd), sender, m.global_fd);
            return Ok(());
        }
        match m.result {
            WireResult::Success => {
                self.fds.get_mut(m.global_fd).expect("checked above").state = FdState::Init;
                debug!("fd {:?}: AwaitVfsOpen -> Init", m.global_fd);
            },
            WireResult::Failure => {
                self.fds.free(m.global_fd);
                debug!("fd {:?}: AwaitVfsOpen -> Terminated (Failure)", m.global_fd);
            },
        }
        self.send(requester, Message::OpenResp(OpenResp { result: m.result, global_fd: m.global_fd }))
    }

    fn owner_pid_matches(&self, sender: TaskId, owner_pid: WirePid) -> bool {
        matches!(self.transport.taskid_to_pid(sender), Ok(kpid) if WirePid(kpid.as_u32()) == owner_pid)
    }

    fn handle_read_req(&mut self, sender: TaskId, m: ReadReq) -> Result<(), BrokerError> {
        let fail = Message::ReadResp(ReadResp { result: WireResult::Failure, payload: Vec::new() });
        let (node_id, owner_pid, state) = match self.fds.get(m.global_fd) {
            Some(e) => (e.node, e.owner_pid, e.state),
            None => {
                error!("read: {}", BrokerError::UnknownFd(m.global_fd));
                return self.send(sender, fail);
            },
        };
        if !self.owner_pid_matches(sender, owner_pid) {
            error!("read: {} by task {}", BrokerError::WrongOwnerProcess(m.global_fd), sender);
            return self.send(sender, fail);
        }
        if state != FdState::Init {
            debug!("read: {:?} busy in {:?}, discarding request", m.global_fd, state);
            return Ok(());
        }
        let mount_task = self.mount_task_for(node_id).expect("open-time invariant: fd's node is a mount file");
        self.fds.get_mut(m.global_fd).expect("checked above").state = FdState::AwaitVfsRead;
        debug!("fd {:?}: Init -> AwaitVfsRead", m.global_fd);

        let request = Message::VfsReadReq(VfsReadReq { global_fd: m.global_fd, read_idx: m.read_idx, size: m.size });
        if self.send(mount_task, request).is_err() {
            self.fds.get_mut(m.global_fd).expect("checked above").state = FdState::Init;
            error!("read: send to mount server {} failed for {:?}", mount_task, m.global_fd);
        }
        Ok(())
    }

    fn handle_vfs_read_resp(&mut self, sender: TaskId, m: VfsReadResp) -> Result<(), BrokerError> {
        let (node_id, requester) = match self.fds.get(m.global_fd) {
            Some(e) if e.state == FdState::AwaitVfsRead => (e.node, e.owner_task),
            _ => {
                debug!("{}: {:?}", BrokerError::LatePairingLoss, m.global_fd);
                return Ok(());
            },
        };
        if !self.sender_is_mount_server(sender, node_id) {
            error!("{} from task {}: {:?}", BrokerError::WrongOwnerProcess(m.global_fd), sender, m.global_fd);
            return Ok(());
        }
        self.nodes.apply_ready_hint(node_id, Ready::READ, m.ready);
        if let Some(entry) = self.fds.get_mut(m.global_fd) {
            entry.state = FdState::Init;
        }
        debug!("fd {:?}: AwaitVfsRead -> Init", m.global_fd);
        self.rescan_select_waiters(node_id)?;
        self.send(requester, Message::ReadResp(ReadResp { result: m.result, payload: m.payload }))
    }

    fn handle_write_req(&mut self, sender: TaskId, m: WriteReq) -> Result<(), BrokerError> {
        let fail = Message::WriteResp(WriteResp { result: WireResult::Failure, size: 0 });
        let (node_id, owner_pid, state) = match self.fds.get(m.global_fd) {
            Some(e) => (e.node, e.owner_pid, e.state),
            None => {
                error!("write: {}", BrokerError::UnknownFd(m.global_fd));
                return self.send(sender, fail);
            },
        };
        if !self.owner_pid_matches(sender, owner_pid) {
            error!("write: {} by task {}", BrokerError::WrongOwnerProcess(m.global_fd), sender);
            return self.send(sender, fail);
        }
        if state != FdState::Init {
            debug!("write: {:?} busy in {:?}, discarding request", m.global_fd, state);
            return Ok(());
        }
        let mount_task = self.mount_task_for(node_id).expect("open-time invariant: fd's node is a mount file");
        self.fds.get_mut(m.global_fd).expect("checked above").state = FdState::AwaitVfsWrite;
        debug!("fd {:?}: Init -> AwaitVfsWrite", m.global_fd);

        let request = Message::VfsWriteReq(VfsWriteReq { global_fd: m.global_fd, write_idx: m.write_idx, payload: m.payload });
        if self.send(mount_task, request).is_err() {
            self.fds.get_mut(m.global_fd).expect("checked above").state = FdState::Init;
            error!("write: send to mount server {} failed for {:?}", mount_task, m.global_fd);
        }
        Ok(())
    }

    fn handle_vfs_write_resp(&mut self, sender: TaskId, m: VfsWriteResp) -> Result<(), BrokerError> {
        let (node_id, requester) = match self.fds.get(m.global_fd) {
            Some(e) if e.state == FdState::AwaitVfsWrite => (e.node, e.owner_task),
            _ => {
                debug!("{}: {:?}", BrokerError::LatePairingLoss, m.global_fd);
                return Ok(());
            },
        };
        if !self.sender_is_mount_server(sender, node_id) {
            error!("{} from task {}: {:?}", BrokerError::WrongOwnerProcess(m.global_fd), sender, m.global_fd);
            return Ok(());
        }
        self.nodes.apply_ready_hint(node_id, Ready::WRITE, m.ready);
        if let Some(entry) = self.fds.get_mut(m.global_fd) {
            entry.state = FdState::Init;
        }
        debug!("fd {:?}: AwaitVfsWrite -> Init", m.global_fd);
        self.rescan_select_waiters(node_id)?;
        self.send(requester, Message::WriteResp(WriteResp { result: m.result, size: m.size }))
    }

    fn handle_close_req(&mut self, sender: TaskId, m: CloseReq) -> Result<(), BrokerError> {
        let fail = Message::CloseResp(CloseResp { result: WireResult::Failure });
        let (node_id, owner_pid, state) = match self.fds.get(m.global_fd) {
            Some(e) => (e.node, e.owner_pid, e.state),
            None => {
                error!("close: {}", BrokerError::UnknownFd(m.global_fd));
                return self.send(sender, fail);
            },
        };
        if !self.owner_pid_matches(sender, owner_pid) {
            error!("close: {} by task {}", BrokerError::WrongOwnerProcess(m.global_fd), sender);
            return self.send(sender, fail);
        }
        if state != FdState::Init {
            debug!("close: {:?} busy in {:?}, discarding request", m.global_fd, state);
            return Ok(());
        }
        let mount_task = self.mount_task_for(node_id).expect("open-time invariant: fd's node is a mount file");
        self.fds.get_mut(m.global_fd).expect("checked above").state = FdState::AwaitVfsClose;
        debug!("fd {:?}: Init -> AwaitVfsClose", m.global_fd);

        let request = Message::VfsCloseReq(VfsCloseReq { global_fd: m.global_fd });
        if self.send(mount_task, request).is_err() {
            self.fds.get_mut(m.global_fd).expect("checked above").state = FdState::Init;
            error!("close: send to mount server {} failed for {:?}", mount_task, m.global_fd);
        }
        Ok(())
    }

    fn handle_vfs_close_resp(&mut self, sender: TaskId, m: VfsCloseResp) -> Result<(), BrokerError> {
        let (node_id, requester) = match self.fds.get(m.global_fd) {
            Some(e) if e.state == FdState::AwaitVfsClose => (e.node, e.owner_task),
            _ => {
                debug!("{}: {:?}", BrokerError::LatePairingLoss, m.global_fd);
                return Ok(());
            },
        };
        if !self.sender_is_mount_server(sender, node_id) {
            error!("{} from task {}: {:?}", BrokerError::WrongOwnerProcess(m.global_fd), sender, m.global_fd);
            return Ok(());
        }
        // Released regardless of result (§9 open question decision): the
        // client cannot address the fd after this reply either way.
        self.fds.free(m.global_fd);
        debug!("fd {:?}: AwaitVfsClose -> Terminated", m.global_fd);
        self.send(requester, Message::CloseResp(CloseResp { result: m.result }))
    }
}

pub fn log_startup(task_name: &str) {
    info!("vfsb-broker registered as {:?}, entering dispatch loop", task_name);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vfsb_kernel::local::{LocalBus, LocalTransport};
    use vfsb_kernel::Pid as KernelPid;

    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn recv_one(transport: &LocalTransport) -> Message {
        let mut buf = [0u8; 4096];
        let (_, n) = transport.recv(&mut buf, Some(TIMEOUT)).expect("expected a reply");
        Message::decode(&buf, n).expect("decode reply")
    }

    fn no_reply(transport: &LocalTransport) {
        let mut buf = [0u8; 4096];
        assert!(transport.recv(&mut buf, Some(TIMEOUT)).is_err(), "expected no reply");
    }

    /// Wires up a broker plus two client handles (a mount server T1 and a
    /// regular client T2) on one `LocalBus`, and mounts "/console" served by
    /// T1 so every scenario can start from a clean, already-mounted broker.
    struct Harness {
        broker: Broker<LocalTransport>,
        t1: LocalTransport,
        t2: LocalTransport,
    }

    impl Harness {
        fn new() -> Self {
            let bus = LocalBus::new();
            let broker_transport = bus.spawn(KernelPid(0));
            let t1 = bus.spawn(KernelPid(1));
            let t2 = bus.spawn(KernelPid(2));
            let broker = Broker::new(broker_transport, 4096);
            Self { broker, t1, t2 }
        }
    }

    #[test]
    fn s1_mount_then_open() {
        let mut h = Harness::new();

        h.t1.send(h.broker.transport.task_id(), &Message::MountReq(MountReq { path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        assert_eq!(recv_one(&h.t1), Message::MountResp(MountResp { result: WireResult::Success }));

        h.t2.send(h.broker.transport.task_id(), &Message::OpenReq(OpenReq { local_fd: 3, path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        let forwarded = recv_one(&h.t1);
        let (global_fd, path) = match forwarded {
            Message::VfsOpenReq(m) => (m.global_fd, m.path),
            other => panic!("expected VfsOpenReq, got {:?}", other),
        };
        assert_eq!(path, "/console");

        h.t1.send(
            h.broker.transport.task_id(),
            &Message::VfsOpenResp(VfsOpenResp { global_fd, result: WireResult::Success }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        assert_eq!(
            recv_one(&h.t2),
            Message::OpenResp(OpenResp { result: WireResult::Success, global_fd })
        );
    }

    #[test]
    fn s2_select_blocks_then_wakes_on_ready_notification() {
        let mut h = Harness::new();
        h.t1.send(h.broker.transport.task_id(), &Message::MountReq(MountReq { path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        let _ = recv_one(&h.t1);

        h.t2.send(h.broker.transport.task_id(), &Message::OpenReq(OpenReq { local_fd: 3, path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        let global_fd = match recv_one(&h.t1) {
            Message::VfsOpenReq(m) => m.global_fd,
            other => panic!("expected VfsOpenReq, got {:?}", other),
        };
        h.t1.send(h.broker.transport.task_id(), &Message::VfsOpenResp(VfsOpenResp { global_fd, result: WireResult::Success }).encode()).unwrap();
        h.broker.step().unwrap();
        let _ = recv_one(&h.t2);

        // Readiness starts at {Read, Write}: an immediate Select hit.
        h.t2.send(
            h.broker.transport.task_id(),
            &Message::SelectReq(SelectReq { read_fds: vec![global_fd], write_fds: vec![] }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        assert_eq!(
            recv_one(&h.t2),
            Message::SelectResp(SelectResp { result: WireResult::Success, ready_reads: vec![global_fd], ready_writes: vec![] })
        );

        // Drop readiness to {Write} only; a read-watching Select now blocks.
        h.t1.send(
            h.broker.transport.task_id(),
            &Message::VfsReadyNtc(VfsReadyNtc { path: "/console".to_owned(), ready: Ready::WRITE }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();

        h.t2.send(
            h.broker.transport.task_id(),
            &Message::SelectReq(SelectReq { read_fds: vec![global_fd], write_fds: vec![] }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        no_reply(&h.t2);

        // Restoring Read wakes the pending Select.
        h.t1.send(
            h.broker.transport.task_id(),
            &Message::VfsReadyNtc(VfsReadyNtc { path: "/console".to_owned(), ready: Ready::READ | Ready::WRITE }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        assert_eq!(
            recv_one(&h.t2),
            Message::SelectResp(SelectResp { result: WireResult::Success, ready_reads: vec![global_fd], ready_writes: vec![] })
        );
    }

    #[test]
    fn s3_late_vfs_open_resp_is_discarded() {
        let mut h = Harness::new();
        h.t1.send(h.broker.transport.task_id(), &Message::MountReq(MountReq { path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        let _ = recv_one(&h.t1);

        // No OpenReq was ever issued, so global_fd 0 is still in `Init`, not
        // `AwaitVfsOpen`; a stray response for it must be silently dropped.
        h.t1.send(
            h.broker.transport.task_id(),
            &Message::VfsOpenResp(VfsOpenResp { global_fd: GlobalFd(0), result: WireResult::Success }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        no_reply(&h.t2);
    }

    #[test]
    fn s4_close_on_unknown_fd_fails_without_forwarding() {
        let mut h = Harness::new();
        h.t2.send(
            h.broker.transport.task_id(),
            &Message::CloseReq(CloseReq { global_fd: GlobalFd(0xDEAD) }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        assert_eq!(recv_one(&h.t2), Message::CloseResp(CloseResp { result: WireResult::Failure }));
        no_reply(&h.t1);
    }

    #[test]
    fn s5_cross_process_read_is_rejected() {
        let mut h = Harness::new();
        h.t1.send(h.broker.transport.task_id(), &Message::MountReq(MountReq { path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        let _ = recv_one(&h.t1);

        h.t2.send(h.broker.transport.task_id(), &Message::OpenReq(OpenReq { local_fd: 3, path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        let global_fd = match recv_one(&h.t1) {
            Message::VfsOpenReq(m) => m.global_fd,
            other => panic!("expected VfsOpenReq, got {:?}", other),
        };
        h.t1.send(h.broker.transport.task_id(), &Message::VfsOpenResp(VfsOpenResp { global_fd, result: WireResult::Success }).encode()).unwrap();
        h.broker.step().unwrap();
        let _ = recv_one(&h.t2);

        // T1 is the mount server, not the fd's owning process (T2); it may
        // not read through a descriptor it does not own.
        h.t1.send(
            h.broker.transport.task_id(),
            &Message::ReadReq(ReadReq { global_fd, read_idx: 0, size: 16 }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        assert_eq!(
            recv_one(&h.t1),
            Message::ReadResp(ReadResp { result: WireResult::Failure, payload: Vec::new() })
        );
    }

    #[test]
    fn mount_rejects_multi_segment_path() {
        let mut h = Harness::new();
        h.t1.send(
            h.broker.transport.task_id(),
            &Message::MountReq(MountReq { path: "/dev/console".to_owned() }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        assert_eq!(recv_one(&h.t1), Message::MountResp(MountResp { result: WireResult::Failure }));
    }

    #[test]
    fn select_on_fd_owned_by_another_process_is_rejected() {
        let mut h = Harness::new();
        h.t1.send(h.broker.transport.task_id(), &Message::MountReq(MountReq { path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        let _ = recv_one(&h.t1);

        h.t2.send(h.broker.transport.task_id(), &Message::OpenReq(OpenReq { local_fd: 3, path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        let global_fd = match recv_one(&h.t1) {
            Message::VfsOpenReq(m) => m.global_fd,
            other => panic!("expected VfsOpenReq, got {:?}", other),
        };
        h.t1.send(h.broker.transport.task_id(), &Message::VfsOpenResp(VfsOpenResp { global_fd, result: WireResult::Success }).encode()).unwrap();
        h.broker.step().unwrap();
        let _ = recv_one(&h.t2);

        // T1 (the mount server) tries to watch a descriptor T2 owns.
        h.t1.send(
            h.broker.transport.task_id(),
            &Message::SelectReq(SelectReq { read_fds: vec![global_fd], write_fds: vec![] }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        assert_eq!(
            recv_one(&h.t1),
            Message::SelectResp(SelectResp { result: WireResult::Failure, ready_reads: vec![], ready_writes: vec![] })
        );
    }

    #[test]
    fn s6_readiness_clears_after_read() {
        let mut h = Harness::new();
        h.t1.send(h.broker.transport.task_id(), &Message::MountReq(MountReq { path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        let _ = recv_one(&h.t1);

        h.t2.send(h.broker.transport.task_id(), &Message::OpenReq(OpenReq { local_fd: 3, path: "/console".to_owned() }).encode()).unwrap();
        h.broker.step().unwrap();
        let global_fd = match recv_one(&h.t1) {
            Message::VfsOpenReq(m) => m.global_fd,
            other => panic!("expected VfsOpenReq, got {:?}", other),
        };
        h.t1.send(h.broker.transport.task_id(), &Message::VfsOpenResp(VfsOpenResp { global_fd, result: WireResult::Success }).encode()).unwrap();
        h.broker.step().unwrap();
        let _ = recv_one(&h.t2);

        h.t2.send(
            h.broker.transport.task_id(),
            &Message::ReadReq(ReadReq { global_fd, read_idx: 0, size: 16 }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        let _ = recv_one(&h.t1); // VfsReadReq forwarded to the mount server.

        h.t1.send(
            h.broker.transport.task_id(),
            &Message::VfsReadResp(VfsReadResp {
                global_fd,
                result: WireResult::Success,
                ready: Ready::empty(),
                payload: vec![0u8; 16],
            })
            .encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        assert_eq!(
            recv_one(&h.t2),
            Message::ReadResp(ReadResp { result: WireResult::Success, payload: vec![0u8; 16] })
        );

        // Readiness is now {Write} only; a read-watching Select must block.
        h.t2.send(
            h.broker.transport.task_id(),
            &Message::SelectReq(SelectReq { read_fds: vec![global_fd], write_fds: vec![] }).encode(),
        )
        .unwrap();
        h.broker.step().unwrap();
        no_reply(&h.t2);
    }
}
