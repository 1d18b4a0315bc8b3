//! Per-message bodies (§6.2) and the top-level `Message` enum that ties a
//! decoded header to its body. Each body type is a plain struct; decoding a
//! buffer without first knowing its shape is impossible by construction,
//! which is the point of making every per-FD state hold only the message
//! variants it is legal to receive (§9 "Polymorphism via function-pointer
//! tables").

use crate::error::CodecError;
use crate::header::{
    read_u32, read_u64, write_u32, write_u64, FuncId, Header, MsgType, Ready, WireResult,
    GLOBAL_FD_NONE, HEADER_SIZE,
};
use crate::path::{decode_path, encode_path, PATH_FIELD_SIZE};

/// A process id, as reported by the kernel's `taskid_to_pid` (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

/// A globally unique file descriptor, or `None` for the wire sentinel (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalFd(pub u32);

impl GlobalFd {
    pub const NONE: GlobalFd = GlobalFd(GLOBAL_FD_NONE);

    fn decode(buf: &[u8], offset: usize) -> Self {
        Self(read_u32(buf, offset))
    }

    fn encode(self, out: &mut Vec<u8>) {
        write_u32(out, self.0);
    }
}

macro_rules! check_body_len {
    ($buf:expr, $size:expr) => {
        if $buf.len() < $size {
            return Err(CodecError::UndersizeBody);
        }
    };
}

/// Checks that `offset + 4 + size` bytes are actually present, and returns the
/// payload slice. Guards against a forged `size` claiming more than was sent.
fn take_payload(buf: &[u8], size_offset: usize, payload_offset: usize) -> Result<&[u8], CodecError> {
    let size = read_u32(buf, size_offset) as usize;
    if buf.len() < payload_offset + size {
        return Err(CodecError::UndersizePayload);
    }
    Ok(&buf[payload_offset..payload_offset + size])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountReq {
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountResp {
    pub result: WireResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReq {
    pub local_fd: u32,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenResp {
    pub result: WireResult,
    pub global_fd: GlobalFd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsOpenReq {
    pub pid: Pid,
    pub global_fd: GlobalFd,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsOpenResp {
    pub global_fd: GlobalFd,
    pub result: WireResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReq {
    pub global_fd: GlobalFd,
    pub read_idx: u64,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResp {
    pub result: WireResult,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsReadReq {
    pub global_fd: GlobalFd,
    pub read_idx: u64,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsReadResp {
    pub global_fd: GlobalFd,
    pub result: WireResult,
    pub ready: Ready,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReq {
    pub global_fd: GlobalFd,
    pub write_idx: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResp {
    pub result: WireResult,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsWriteReq {
    pub global_fd: GlobalFd,
    pub write_idx: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsWriteResp {
    pub global_fd: GlobalFd,
    pub result: WireResult,
    pub ready: Ready,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReq {
    pub global_fd: GlobalFd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseResp {
    pub result: WireResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsCloseReq {
    pub global_fd: GlobalFd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsCloseResp {
    pub global_fd: GlobalFd,
    pub result: WireResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectReq {
    pub read_fds: Vec<GlobalFd>,
    pub write_fds: Vec<GlobalFd>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectResp {
    pub result: WireResult,
    pub ready_reads: Vec<GlobalFd>,
    pub ready_writes: Vec<GlobalFd>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsReadyNtc {
    pub path: String,
    pub ready: Ready,
}

/// Every message shape the broker can send or receive, tagged by its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    MountReq(MountReq),
    MountResp(MountResp),
    OpenReq(OpenReq),
    OpenResp(OpenResp),
    VfsOpenReq(VfsOpenReq),
    VfsOpenResp(VfsOpenResp),
    ReadReq(ReadReq),
    ReadResp(ReadResp),
    VfsReadReq(VfsReadReq),
    VfsReadResp(VfsReadResp),
    WriteReq(WriteReq),
    WriteResp(WriteResp),
    VfsWriteReq(VfsWriteReq),
    VfsWriteResp(VfsWriteResp),
    CloseReq(CloseReq),
    CloseResp(CloseResp),
    VfsCloseReq(VfsCloseReq),
    VfsCloseResp(VfsCloseResp),
    SelectReq(SelectReq),
    SelectResp(SelectResp),
    VfsReadyNtc(VfsReadyNtc),
}

impl Message {
    pub fn func_id(&self) -> FuncId {
        match self {
            Self::MountReq(_) | Self::MountResp(_) => FuncId::Mount,
            Self::OpenReq(_) | Self::OpenResp(_) => FuncId::Open,
            Self::VfsOpenReq(_) | Self::VfsOpenResp(_) => FuncId::VfsOpen,
            Self::ReadReq(_) | Self::ReadResp(_) => FuncId::Read,
            Self::VfsReadReq(_) | Self::VfsReadResp(_) => FuncId::VfsRead,
            Self::WriteReq(_) | Self::WriteResp(_) => FuncId::Write,
            Self::VfsWriteReq(_) | Self::VfsWriteResp(_) => FuncId::VfsWrite,
            Self::CloseReq(_) | Self::CloseResp(_) => FuncId::Close,
            Self::VfsCloseReq(_) | Self::VfsCloseResp(_) => FuncId::VfsClose,
            Self::SelectReq(_) | Self::SelectResp(_) => FuncId::Select,
            Self::VfsReadyNtc(_) => FuncId::VfsReady,
        }
    }

    /// Decodes one message from a buffer exactly as received from the kernel
    /// transport. `received` is the number of valid bytes in `buf` (a receive
    /// buffer may be larger than the datagram it holds).
    pub fn decode(buf: &[u8], received: usize) -> Result<Self, CodecError> {
        let buf = &buf[..received];
        let header = Header::decode(buf)?;
        let body = &buf[HEADER_SIZE..];
        Ok(match (header.func_id, header.msg_type) {
            (FuncId::Mount, MsgType::Request) => {
                check_body_len!(body, PATH_FIELD_SIZE);
                Self::MountReq(MountReq {
                    path: decode_path(body, 0)?,
                })
            },
            (FuncId::Mount, MsgType::Response) => {
                check_body_len!(body, 4);
                Self::MountResp(MountResp {
                    result: WireResult::from_u32(read_u32(body, 0))?,
                })
            },
            (FuncId::Open, MsgType::Request) => {
                check_body_len!(body, 4 + PATH_FIELD_SIZE);
                Self::OpenReq(OpenReq {
                    local_fd: read_u32(body, 0),
                    path: decode_path(body, 4)?,
                })
            },
            (FuncId::Open, MsgType::Response) => {
                check_body_len!(body, 4 + 4);
                Self::OpenResp(OpenResp {
                    result: WireResult::from_u32(read_u32(body, 0))?,
                    global_fd: GlobalFd::decode(body, 4),
                })
            },
            (FuncId::VfsOpen, MsgType::Request) => {
                check_body_len!(body, 4 + 4 + PATH_FIELD_SIZE);
                Self::VfsOpenReq(VfsOpenReq {
                    pid: Pid(read_u32(body, 0)),
                    global_fd: GlobalFd::decode(body, 4),
                    path: decode_path(body, 8)?,
                })
            },
            (FuncId::VfsOpen, MsgType::Response) => {
                check_body_len!(body, 4 + 4);
                Self::VfsOpenResp(VfsOpenResp {
                    global_fd: GlobalFd::decode(body, 0),
                    result: WireResult::from_u32(read_u32(body, 4))?,
                })
            },
            (FuncId::Read, MsgType::Request) => {
                check_body_len!(body, 4 + 8 + 4);
                Self::ReadReq(ReadReq {
                    global_fd: GlobalFd::decode(body, 0),
                    read_idx: read_u64(body, 4),
                    size: read_u32(body, 12),
                })
            },
            (FuncId::Read, MsgType::Response) => {
                check_body_len!(body, 8);
                let payload = take_payload(body, 4, 8)?.to_vec();
                Self::ReadResp(ReadResp {
                    result: WireResult::from_u32(read_u32(body, 0))?,
                    payload,
                })
            },
            (FuncId::VfsRead, MsgType::Request) => {
                check_body_len!(body, 4 + 8 + 4);
                Self::VfsReadReq(VfsReadReq {
                    global_fd: GlobalFd::decode(body, 0),
                    read_idx: read_u64(body, 4),
                    size: read_u32(body, 12),
                })
            },
            (FuncId::VfsRead, MsgType::Response) => {
                check_body_len!(body, 4 + 4 + 4);
                let payload = take_payload(body, 12, 16)?.to_vec();
                Self::VfsReadResp(VfsReadResp {
                    global_fd: GlobalFd::decode(body, 0),
                    result: WireResult::from_u32(read_u32(body, 4))?,
                    ready: Ready::from_wire(read_u32(body, 8))?,
                    payload,
                })
            },
            (FuncId::Write, MsgType::Request) => {
                check_body_len!(body, 4 + 8 + 4);
                let payload = take_payload(body, 12, 16)?.to_vec();
                Self::WriteReq(WriteReq {
                    global_fd: GlobalFd::decode(body, 0),
                    write_idx: read_u64(body, 4),
                    payload,
                })
            },
            (FuncId::Write, MsgType::Response) => {
                check_body_len!(body, 4 + 4);
                Self::WriteResp(WriteResp {
                    result: WireResult::from_u32(read_u32(body, 0))?,
                    size: read_u32(body, 4),
                })
            },
            (FuncId::VfsWrite, MsgType::Request) => {
                check_body_len!(body, 4 + 8 + 4);
                let payload = take_payload(body, 12, 16)?.to_vec();
                Self::VfsWriteReq(VfsWriteReq {
                    global_fd: GlobalFd::decode(body, 0),
                    write_idx: read_u64(body, 4),
                    payload,
                })
            },
            (FuncId::VfsWrite, MsgType::Response) => {
                check_body_len!(body, 4 + 4 + 4 + 4);
                Self::VfsWriteResp(VfsWriteResp {
                    global_fd: GlobalFd::decode(body, 0),
                    result: WireResult::from_u32(read_u32(body, 4))?,
                    ready: Ready::from_wire(read_u32(body, 8))?,
                    size: read_u32(body, 12),
                })
            },
            (FuncId::Close, MsgType::Request) => {
                check_body_len!(body, 4);
                Self::CloseReq(CloseReq {
                    global_fd: GlobalFd::decode(body, 0),
                })
            },
            (FuncId::Close, MsgType::Response) => {
                check_body_len!(body, 4);
                Self::CloseResp(CloseResp {
                    result: WireResult::from_u32(read_u32(body, 0))?,
                })
            },
            (FuncId::VfsClose, MsgType::Request) => {
                check_body_len!(body, 4);
                Self::VfsCloseReq(VfsCloseReq {
                    global_fd: GlobalFd::decode(body, 0),
                })
            },
            (FuncId::VfsClose, MsgType::Response) => {
                check_body_len!(body, 4 + 4);
                Self::VfsCloseResp(VfsCloseResp {
                    global_fd: GlobalFd::decode(body, 0),
                    result: WireResult::from_u32(read_u32(body, 4))?,
                })
            },
            (FuncId::Select, MsgType::Request) => {
                check_body_len!(body, 4 + 4);
                let read_count = read_u32(body, 0) as usize;
                let write_count = read_u32(body, 4) as usize;
                let total = read_count
                    .checked_add(write_count)
                    .ok_or(CodecError::SelectCountOverflow)?;
                let fds_bytes = total
                    .checked_mul(4)
                    .ok_or(CodecError::SelectCountOverflow)?;
                check_body_len!(body, 8 + fds_bytes);
                let mut read_fds = Vec::with_capacity(read_count);
                for i in 0..read_count {
                    read_fds.push(GlobalFd::decode(body, 8 + i * 4));
                }
                let mut write_fds = Vec::with_capacity(write_count);
                for i in 0..write_count {
                    write_fds.push(GlobalFd::decode(body, 8 + read_count * 4 + i * 4));
                }
                Self::SelectReq(SelectReq {
                    read_fds,
                    write_fds,
                })
            },
            (FuncId::Select, MsgType::Response) => {
                check_body_len!(body, 4 + 4 + 4);
                let ready_read_count = read_u32(body, 4) as usize;
                let ready_write_count = read_u32(body, 8) as usize;
                let total = ready_read_count
                    .checked_add(ready_write_count)
                    .ok_or(CodecError::SelectCountOverflow)?;
                let fds_bytes = total
                    .checked_mul(4)
                    .ok_or(CodecError::SelectCountOverflow)?;
                check_body_len!(body, 12 + fds_bytes);
                let mut ready_reads = Vec::with_capacity(ready_read_count);
                for i in 0..ready_read_count {
                    ready_reads.push(GlobalFd::decode(body, 12 + i * 4));
                }
                let mut ready_writes = Vec::with_capacity(ready_write_count);
                for i in 0..ready_write_count {
                    ready_writes.push(GlobalFd::decode(body, 12 + ready_read_count * 4 + i * 4));
                }
                Self::SelectResp(SelectResp {
                    result: WireResult::from_u32(read_u32(body, 0))?,
                    ready_reads,
                    ready_writes,
                })
            },
            (FuncId::VfsReady, MsgType::Notification) => {
                check_body_len!(body, PATH_FIELD_SIZE + 4);
                Self::VfsReadyNtc(VfsReadyNtc {
                    path: decode_path(body, 0)?,
                    ready: Ready::from_wire(read_u32(body, PATH_FIELD_SIZE))?,
                })
            },
            // `Header::decode` already rejected every `(func_id, msg_type)`
            // combination `FuncId::carries` says is structurally invalid
            // (e.g. `VfsReady` tagged as anything but `Notification`), so
            // every remaining combination is handled above.
            (FuncId::VfsReady, MsgType::Request) | (FuncId::VfsReady, MsgType::Response) => {
                unreachable!("Header::decode rejects this combination before we get here")
            },
        })
    }

    /// Encodes this message to wire bytes, header included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + PATH_FIELD_SIZE);
        let msg_type = match self {
            Self::MountReq(_)
            | Self::OpenReq(_)
            | Self::VfsOpenReq(_)
            | Self::ReadReq(_)
            | Self::VfsReadReq(_)
            | Self::WriteReq(_)
            | Self::VfsWriteReq(_)
            | Self::CloseReq(_)
            | Self::VfsCloseReq(_)
            | Self::SelectReq(_) => MsgType::Request,
            Self::MountResp(_)
            | Self::OpenResp(_)
            | Self::VfsOpenResp(_)
            | Self::ReadResp(_)
            | Self::VfsReadResp(_)
            | Self::WriteResp(_)
            | Self::VfsWriteResp(_)
            | Self::CloseResp(_)
            | Self::VfsCloseResp(_)
            | Self::SelectResp(_) => MsgType::Response,
            Self::VfsReadyNtc(_) => MsgType::Notification,
        };
        Header {
            func_id: self.func_id(),
            msg_type,
        }
        .encode(&mut out);

        match self {
            Self::MountReq(m) => encode_path(&mut out, &m.path),
            Self::MountResp(m) => write_u32(&mut out, m.result.as_u32()),
            Self::OpenReq(m) => {
                write_u32(&mut out, m.local_fd);
                encode_path(&mut out, &m.path);
            },
            Self::OpenResp(m) => {
                write_u32(&mut out, m.result.as_u32());
                m.global_fd.encode(&mut out);
            },
            Self::VfsOpenReq(m) => {
                write_u32(&mut out, m.pid.0);
                m.global_fd.encode(&mut out);
                encode_path(&mut out, &m.path);
            },
            Self::VfsOpenResp(m) => {
                m.global_fd.encode(&mut out);
                write_u32(&mut out, m.result.as_u32());
            },
            Self::ReadReq(m) => {
                m.global_fd.encode(&mut out);
                write_u64(&mut out, m.read_idx);
                write_u32(&mut out, m.size);
            },
            Self::ReadResp(m) => {
                write_u32(&mut out, m.result.as_u32());
                write_u32(&mut out, m.payload.len() as u32);
                out.extend_from_slice(&m.payload);
            },
            Self::VfsReadReq(m) => {
                m.global_fd.encode(&mut out);
                write_u64(&mut out, m.read_idx);
                write_u32(&mut out, m.size);
            },
            Self::VfsReadResp(m) => {
                m.global_fd.encode(&mut out);
                write_u32(&mut out, m.result.as_u32());
                write_u32(&mut out, m.ready.bits());
                write_u32(&mut out, m.payload.len() as u32);
                out.extend_from_slice(&m.payload);
            },
            Self::WriteReq(m) => {
                m.global_fd.encode(&mut out);
                write_u64(&mut out, m.write_idx);
                write_u32(&mut out, m.payload.len() as u32);
                out.extend_from_slice(&m.payload);
            },
            Self::WriteResp(m) => {
                write_u32(&mut out, m.result.as_u32());
                write_u32(&mut out, m.size);
            },
            Self::VfsWriteReq(m) => {
                m.global_fd.encode(&mut out);
                write_u64(&mut out, m.write_idx);
                write_u32(&mut out, m.payload.len() as u32);
                out.extend_from_slice(&m.payload);
            },
            Self::VfsWriteResp(m) => {
                m.global_fd.encode(&mut out);
                write_u32(&mut out, m.result.as_u32());
                write_u32(&mut out, m.ready.bits());
                write_u32(&mut out, m.size);
            },
            Self::CloseReq(m) => m.global_fd.encode(&mut out),
            Self::CloseResp(m) => write_u32(&mut out, m.result.as_u32()),
            Self::VfsCloseReq(m) => m.global_fd.encode(&mut out),
            Self::VfsCloseResp(m) => {
                m.global_fd.encode(&mut out);
                write_u32(&mut out, m.result.as_u32());
            },
            Self::SelectReq(m) => {
                write_u32(&mut out, m.read_fds.len() as u32);
                write_u32(&mut out, m.write_fds.len() as u32);
                for fd in &m.read_fds {
                    fd.encode(&mut out);
                }
                for fd in &m.write_fds {
                    fd.encode(&mut out);
                }
            },
            Self::SelectResp(m) => {
                write_u32(&mut out, m.result.as_u32());
                write_u32(&mut out, m.ready_reads.len() as u32);
                write_u32(&mut out, m.ready_writes.len() as u32);
                for fd in &m.ready_reads {
                    fd.encode(&mut out);
                }
                for fd in &m.ready_writes {
                    fd.encode(&mut out);
                }
            },
            Self::VfsReadyNtc(m) => {
                encode_path(&mut out, &m.path);
                write_u32(&mut out, m.ready.bits());
            },
        }
        out
    }
}
