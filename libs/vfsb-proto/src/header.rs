use crate::error::CodecError;

/// Size in bytes of the fixed header shared by every message.
pub const HEADER_SIZE: usize = 8;

/// Function id space (§6.2). Matches the original `MVFS_FUNCID_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FuncId {
    Mount = 0,
    Open = 1,
    VfsOpen = 2,
    Write = 3,
    VfsWrite = 4,
    Read = 5,
    VfsRead = 6,
    Close = 7,
    VfsClose = 8,
    Select = 9,
    VfsReady = 10,
}

impl FuncId {
    pub const MAX: u32 = 10;

    pub fn from_u32(v: u32) -> Result<Self, CodecError> {
        Ok(match v {
            0 => Self::Mount,
            1 => Self::Open,
            2 => Self::VfsOpen,
            3 => Self::Write,
            4 => Self::VfsWrite,
            5 => Self::Read,
            6 => Self::VfsRead,
            7 => Self::Close,
            8 => Self::VfsClose,
            9 => Self::Select,
            10 => Self::VfsReady,
            other => return Err(CodecError::UnknownFuncId(other)),
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Whether `msg_type` is a message shape this func_id actually defines.
    /// Every func_id except `VfsReady` defines a Request and a Response shape
    /// (e.g. `Open`/`OpenReq` and `Open`/`OpenResp`); `VfsReady` defines only
    /// a Notification. This is a purely structural fact about the protocol —
    /// which of those shapes a given *edge* (client→broker, mount→broker) is
    /// allowed to actually send is a dispatcher-level routing concern, not a
    /// codec one (§4.1 vs §4.6).
    pub fn carries(self, msg_type: MsgType) -> bool {
        match self {
            Self::VfsReady => msg_type == MsgType::Notification,
            _ => msg_type != MsgType::Notification,
        }
    }
}

/// Message direction (§6.2 header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MsgType {
    Request = 0,
    Response = 1,
    Notification = 2,
}

impl MsgType {
    pub fn from_u32(v: u32) -> Result<Self, CodecError> {
        Ok(match v {
            0 => Self::Request,
            1 => Self::Response,
            2 => Self::Notification,
            other => return Err(CodecError::UnknownMsgType(other)),
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Decoded `{ func_id, type }` header, before any body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub func_id: FuncId,
    pub msg_type: MsgType,
}

impl Header {
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::UndersizeHeader);
        }
        let raw_func_id = read_u32(buf, 0);
        let raw_type = read_u32(buf, 4);
        let func_id = FuncId::from_u32(raw_func_id)?;
        let msg_type = MsgType::from_u32(raw_type)?;
        if !func_id.carries(msg_type) {
            return Err(CodecError::WrongDirection {
                func_id: raw_func_id,
                got: raw_type,
            });
        }
        Ok(Self { func_id, msg_type })
    }

    pub fn encode(self, out: &mut Vec<u8>) {
        write_u32(out, self.func_id.as_u32());
        write_u32(out, self.msg_type.as_u32());
    }
}

/// Wire result code (§4.1: `result` ∈ {Success, Failure}).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireResult {
    Success = 0,
    Failure = 1,
}

impl WireResult {
    pub fn from_u32(v: u32) -> Result<Self, CodecError> {
        match v {
            0 => Ok(Self::Success),
            1 => Ok(Self::Failure),
            other => Err(CodecError::InvalidResult(other)),
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn from_bool(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

bitflags::bitflags! {
    /// Per-node readiness bits (§6.2 "Readiness bits: 1 = Read ready, 2 = Write ready").
    pub struct Ready: u32 {
        const READ  = 0b01;
        const WRITE = 0b10;
    }
}

impl Ready {
    pub fn from_wire(v: u32) -> Result<Self, CodecError> {
        Self::from_bits(v).ok_or(CodecError::InvalidReadyBits(v))
    }
}

/// Sentinel meaning "no global fd" on the wire.
pub const GLOBAL_FD_NONE: u32 = 0xFFFF_FFFF;

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

pub(crate) fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}
