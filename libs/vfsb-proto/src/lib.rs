//! Wire protocol for the VFS broker (§6.2): fixed header, per-message
//! bodies, and validation that is purely a function of received bytes.
//! Credentialing (FD ownership, sender process) needs broker state and
//! lives one layer up, in the broker itself.

mod error;
mod header;
mod messages;
mod path;

pub use error::CodecError;
pub use header::{FuncId, Header, MsgType, Ready, WireResult, GLOBAL_FD_NONE, HEADER_SIZE};
pub use messages::{
    CloseReq, CloseResp, GlobalFd, Message, MountReq, MountResp, OpenReq, OpenResp, Pid, ReadReq,
    ReadResp, SelectReq, SelectResp, VfsCloseReq, VfsCloseResp, VfsOpenReq, VfsOpenResp, VfsReadReq,
    VfsReadResp, VfsReadyNtc, VfsWriteReq, VfsWriteResp, WriteReq, WriteResp,
};
pub use path::{decode_path, encode_path, NAME_MAX, PATH_FIELD_SIZE};
