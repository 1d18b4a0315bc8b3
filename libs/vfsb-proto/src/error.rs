use core::fmt;

/// A message failed structural validation before it ever reached a state machine.
///
/// These are purely a function of the received bytes; resolving a `global_fd` or
/// crediting a sender against a process id requires broker state and is therefore
/// not modeled here (see the broker's own error type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes were received than the fixed header requires.
    UndersizeHeader,
    /// Fewer bytes were received than the fixed body for this `(func_id, type)` requires.
    UndersizeBody,
    /// A `size` field claims more payload than was actually received.
    UndersizePayload,
    /// `func_id` is outside the defined function id space.
    UnknownFuncId(u32),
    /// `type` is outside the defined {Request, Response, Notification} space.
    UnknownMsgType(u32),
    /// `type` does not match the direction this `func_id` is defined to carry.
    WrongDirection { func_id: u32, got: u32 },
    /// A response's `result` field was neither Success nor Failure.
    InvalidResult(u32),
    /// A `VfsReadyNtc`'s `ready` field had bits outside {Read, Write}.
    InvalidReadyBits(u32),
    /// A path field's first byte was not `/`.
    PathNotAbsolute,
    /// A path field was not NUL-terminated within its fixed-size slot.
    PathNotTerminated,
    /// A single `/`-separated path component exceeded `NAME_MAX` bytes.
    NameComponentTooLong,
    /// `read_count + write_count` overflowed or exceeded the payload actually present.
    SelectCountOverflow,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndersizeHeader => write!(f, "message shorter than the fixed header"),
            Self::UndersizeBody => write!(f, "message shorter than its fixed body"),
            Self::UndersizePayload => write!(f, "declared payload size exceeds received bytes"),
            Self::UnknownFuncId(id) => write!(f, "unknown func_id {}", id),
            Self::UnknownMsgType(t) => write!(f, "unknown message type {}", t),
            Self::WrongDirection { func_id, got } => {
                write!(f, "func_id {} does not carry message type {}", func_id, got)
            },
            Self::InvalidResult(v) => write!(f, "invalid result value {}", v),
            Self::InvalidReadyBits(v) => write!(f, "ready bits {:#x} outside {{Read, Write}}", v),
            Self::PathNotAbsolute => write!(f, "path does not start with '/'"),
            Self::PathNotTerminated => write!(f, "path field is not NUL-terminated"),
            Self::NameComponentTooLong => write!(f, "path component exceeds {} bytes", crate::path::NAME_MAX),
            Self::SelectCountOverflow => write!(f, "select fd counts overflow the payload"),
        }
    }
}

impl std::error::Error for CodecError {}
