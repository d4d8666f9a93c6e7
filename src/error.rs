use thiserror::Error;

/// Errors arising from wire parsing and encoding.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("datagram too short for a GVCP header ({len} bytes, minimum 8)")]
    HeaderTooShort { len: usize },

    #[error("not a command packet (expected kind 0x42, got 0x{got:02X})")]
    NotACommand { got: u8 },

    #[error("size mismatch: header declares {declared} payload bytes, datagram carries {got}")]
    SizeMismatch { declared: usize, got: usize },

    #[error("payload too short for {field}: need {need} bytes, got {got}")]
    PayloadTooShort {
        field: &'static str,
        need: usize,
        got: usize,
    },
}

impl WireError {
    pub(crate) fn payload_too_short(field: &'static str, need: usize, got: usize) -> Self {
        Self::PayloadTooShort { field, need, got }
    }
}

/// Errors arising from register-map access.
///
/// Each variant corresponds to one GVCP status code; the mapping lives in
/// [`crate::protocol::gvcp::Status::from_register_error`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("no register mapped at 0x{address:08X}")]
    InvalidAddress { address: u32 },

    #[error("register 0x{address:08X} is read-only")]
    WriteProtected { address: u32 },

    #[error("address 0x{address:08X} is not 32-bit aligned")]
    BadAlignment { address: u32 },

    #[error("value {value} out of range for register 0x{address:08X}")]
    BadValue { address: u32, value: u32 },

    #[error("access of {len} bytes at 0x{address:08X} exceeds the region limit")]
    AccessDenied { address: u32, len: usize },

    #[error("register backend busy")]
    Busy,
}

pub type Result<T> = std::result::Result<T, WireError>;
