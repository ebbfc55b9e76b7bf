//! Crate-wide error type for the SNMP engine

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("BER error: {0}")]
    Ber(String),

    #[error("MIB parser error: {0}")]
    MibParse(String),

    #[error("MIB parser error at {file}:{line}: {message}")]
    MibSyntax {
        file: String,
        line: u32,
        message: String,
    },

    #[error("unresolved parent for node: {0}")]
    UnresolvedParent(String),

    #[error("OID exceeds maximum length (128 sub-identifiers): {0}")]
    OidTooLong(usize),

    #[error("USM error: {0}")]
    Usm(UsmError),

    #[error("v1 error-status {status:?} at index {index}")]
    V1Status { status: ErrorStatus, index: u32 },

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("index pack/unpack error: {0}")]
    Index(String),

    #[error("frozen MIB image error: {0}")]
    FrozenImage(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Internal-only outcome; never serialized onto the wire.
    #[error("request timed out with no response")]
    NoResponse,

    /// Internal-only outcome signalling walk termination.
    #[error("end of walk")]
    EndOfWalk,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    pub fn ber<S: Into<String>>(msg: S) -> Self {
        Self::Ber(msg.into())
    }

    pub fn mib_parse<S: Into<String>>(msg: S) -> Self {
        Self::MibParse(msg.into())
    }

    pub fn dispatch<S: Into<String>>(msg: S) -> Self {
        Self::Dispatch(msg.into())
    }

    pub fn index<S: Into<String>>(msg: S) -> Self {
        Self::Index(msg.into())
    }

    pub fn frozen_image<S: Into<String>>(msg: S) -> Self {
        Self::FrozenImage(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn not_supported<S: Into<String>>(msg: S) -> Self {
        Self::NotSupported(msg.into())
    }
}

/// USM (User-based Security Model) error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UsmError {
    #[error("unknown user name")]
    UnknownUserName,
    #[error("unsupported security level")]
    UnsupportedSecurityLevel,
    #[error("not in time window")]
    NotInTimeWindow,
    #[error("unknown engine ID")]
    UnknownEngineID,
    #[error("wrong digest")]
    WrongDigest,
}

/// v1/v2+ error-status taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorStatus {
    NoError = 0,
    TooBig = 1,
    NoSuchName = 2,
    BadValue = 3,
    ReadOnly = 4,
    GenErr = 5,
    NoAccess = 6,
    WrongType = 7,
    WrongLength = 8,
    WrongEncoding = 9,
    WrongValue = 10,
    NoCreation = 11,
    InconsistentValue = 12,
    ResourceUnavailable = 13,
    CommitFailed = 14,
    UndoFailed = 15,
    AuthorizationError = 16,
    NotWritable = 17,
    InconsistentName = 18,
}

impl ErrorStatus {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::NoError,
            1 => Self::TooBig,
            2 => Self::NoSuchName,
            3 => Self::BadValue,
            4 => Self::ReadOnly,
            5 => Self::GenErr,
            6 => Self::NoAccess,
            7 => Self::WrongType,
            8 => Self::WrongLength,
            9 => Self::WrongEncoding,
            10 => Self::WrongValue,
            11 => Self::NoCreation,
            12 => Self::InconsistentValue,
            13 => Self::ResourceUnavailable,
            14 => Self::CommitFailed,
            15 => Self::UndoFailed,
            16 => Self::AuthorizationError,
            17 => Self::NotWritable,
            18 => Self::InconsistentName,
            _ => Self::GenErr,
        }
    }

    /// Map a v2+ error-status onto the closest v1 code, per RFC 1908.
    pub fn to_v1(self) -> Self {
        match self {
            Self::NoAccess | Self::AuthorizationError | Self::NotWritable
            | Self::InconsistentName => Self::NoSuchName,
            Self::WrongType | Self::WrongLength | Self::WrongEncoding | Self::WrongValue
            | Self::InconsistentValue => Self::BadValue,
            Self::NoCreation => Self::NoSuchName,
            Self::ResourceUnavailable | Self::CommitFailed | Self::UndoFailed => Self::GenErr,
            other => other,
        }
    }
}
