use thiserror::Error;

/// Errors that abort decoding of a whole buffer.
///
/// Records emitted before the error was hit stay emitted; nothing after it is
/// decoded. The parser itself stays usable for the next buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Version field is not 5, 9 or 10, or was not enabled in the settings
    #[error("unsupported netflow version {0}")]
    UnsupportedVersion(u16),

    /// A declared length runs past the end of the buffer
    #[error("truncated packet: needed {needed} bytes, {available} available")]
    TruncatedPacket { needed: usize, available: usize },

    /// Structurally impossible packet, e.g. a FlowSet shorter than its own header
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
}

/// Conditions local to one FlowSet. They never abort the packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowSetIssue {
    /// Data set references a template that was never seen or has expired
    #[error("no template {template_id} cached for data set")]
    UnknownTemplate { template_id: u16 },

    /// Template record with inconsistent counts or lengths
    #[error("malformed template {template_id}: {reason}")]
    MalformedTemplate { template_id: u16, reason: String },
}

/// Errors raised while loading or validating parser settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error("unable to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
