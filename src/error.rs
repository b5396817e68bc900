use std::io;

/// Errors raised above the protocol layer.
///
/// The transport stack (`xdr`, `rpc`, `vxi11`) speaks `io::Result`; anything that
/// fails there arrives here as `Error::Io`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure: timeouts, refused connections, VXI-11 device errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A flat reading buffer doesn't divide into the declared schema
    #[error("Buffer holds {actual} values but {expected} were expected")]
    Shape { expected: usize, actual: usize },

    /// Known-unsafe or nonsensical configuration rejected before talking to hardware
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// Instrument response that couldn't be decoded
    #[error("Unable to parse instrument response: {0}")]
    Parse(String),

    /// VISA resource string this crate can't open
    #[error("Unsupported resource: {0}")]
    UnsupportedResource(String),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error("Plot error: {0}")]
    Plot(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn validation<S: Into<String>>(msg: S) -> Error {
    Error::Validation(msg.into())
}

pub(crate) fn parse<S: Into<String>>(msg: S) -> Error {
    Error::Parse(msg.into())
}
