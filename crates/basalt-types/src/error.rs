use thiserror::Error;

/// Errors produced while constructing or parsing identifier types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    #[error("invalid address length {0}, expected 33")]
    InvalidAddressLength(usize),

    #[error("invalid id length {0}, expected 32")]
    InvalidIdLength(usize),

    #[error("invalid address format: {0}")]
    InvalidAddressFormat(String),

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}
