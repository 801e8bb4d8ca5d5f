use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid compressed point")]
    InvalidPoint,
    #[error("small-order point")]
    SmallOrderPoint,
    #[error("invalid {field}: expected 32-byte hex")]
    InvalidEncoding { field: &'static str },
    #[error("derived view key does not match announced view key")]
    ViewKeyMismatch,
    #[error("missing {field} in key announcement")]
    MissingField { field: &'static str },
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Rpc(#[from] anyhow::Error),
    #[error(transparent)]
    Keys(#[from] KeyError),
    #[error("wallet io: {0}")]
    Io(#[from] std::io::Error),
    #[error("no primary wallet configured")]
    NoPrimaryWallet,
}

pub type Result<T> = std::result::Result<T, WalletError>;
