use std::process::ExitStatus;

use aes::cipher::block_padding::UnpadError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassboxError {
    #[error("Authentication rejected by platform: {0}")]
    AuthError(reqwest::StatusCode),

    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Empty session token")]
    EmptyToken,

    #[error("Policy field is not a key=value sequence")]
    PolicyShapeError,

    #[error("Unexpected key in policy grant: {0}")]
    UnexpectedPolicyKey(String),

    #[error("Policy grant is missing the {0} entry")]
    MissingPolicyKey(&'static str),

    #[error("Policy ciphertext length {0} is not a whole number of blocks")]
    PolicyCipherLength(usize),

    #[error("No default_KID attribute in manifest")]
    KidNotFound,

    #[error("KID has {0} hex digits, expected 32")]
    InvalidKid(usize),

    #[error("Content key length {key} does not match KID length {kid}")]
    KeyLengthMismatch { kid: usize, key: usize },

    #[error("Decoded content key is not printable text")]
    KeyEncoding(#[from] std::string::FromUtf8Error),

    #[error("Missing {0} field in response")]
    MissingField(&'static str),

    #[error("Cookie grant is not a valid header value")]
    CookieEncoding(#[from] reqwest::header::InvalidHeaderValue),

    #[error("{tool} exited with {status}")]
    ToolFailure {
        tool: &'static str,
        status: ExitStatus,
    },

    #[error(transparent)]
    MissingExecutable(#[from] which::Error),

    #[error("Invalid cipher padding")]
    UnpadError(#[from] UnpadError),

    #[error(transparent)]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

pub type ClassboxResult<T> = Result<T, ClassboxError>;
