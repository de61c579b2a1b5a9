use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("votewire: RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("votewire: public key encoding error: {0}")]
    Spki(#[from] rsa::pkcs8::spki::Error),

    #[error("votewire: signature error: {0}")]
    Signature(#[from] rsa::signature::Error),

    #[error("votewire: base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("votewire: symmetric key must be 32 bytes, got {0}")]
    SymmetricKeyLength(usize),

    #[error("votewire: sealed payload too short to hold an IV")]
    SealedPayloadTooShort,

    #[error("votewire: decryption failed")]
    DecryptionFailed,

    #[error("votewire: no key registered for station {0}")]
    UnknownStation(String),

    #[error("votewire: invalid ballot id: {0}")]
    BallotId(#[from] uuid::Error),

    #[error("votewire: invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("votewire: IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("votewire: serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("votewire: transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("votewire: unusable endpoint string: {0}")]
    BadEndpoint(String),

    #[error("votewire: voter not eligible: {0}")]
    VoterIneligible(String),
}
