use thiserror::Error;

/// All errors that can occur in VaultKeep.
#[derive(Debug, Error)]
pub enum VaultKeepError {
    // --- Crypto errors ---
    #[error("Invalid key size: expected 32 bytes, got {0}")]
    InvalidKeySize(usize),

    #[error("Authentication failed — wrong key or corrupted data")]
    AuthenticationFailure,

    #[error("Chunk {index} failed authentication at its position — stream was reordered, duplicated, or truncated")]
    ChunkOrderingViolation { index: u32 },

    #[error("Decrypted length {actual} does not match declared size {expected}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // --- Container / index errors ---
    #[error("File '{0}' not found")]
    FileNotFound(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Index version conflict — expected stored version {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("Container footer could not be opened — wrong device key or corrupted container")]
    FooterUnreadable,

    // --- Keyfile errors ---
    #[error("Keyfile error: {0}")]
    KeyfileError(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    Serialization(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("User cancelled operation")]
    UserCancelled,
}

/// Convenience type alias for VaultKeep results.
pub type Result<T> = std::result::Result<T, VaultKeepError>;
