pub mod encryption;
pub mod service;

pub use encryption::{CryptoError, EncryptionService};
pub use service::{BackupError, BackupPayload, BackupService, RestoreReport};
