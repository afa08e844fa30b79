//! Encrypted SQLite storage
//!
//! r2d2 pooling over SQLCipher connections. Schema management belongs to the
//! application; this module only opens, keys and health-checks connections.

pub mod error;
pub mod pool;

pub use error::{StorageError, StorageResult};
pub use pool::{SqlCipherConnection, SqlCipherPool, SqlCipherPoolConfig};
