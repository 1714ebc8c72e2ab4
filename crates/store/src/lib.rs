//! # sheetstore store
//!
//! A concurrent, versioned store of spreadsheet documents. Callers read and
//! write named cells; every document is guarded by a shared/exclusive lock,
//! every overwrite keeps a snapshot of the previous version, and formulas
//! are evaluated on read.
//!
//! ```no_run
//! use sheetstore_store::{CellWrite, DocumentService, ReadRequest, StoreConfig, WriteRequest, WriteType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = DocumentService::from_config(&StoreConfig::default())?;
//! service.write(
//!     &WriteRequest::new("totals.xlsx", "Sheet1")
//!         .cell(CellWrite::new("A1", 10, WriteType::Number))
//!         .cell(CellWrite::new("B1", 20, WriteType::Number))
//!         .cell(CellWrite::new("C1", "=A1+B1", WriteType::Formula)),
//! )?;
//! let response = service.read(&ReadRequest::new("totals.xlsx", "Sheet1").cell("C1"))?;
//! assert_eq!(response.data.unwrap()[0].value, Some(serde_json::json!(30.0)));
//! # Ok(())
//! # }
//! ```

pub mod config;
mod engine;
mod error;
mod model;
mod runtime;
mod service;
pub mod storage;
pub mod versions;

pub use config::{ConfigError, LockBackend, StoreConfig};
pub use engine::{validate_document_name, DocumentEngine};
pub use error::{ErrorKind, Result, StoreError};
pub use model::{
    CellRead, CellResult, CellWrite, OperationRequest, OperationResponse, ReadRequest,
    ResultType, WriteRequest, WriteSummary, WriteType,
};
pub use runtime::AsyncDocumentService;
pub use service::DocumentService;
pub use storage::{FsStorage, Storage, StorageError};
pub use versions::{SnapshotInfo, VersionStore};

use config::LockConfig;
use sheetstore_lock::{LocalLockManager, LockError, LockManager};
use std::sync::Arc;

/// The lock manager selected by `config.kind`.
pub fn build_lock_manager(config: &LockConfig) -> std::result::Result<Arc<dyn LockManager>, LockError> {
    match config.kind {
        LockBackend::Local => Ok(Arc::new(LocalLockManager::new())),
        LockBackend::Distributed => distributed_lock_manager(config),
    }
}

#[cfg(feature = "redis")]
fn distributed_lock_manager(
    config: &LockConfig,
) -> std::result::Result<Arc<dyn LockManager>, LockError> {
    use sheetstore_lock::{DistributedLockManager, RedisCoordinator};

    let coordinator = RedisCoordinator::new(
        &config.redis_url,
        &config.key_prefix,
        config.redis_timeout(),
    )?;
    Ok(Arc::new(DistributedLockManager::new(
        Arc::new(coordinator),
        config.lease(),
        config.poll_interval(),
    )))
}

#[cfg(not(feature = "redis"))]
fn distributed_lock_manager(
    _config: &LockConfig,
) -> std::result::Result<Arc<dyn LockManager>, LockError> {
    Err(LockError::Config(
        "distributed locking requires the `redis` feature".to_string(),
    ))
}
