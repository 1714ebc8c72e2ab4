//! Operation façade over the document engine.

use crate::config::StoreConfig;
use crate::engine::DocumentEngine;
use crate::error::{Result, StoreError};
use crate::model::{OperationRequest, OperationResponse, ReadRequest, WriteRequest};
use crate::storage::{FsStorage, Storage};
use crate::versions::{SnapshotInfo, VersionStore};
use std::sync::Arc;

/// Entry point for callers: turns requests into engine calls and results
/// into responses.
pub struct DocumentService {
    engine: DocumentEngine,
}

impl DocumentService {
    pub fn new(engine: DocumentEngine) -> Self {
        Self { engine }
    }

    /// Filesystem storage, the configured lock manager, and optional
    /// versioning, all from `config`.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let fs = FsStorage::new(&config.storage.path);
        fs.ensure_root()?;
        let storage: Arc<dyn Storage> = Arc::new(fs);
        let locks = crate::build_lock_manager(&config.lock)?;

        tracing::info!(
            storage = %config.storage.path.display(),
            lock = %locks.kind(),
            wait_ms = config.lock.wait_time_ms,
            version_control = config.storage.version_control,
            max_versions = config.storage.max_versions,
            max_concurrent_reads = config.calculation.max_concurrent_reads,
            max_concurrent_writes = config.calculation.max_concurrent_writes,
            "document service ready"
        );

        let mut engine = DocumentEngine::new(Arc::clone(&storage), locks, config.lock.wait_time());
        if config.storage.version_control {
            engine = engine.with_versions(VersionStore::new(
                storage,
                &config.storage.backup_dir,
                config.storage.max_versions,
            ));
        }
        Ok(Self::new(engine))
    }

    pub fn engine(&self) -> &DocumentEngine {
        &self.engine
    }

    pub fn write(&self, request: &WriteRequest) -> Result<OperationResponse> {
        let document = required_file_name(request.file_name.as_deref())?;
        self.engine
            .write(document, request.sheet_name.as_deref(), &request.cells)?;
        Ok(OperationResponse::ok("write succeeded"))
    }

    pub fn read(&self, request: &ReadRequest) -> Result<OperationResponse> {
        let document = required_file_name(request.file_name.as_deref())?;
        let data = self.engine.read(
            document,
            request.sheet_name.as_deref(),
            &request.cells,
            request.read_formula,
        )?;
        Ok(OperationResponse::with_data("read succeeded", data))
    }

    /// Write, then read, each under its own lock. Another writer may run
    /// between the two steps.
    pub fn operate(&self, request: &OperationRequest) -> Result<OperationResponse> {
        if let Some(write) = &request.write_request {
            let mut write = write.clone();
            if write.file_name.is_none() {
                write.file_name = request.file_name.clone();
            }
            self.write(&write)?;
        }
        match &request.read_request {
            Some(read) => {
                let mut read = read.clone();
                if read.file_name.is_none() {
                    read.file_name = request.file_name.clone();
                }
                self.read(&read)
            }
            None => Ok(OperationResponse::ok("operation succeeded")),
        }
    }

    /// Snapshots of `document`, oldest first.
    pub fn versions(&self, document: &str) -> Result<Vec<SnapshotInfo>> {
        self.engine.versions(document)
    }
}

fn required_file_name(file_name: Option<&str>) -> Result<&str> {
    file_name.ok_or_else(|| StoreError::validation("fileName is required"))
}
