//! Async access to the document service.
//!
//! Lock waits and file I/O block, so every call runs on tokio's blocking
//! pool rather than on the async executor.

use crate::error::{Result, StoreError};
use crate::model::{OperationRequest, OperationResponse, ReadRequest, WriteRequest};
use crate::service::DocumentService;
use crate::storage::StorageError;
use crate::versions::SnapshotInfo;
use std::sync::Arc;
use tokio::task::{self, JoinError};

/// Cheaply cloneable async handle to a [`DocumentService`].
#[derive(Clone)]
pub struct AsyncDocumentService {
    inner: Arc<DocumentService>,
}

impl AsyncDocumentService {
    pub fn new(service: DocumentService) -> Self {
        Self {
            inner: Arc::new(service),
        }
    }

    pub fn service(&self) -> &DocumentService {
        &self.inner
    }

    pub async fn write(&self, request: WriteRequest) -> Result<OperationResponse> {
        self.run(move |service| service.write(&request)).await
    }

    pub async fn read(&self, request: ReadRequest) -> Result<OperationResponse> {
        self.run(move |service| service.read(&request)).await
    }

    pub async fn operate(&self, request: OperationRequest) -> Result<OperationResponse> {
        self.run(move |service| service.operate(&request)).await
    }

    pub async fn versions(&self, document: String) -> Result<Vec<SnapshotInfo>> {
        self.run(move |service| service.versions(&document)).await
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&DocumentService) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.inner);
        task::spawn_blocking(move || f(&service))
            .await
            .unwrap_or_else(|err| Err(join_failure(err)))
    }
}

/// A panicking operation keeps panicking in the caller; a cancelled one is
/// reported as interrupted.
fn join_failure(err: JoinError) -> StoreError {
    match err.try_into_panic() {
        Ok(payload) => std::panic::resume_unwind(payload),
        Err(err) => StoreError::Storage(StorageError::Io {
            name: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::Interrupted, err.to_string()),
        }),
    }
}
