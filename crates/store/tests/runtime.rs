use serde_json::json;
use sheetstore_lock::LockManager;
use sheetstore_store::{
    AsyncDocumentService, CellWrite, DocumentService, ReadRequest, ResultType, StoreConfig,
    StoreError, WriteRequest, WriteType,
};
use std::time::Duration;

fn service(root: &std::path::Path, wait_ms: u64) -> AsyncDocumentService {
    let mut config = StoreConfig::default();
    config.storage.path = root.to_path_buf();
    config.lock.wait_time_ms = wait_ms;
    AsyncDocumentService::new(DocumentService::from_config(&config).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_async_writes_and_reads() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path(), 30_000);

    let mut tasks = Vec::new();
    for row in 1..=10u32 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .write(
                    WriteRequest::new("async.xlsx", "Sheet1")
                        .cell(CellWrite::new(&format!("A{row}"), f64::from(row), WriteType::Number)),
                )
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap().success);
    }

    service
        .write(
            WriteRequest::new("async.xlsx", "Sheet1")
                .cell(CellWrite::new("B1", "=SUM(A1:A10)", WriteType::Formula)),
        )
        .await
        .unwrap();

    let readers: Vec<_> = (0..5)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .read(ReadRequest::new("async.xlsx", "Sheet1").cell("B1"))
                    .await
            })
        })
        .collect();
    for reader in readers {
        let data = reader.await.unwrap().unwrap().data.unwrap();
        assert_eq!(data[0].value, Some(json!(55.0)));
        assert_eq!(data[0].value_type, ResultType::Numeric);
    }

    // Every write after the first replaced an existing version.
    let versions = service.versions("async.xlsx".to_string()).await.unwrap();
    assert_eq!(versions.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_wait_does_not_block_the_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path(), 200);
    service
        .write(
            WriteRequest::new("held.xlsx", "Sheet1")
                .cell(CellWrite::new("A1", "x", WriteType::String)),
        )
        .await
        .unwrap();

    let guard = service
        .service()
        .engine()
        .lock_manager()
        .acquire_exclusive("held.xlsx")
        .unwrap();

    let blocked = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .read(ReadRequest::new("held.xlsx", "Sheet1").cell("A1"))
                .await
        }
    });

    // The executor keeps making progress while the read waits.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());

    let err = blocked.await.unwrap().unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout { .. }));
    drop(guard);

    let data = service
        .read(ReadRequest::new("held.xlsx", "Sheet1").cell("A1"))
        .await
        .unwrap()
        .data
        .unwrap();
    assert_eq!(data[0].value, Some(json!("x")));
}
