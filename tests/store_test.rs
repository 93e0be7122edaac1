use std::{sync::Arc, time::Duration};

use tempfile::tempdir;
use tokio::runtime::Runtime;
use vista::{pipeline::RequestContext, store::spawn_sweeper};

mod common;
use common::{png_bytes, service_for};

fn run_async<F, T>(future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    Runtime::new().unwrap().block_on(future)
}

fn predict_once(service: &vista::pipeline::ClassificationService) -> String {
    let data = png_bytes();
    let ctx = RequestContext::new();
    let upload = service
        .process_upload(&data, "a.png", "image/png", data.len() as u64, &ctx)
        .unwrap();
    service
        .predict(&upload.bytes, upload.metadata, None, &ctx)
        .unwrap()
        .id
}

#[test]
fn test_result_expires_after_sweep() {
    let root = tempdir().unwrap();
    let service = service_for(root.path());
    let id = predict_once(&service);

    assert!(service.fetch_result(&id).is_ok());
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(service.store().sweep(Duration::from_millis(1)), 1);
    assert!(service.fetch_result(&id).is_err());
}

#[test]
fn test_background_sweeper() {
    let root = tempdir().unwrap();
    let service = service_for(root.path());
    let id = predict_once(&service);
    let store = service.store().clone();

    run_async(async move {
        let sweeper = spawn_sweeper(
            Arc::clone(&store),
            Duration::from_millis(10),
            Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.shutdown().await;
        assert_eq!(store.count(), 0);
    });

    assert!(service.fetch_result(&id).is_err());
}

#[test]
fn test_sweeper_leaves_fresh_results() {
    let root = tempdir().unwrap();
    let service = service_for(root.path());
    predict_once(&service);

    run_async(async {
        let sweeper = service.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(20)).await;
        sweeper.shutdown().await;
    });
    assert_eq!(service.result_count(), 1);
}
