//! Chunked HTTP upload against an in-process device double.

use std::sync::{Arc, Mutex};

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use printrelay_core::fsutil::md5_file;
use printrelay_core::transport::chunked_http::{CHUNK_SIZE, UPLOAD_PATH};
use printrelay_core::transport::ChunkedHttpTransport;
use printrelay_core::{DeliverableFile, DestinationIdentity, DispatchError, Transport};

/// One multipart request as the device saw it.
#[derive(Debug, Clone, Default)]
struct Chunk {
    md5: String,
    check: String,
    offset: String,
    uuid: String,
    total_size: String,
    file_name: String,
    len: usize,
}

#[derive(Default)]
struct Device {
    chunks: Mutex<Vec<Chunk>>,
    fail_after: Option<usize>,
}

async fn upload(State(device): State<Arc<Device>>, mut multipart: Multipart) -> StatusCode {
    let mut chunk = Chunk::default();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if name == "File" {
            chunk.file_name = field.file_name().unwrap_or_default().to_string();
            chunk.len = field.bytes().await.unwrap().len();
            continue;
        }
        let value = field.text().await.unwrap();
        match name.as_str() {
            "S-File-MD5" => chunk.md5 = value,
            "Check" => chunk.check = value,
            "Offset" => chunk.offset = value,
            "Uuid" => chunk.uuid = value,
            "TotalSize" => chunk.total_size = value,
            _ => {}
        }
    }

    let mut chunks = device.chunks.lock().unwrap();
    chunks.push(chunk);
    match device.fail_after {
        Some(n) if chunks.len() > n => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}

async fn serve(device: Arc<Device>) -> u16 {
    let app = Router::new()
        .route(UPLOAD_PATH, post(upload))
        .layer(DefaultBodyLimit::max(4 * 1024 * 1024))
        .with_state(device);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn identity() -> DestinationIdentity {
    DestinationIdentity {
        class: "CentauriCarbon".to_string(),
        address: "127.0.0.1".to_string(),
        credential: String::new(),
        protocol: "openCentauriCarbon".to_string(),
    }
}

fn job(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("large.gcode");
    let data: Vec<u8> = (0..(2 * CHUNK_SIZE + CHUNK_SIZE / 2))
        .map(|i| (i % 251) as u8)
        .collect();
    std::fs::write(&path, data).unwrap();
    path
}

#[tokio::test]
async fn test_upload_sends_offsets_and_shared_metadata() {
    let device = Arc::new(Device::default());
    let port = serve(device.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let path = job(&dir);
    let file = DeliverableFile::open(&path).unwrap();
    let transport = ChunkedHttpTransport::new().with_port(port);

    transport.prepare(&file).await.unwrap();
    transport.transfer(&identity(), &file).await.unwrap();

    let chunks = device.chunks.lock().unwrap().clone();
    let offsets: Vec<&str> = chunks.iter().map(|c| c.offset.as_str()).collect();
    assert_eq!(offsets, vec!["0", "1048576", "2097152"]);
    assert_eq!(
        chunks.iter().map(|c| c.len).collect::<Vec<_>>(),
        vec![CHUNK_SIZE, CHUNK_SIZE, CHUNK_SIZE / 2]
    );

    let md5 = md5_file(&path).unwrap();
    let total = (2 * CHUNK_SIZE + CHUNK_SIZE / 2).to_string();
    let uuid = file.session_id().to_string();
    for chunk in &chunks {
        assert_eq!(chunk.md5, md5);
        assert_eq!(chunk.check, "1");
        assert_eq!(chunk.uuid, uuid);
        assert_eq!(chunk.total_size, total);
        assert_eq!(chunk.file_name, "large.gcode");
    }
}

#[tokio::test]
async fn test_upload_stops_at_first_rejected_chunk() {
    let device = Arc::new(Device {
        fail_after: Some(1),
        ..Device::default()
    });
    let port = serve(device.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let file = DeliverableFile::open(job(&dir)).unwrap();
    let transport = ChunkedHttpTransport::new().with_port(port);

    let result = transport.transfer(&identity(), &file).await;

    assert!(matches!(result, Err(DispatchError::TransferFailed { .. })));
    assert_eq!(device.chunks.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_dry_run_contacts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let file = DeliverableFile::open(job(&dir)).unwrap();
    // Nothing listens on this port.
    let transport = ChunkedHttpTransport::new().with_port(1).dry_run(true);

    transport.transfer(&identity(), &file).await.unwrap();
}
