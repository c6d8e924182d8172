//! HTTP transport tests against a mock server

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ota_core::prelude::*;
use ota_http::HttpTransport;
use tracing_test::traced_test;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 199) as u8).collect()
}

fn request(url: String, max_request_size: Option<usize>) -> FetchRequest {
    FetchRequest {
        url,
        timeout: Duration::from_secs(5),
        max_request_size,
        allow_plaintext_http: true,
    }
}

async fn drain<S: ImageStream>(stream: &mut S) -> Result<Vec<u8>, OtaError> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.read_next_chunk().await? {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[tokio::test]
async fn test_streams_whole_image() -> Result<()> {
    let server = MockServer::start().await;
    let body = image(10_000);
    Mock::given(method("GET"))
        .and(path("/ota.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new()?;
    let mut stream = transport
        .open(&request(format!("{}/ota.bin", server.uri()), None))
        .await?;

    assert_eq!(stream.content_length(), Some(10_000));
    assert!(!stream.is_ranged());
    assert_eq!(drain(&mut stream).await?, body);
    Ok(())
}

#[tokio::test]
async fn test_not_found_is_unreachable() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let transport = HttpTransport::new()?;
    let err = transport
        .open(&request(format!("{}/missing.bin", server.uri()), None))
        .await
        .err()
        .map(|e| e.kind());
    assert_eq!(err, Some(ErrorKind::TransportUnreachable));
    Ok(())
}

#[tokio::test]
async fn test_connection_refused_is_unreachable() -> Result<()> {
    // bind then drop to get a port with nothing listening
    let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();

    let transport = HttpTransport::new()?;
    let err = transport
        .open(&request(format!("http://127.0.0.1:{port}/ota.bin"), None))
        .await
        .err()
        .map(|e| e.kind());
    assert_eq!(err, Some(ErrorKind::TransportUnreachable));
    Ok(())
}

#[tokio::test]
async fn test_plaintext_refused_by_default() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image(10)))
        .expect(0)
        .mount(&server)
        .await;

    let transport = HttpTransport::new()?;
    let mut req = request(format!("{}/ota.bin", server.uri()), None);
    req.allow_plaintext_http = false;

    let err = transport.open(&req).await.err().map(|e| e.kind());
    assert_eq!(err, Some(ErrorKind::TlsFailure));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_plaintext_allowed_logs_warning() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image(10)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new()?;
    transport
        .open(&request(format!("{}/ota.bin", server.uri()), None))
        .await?;
    assert!(logs_contain("plaintext HTTP"));
    Ok(())
}

#[tokio::test]
async fn test_slow_response_times_out() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(image(10))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let transport = HttpTransport::new()?;
    let mut req = request(format!("{}/ota.bin", server.uri()), None);
    req.timeout = Duration::from_millis(200);

    let err = transport.open(&req).await.err().map(|e| e.kind());
    assert_eq!(err, Some(ErrorKind::TransportTimeout));
    Ok(())
}

#[tokio::test]
async fn test_range_requests_reassemble_image() -> Result<()> {
    let server = MockServer::start().await;
    let body = image(1300);
    let ranges = [(0usize, 511usize), (512, 1023), (1024, 1299)];
    for (start, end) in ranges {
        let slice = body.get(start..=end).unwrap_or_default().to_vec();
        Mock::given(method("GET"))
            .and(path("/ota.bin"))
            .and(header("Range", format!("bytes={start}-{end}").as_str()))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", format!("bytes {start}-{end}/1300").as_str())
                    .set_body_bytes(slice),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let transport = HttpTransport::new()?;
    let mut stream = transport
        .open(&request(format!("{}/ota.bin", server.uri()), Some(512)))
        .await?;

    assert!(stream.is_ranged());
    assert_eq!(stream.content_length(), Some(1300));
    assert_eq!(drain(&mut stream).await?, body);
    Ok(())
}

#[tokio::test]
async fn test_range_ignored_falls_back_to_full_body() -> Result<()> {
    let server = MockServer::start().await;
    let body = image(3000);
    Mock::given(method("GET"))
        .and(path("/ota.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new()?;
    let mut stream = transport
        .open(&request(format!("{}/ota.bin", server.uri()), Some(512)))
        .await?;

    assert!(!stream.is_ranged());
    assert_eq!(stream.content_length(), Some(3000));
    assert_eq!(drain(&mut stream).await?, body);
    Ok(())
}

#[tokio::test]
async fn test_failed_follow_up_range_is_io_error() -> Result<()> {
    let server = MockServer::start().await;
    let body = image(1000);
    Mock::given(method("GET"))
        .and(header("Range", "bytes=0-511"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 0-511/1000")
                .set_body_bytes(body.get(..512).unwrap_or_default().to_vec()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("Range", "bytes=512-999"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let transport = HttpTransport::new()?;
    let mut stream = transport
        .open(&request(format!("{}/ota.bin", server.uri()), Some(512)))
        .await?;

    let err = drain(&mut stream).await.err().map(|e| e.kind());
    assert_eq!(err, Some(ErrorKind::TransportIo));
    Ok(())
}

/// Storage that records which operations the commit manager performed
#[derive(Default)]
struct RecordingStorage {
    ops: Vec<&'static str>,
    written: usize,
}

#[async_trait]
impl SlotStorage for RecordingStorage {
    async fn running_descriptor(&self) -> Result<FirmwareDescriptor, StorageError> {
        FirmwareDescriptor::new("1.0.0", ContentHash::of(b"running"), 0)
            .map_err(|e| StorageError::Metadata(e.to_string()))
    }

    fn security_version_floor(&self) -> u32 {
        0
    }

    async fn prepare_inactive(&mut self, _size_hint: Option<u64>) -> Result<(), StorageError> {
        self.ops.push("prepare");
        Ok(())
    }

    async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.written = self.written.saturating_add(bytes.len());
        Ok(())
    }

    async fn validate_and_activate(&mut self) -> Result<(), StorageError> {
        self.ops.push("validate_and_activate");
        Ok(())
    }

    async fn discard_inactive(&mut self) -> Result<(), StorageError> {
        self.ops.push("discard");
        Ok(())
    }
}

fn packed_image(version: &str, payload_len: usize) -> Result<Vec<u8>> {
    let payload = image(payload_len);
    let desc = FirmwareDescriptor::new(version, ContentHash::of(&payload), 0)?;
    let mut bytes = encode_header(&desc, "http-test").to_vec();
    bytes.extend_from_slice(&payload);
    append_image_digest(&mut bytes);
    Ok(bytes)
}

#[tokio::test]
async fn test_range_without_total_length_is_rejected() -> Result<()> {
    let server = MockServer::start().await;
    let body = packed_image("2.0.0", 1968)?;
    assert_eq!(body.len(), 2288);
    Mock::given(method("GET"))
        .and(path("/ota.bin"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 0-511/*")
                .set_body_bytes(body.get(..512).unwrap_or_default().to_vec()),
        )
        .mount(&server)
        .await;

    let transport = HttpTransport::new()?;
    let err = transport
        .open(&request(format!("{}/ota.bin", server.uri()), Some(512)))
        .await
        .err()
        .map(|e| e.kind());
    assert_eq!(err, Some(ErrorKind::TransportIo));

    let mut storage = RecordingStorage::default();
    let outcome = CommitManager::new(
        &transport,
        &mut storage,
        request(format!("{}/ota.bin", server.uri()), Some(512)),
        PolicyConfig::default(),
    )
    .run()
    .await;

    assert_eq!(outcome, UpdateOutcome::Failed(ErrorKind::TransportIo));
    assert!(!storage.ops.contains(&"validate_and_activate"));
    assert_eq!(storage.written, 0);
    Ok(())
}

#[tokio::test]
async fn test_unrequested_partial_response_is_rejected() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 0-99/1000")
                .set_body_bytes(image(100)),
        )
        .mount(&server)
        .await;

    let transport = HttpTransport::new()?;
    let err = transport
        .open(&request(format!("{}/ota.bin", server.uri()), None))
        .await
        .err()
        .map(|e| e.kind());
    assert_eq!(err, Some(ErrorKind::TransportIo));
    Ok(())
}
