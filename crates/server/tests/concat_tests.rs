//! Integration tests for the concatenation extension.

mod common;

use axum::http::StatusCode;
use common::server::TestServer;
use common::{error_code, header, location_id, request};

const TUS: (&str, &str) = ("Tus-Resumable", "1.0.0");
const OFFSET_STREAM: (&str, &str) = ("Content-Type", "application/offset+octet-stream");

async fn create_partial(server: &TestServer, content: &[u8]) -> String {
    let length = content.len().to_string();
    let (status, headers, _) = request(
        &server.router,
        "POST",
        "/files",
        &[
            TUS,
            ("Upload-Length", length.as_str()),
            ("Upload-Concat", "partial"),
            OFFSET_STREAM,
        ],
        content,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    location_id(&headers)
}

#[tokio::test]
async fn partial_uploads_report_their_role() {
    let server = TestServer::new().await;
    let id = create_partial(&server, b"abc").await;

    let (_, headers, _) = request(&server.router, "HEAD", &format!("/files/{id}"), &[], b"").await;
    assert_eq!(header(&headers, "upload-concat"), "partial");
}

#[tokio::test]
async fn final_upload_concatenates_partials() {
    let server = TestServer::new().await;
    let a = create_partial(&server, b"abc").await;
    let b = create_partial(&server, b"def").await;

    let concat = format!("final;/files/{a} /files/{b}");
    let (status, headers, _) = request(
        &server.router,
        "POST",
        "/files",
        &[TUS, ("Upload-Concat", concat.as_str())],
        b"",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = location_id(&headers);

    let (status, headers, _) = request(
        &server.router,
        "HEAD",
        &format!("/files/{id}"),
        &[("Host", "tus.example.com")],
        b"",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "upload-offset"), "6");
    assert_eq!(header(&headers, "upload-length"), "6");
    assert_eq!(
        header(&headers, "upload-concat"),
        format!(
            "final;http://tus.example.com/files/{a} http://tus.example.com/files/{b}"
        )
    );

    // The concatenated content is served as one object.
    let (status, _, body) =
        request(&server.router, "GET", &format!("/files/{id}"), &[], b"").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"abcdef");
}

#[tokio::test]
async fn final_upload_rejects_further_patches() {
    let server = TestServer::new().await;
    let a = create_partial(&server, b"abc").await;

    let concat = format!("final;/files/{a}");
    let (_, headers, _) = request(
        &server.router,
        "POST",
        "/files",
        &[TUS, ("Upload-Concat", concat.as_str())],
        b"",
    )
    .await;
    let id = location_id(&headers);

    let (status, _, body) = request(
        &server.router,
        "PATCH",
        &format!("/files/{id}"),
        &[TUS, OFFSET_STREAM, ("Upload-Offset", "3")],
        b"more",
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "ERR_MODIFY_FINAL");
}

#[tokio::test]
async fn final_upload_rejects_inline_body() {
    let server = TestServer::new().await;
    let a = create_partial(&server, b"abc").await;

    let concat = format!("final;/files/{a}");
    let (status, _, body) = request(
        &server.router,
        "POST",
        "/files",
        &[TUS, ("Upload-Concat", concat.as_str()), OFFSET_STREAM],
        b"inline",
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "ERR_MODIFY_FINAL");
}

#[tokio::test]
async fn final_upload_requires_complete_partials() {
    let server = TestServer::new().await;

    // A partial that has declared 5 bytes but only received 3.
    let (_, headers, _) = request(
        &server.router,
        "POST",
        "/files",
        &[
            TUS,
            ("Upload-Length", "5"),
            ("Upload-Concat", "partial"),
            OFFSET_STREAM,
        ],
        b"abc",
    )
    .await;
    let partial = location_id(&headers);

    let concat = format!("final;/files/{partial}");
    let (status, _, body) = request(
        &server.router,
        "POST",
        "/files",
        &[TUS, ("Upload-Concat", concat.as_str())],
        b"",
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "ERR_UPLOAD_NOT_FINISHED");
}

#[tokio::test]
async fn concat_header_without_ids_is_invalid() {
    let server = TestServer::new().await;
    let (status, _, body) = request(
        &server.router,
        "POST",
        "/files",
        &[TUS, ("Upload-Concat", "final;")],
        b"",
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "ERR_INVALID_CONCAT");
}

#[tokio::test]
async fn concat_referencing_unknown_upload_is_not_found() {
    let server = TestServer::new().await;
    let (status, _, body) = request(
        &server.router,
        "POST",
        "/files",
        &[TUS, ("Upload-Concat", "final;/files/nope")],
        b"",
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "ERR_UPLOAD_NOT_FOUND");
}
