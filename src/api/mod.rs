//! HTTP boundary for the vault
//!
//! Authenticated endpoints for upload, download, token minting, case
//! listings, and deletion, plus the anonymous token-redemption endpoint
//! used by browser preview tags that cannot carry bearer-auth headers.
//! Authorization itself happens upstream; handlers trust that the caller
//! was already checked before the request reached this router.

use crate::error::Error;
use crate::token::{AccessTokenBroker, IssuedToken};
use crate::vault::FileVault;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Uploads are case documents, not bulk archives
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared state behind every handler
#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<FileVault>,
    pub broker: Arc<AccessTokenBroker>,
}

/// Error body returned to HTTP callers
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Vault error carried across the handler boundary
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Validation, integrity, and token failures are all client-visible
        // 400s; a failed decryption never leaks partial content, only the
        // error string
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Io(_) | Error::Repository(_) | Error::MissingBlob(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };

        if status.is_server_error() {
            error!("request failed: {}", self.0);
        } else {
            debug!("request rejected: {}", self.0);
        }

        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

/// Descriptor returned after a successful upload
#[derive(Serialize)]
struct FileDescriptor {
    #[serde(rename = "fileId")]
    file_id: Uuid,
    name: String,
    size: u64,
}

#[derive(Deserialize)]
struct SecureAccessQuery {
    #[serde(rename = "expirationMinutes", default = "default_expiration_minutes")]
    expiration_minutes: i64,
}

fn default_expiration_minutes() -> i64 {
    10
}

#[derive(Deserialize)]
struct CaseFilesQuery {
    area: String,
}

/// Builds the vault router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/files/upload", post(upload))
        .route("/api/files/download/:file_id", get(download))
        .route("/api/files/secure-access/:file_id", get(secure_access))
        .route("/api/files/access/:token", get(anonymous_access))
        .route("/api/files/case-files/:case_id", get(case_files))
        .route("/api/files/:file_id", delete(delete_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).into_inner())
}

/// Binds a listener and serves the vault router until shutdown
pub async fn serve(addr: SocketAddr, state: AppState) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<FileDescriptor>, ApiError> {
    let mut content = None;
    let mut file_name = None;
    let mut case_id = None;
    let mut area = None;
    let mut display_name = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidArgument(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(ToString::to_string);
                content = Some(field.bytes().await.map_err(|e| {
                    Error::InvalidArgument(format!("failed reading file part: {}", e))
                })?);
            }
            "caseId" => {
                case_id = Some(field.text().await.map_err(|e| {
                    Error::InvalidArgument(format!("failed reading caseId: {}", e))
                })?);
            }
            "area" => {
                area = Some(field.text().await.map_err(|e| {
                    Error::InvalidArgument(format!("failed reading area: {}", e))
                })?);
            }
            "displayName" => {
                display_name = Some(field.text().await.map_err(|e| {
                    Error::InvalidArgument(format!("failed reading displayName: {}", e))
                })?);
            }
            _ => {}
        }
    }

    let content = content.ok_or_else(|| Error::InvalidArgument("file part is required".into()))?;
    let case_id = case_id.ok_or_else(|| Error::InvalidArgument("caseId is required".into()))?;
    let area = area.ok_or_else(|| Error::InvalidArgument("area is required".into()))?;
    let file_name = file_name.unwrap_or_else(|| "upload.bin".to_string());
    let display_name = display_name.unwrap_or_else(|| file_name.clone());

    // TODO: thread the authenticated actor id through once the host app's
    // identity middleware is wired up
    let outcome = state
        .vault
        .upload(&content, &file_name, &display_name, &area, &case_id, "system")
        .await?;

    Ok(Json(FileDescriptor {
        file_id: outcome.file_id,
        name: display_name,
        size: outcome.size,
    }))
}

async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let file = state.vault.retrieve(file_id).await?;

    let headers = [
        (header::CONTENT_TYPE, content_type_for(&file.file_name).to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.file_name.replace('"', "")),
        ),
    ];
    Ok((headers, file.bytes).into_response())
}

async fn secure_access(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Query(query): Query<SecureAccessQuery>,
) -> Result<Json<IssuedToken>, ApiError> {
    let issued = state
        .broker
        .issue(file_id, query.expiration_minutes, "system")
        .await?;
    Ok(Json(issued))
}

async fn anonymous_access(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file_id = state.broker.redeem(&token).await?;
    let file = state.vault.retrieve(file_id).await?;

    let total = file.bytes.len() as u64;
    let content_type = content_type_for(&file.file_name).to_string();

    let base_headers = [
        (header::CONTENT_TYPE, content_type),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
        (header::ACCEPT_RANGES, "bytes".to_string()),
    ];

    // PDF viewers fetch previews in ranges; serve a single range when one
    // is requested, the whole body otherwise
    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        match parse_byte_range(range, total) {
            Some((start, end)) => {
                let slice = file.bytes[start as usize..=(end as usize)].to_vec();
                let content_range = format!("bytes {}-{}/{}", start, end, total);
                return Ok((
                    StatusCode::PARTIAL_CONTENT,
                    base_headers,
                    [(header::CONTENT_RANGE, content_range)],
                    slice,
                )
                    .into_response());
            }
            None if range.starts_with("bytes=") => {
                return Ok((
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{}", total))],
                )
                    .into_response());
            }
            None => {}
        }
    }

    Ok((base_headers, file.bytes).into_response())
}

async fn case_files(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    Query(query): Query<CaseFilesQuery>,
) -> Result<Json<Vec<crate::metadata::FileMetadata>>, ApiError> {
    let files = state.vault.list_case_files(&case_id, &query.area).await?;
    Ok(Json(files))
}

async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.vault.delete(file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Maps a stored filename to a response content type
///
/// Metadata does not persist a MIME type; the extension is enough for the
/// formats case documents come in.
fn content_type_for(file_name: &str) -> &'static str {
    let extension = std::path::Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Parses a single `bytes=` range against a known total length
///
/// Returns the inclusive satisfiable range, or None when the header is
/// malformed, multipart, or out of bounds.
fn parse_byte_range(header: &str, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }

    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }

    let (start_str, end_str) = spec.split_once('-')?;
    match (start_str.is_empty(), end_str.is_empty()) {
        // bytes=a-b
        (false, false) => {
            let start: u64 = start_str.parse().ok()?;
            let end: u64 = end_str.parse().ok()?;
            if start > end || start >= total {
                return None;
            }
            Some((start, end.min(total - 1)))
        }
        // bytes=a-
        (false, true) => {
            let start: u64 = start_str.parse().ok()?;
            if start >= total {
                return None;
            }
            Some((start, total - 1))
        }
        // bytes=-n, the final n bytes
        (true, false) => {
            let suffix: u64 = end_str.parse().ok()?;
            if suffix == 0 {
                return None;
            }
            Some((total.saturating_sub(suffix), total - 1))
        }
        (true, true) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte_range() {
        assert_eq!(parse_byte_range("bytes=0-99", 1000), Some((0, 99)));
        assert_eq!(parse_byte_range("bytes=500-", 1000), Some((500, 999)));
        assert_eq!(parse_byte_range("bytes=-100", 1000), Some((900, 999)));
        assert_eq!(parse_byte_range("bytes=0-5000", 1000), Some((0, 999)));
        assert_eq!(parse_byte_range("bytes=1000-1001", 1000), None);
        assert_eq!(parse_byte_range("bytes=5-2", 1000), None);
        assert_eq!(parse_byte_range("bytes=0-0", 0), None);
        assert_eq!(parse_byte_range("bytes=0-1,5-9", 1000), None);
        assert_eq!(parse_byte_range("items=0-1", 1000), None);
        assert_eq!(parse_byte_range("bytes=-", 1000), None);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("contract.pdf"), "application/pdf");
        assert_eq!(content_type_for("scan.JPG"), "image/jpeg");
        assert_eq!(content_type_for("archive"), "application/octet-stream");
        assert_eq!(
            content_type_for("πρακτικά.docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
    }
}
