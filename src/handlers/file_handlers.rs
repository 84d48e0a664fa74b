//! HTTP handlers for the `/api/v1/files` resource.
//! Uploads arrive as multipart forms and are buffered in memory; downloads
//! are streamed straight from the store.

use super::AppState;
use crate::{
    errors::AppError,
    models::metadata::{CONTENT_TYPE, Metadata},
    services::file_service::NewFile,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::debug;

/// Multipart part carrying the file content.
const FILE_FIELD: &str = "file";
/// Optional multipart part carrying a JSON object of extra metadata.
const METADATA_FIELD: &str = "metadata";

/// `GET /api/v1/files`: every file with size, modification time and metadata.
pub async fn list_files(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let files = state.files.list().await.map_err(|err| state.reject(err))?;
    Ok(Json(json!({ "files": files })))
}

/// `POST /api/v1/files`: multipart upload with optional `metadata` part.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut file: Option<(String, String, Bytes)> = None;
    let mut metadata = Metadata::new();

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some(FILE_FIELD) => {
                if file.is_some() {
                    return Err(AppError::bad_request("Unexpected field"));
                }
                let original_name = field.file_name().unwrap_or_default().to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let content = field.bytes().await?;
                file = Some((original_name, mime_type, content));
            }
            Some(METADATA_FIELD) => {
                let raw = field.text().await?;
                metadata = parse_metadata(raw.as_bytes())?;
            }
            other => debug!("ignoring multipart field {:?}", other),
        }
    }

    let (original_name, mime_type, content) =
        file.ok_or_else(|| AppError::bad_request("No file provided"))?;

    let object_name = state
        .files
        .upload(NewFile {
            content,
            original_name,
            mime_type,
            metadata,
        })
        .await
        .map_err(|err| state.reject(err))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "File uploaded successfully",
            "objectName": object_name,
        })),
    ))
}

/// `GET /api/v1/files/{name}`: stream the content as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let download = state
        .files
        .download(&name)
        .await
        .map_err(|err| state.reject(err))?;

    let mut response = Response::new(Body::from_stream(download.body));
    set_download_headers(
        response.headers_mut(),
        &name,
        download.stat.metadata.get(CONTENT_TYPE),
        download.stat.size,
    );
    Ok(response)
}

/// `DELETE /api/v1/files/{name}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .files
        .delete(&name)
        .await
        .map_err(|err| state.reject(err))?;
    Ok(Json(json!({ "message": "File deleted successfully" })))
}

/// `GET /api/v1/files/{name}/metadata`
pub async fn get_file_metadata(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let metadata = state
        .files
        .get_metadata(&name)
        .await
        .map_err(|err| state.reject(err))?;
    Ok(Json(json!({ "metadata": metadata })))
}

/// `PUT /api/v1/files/{name}/metadata`: merge a JSON object of strings
/// into the stored metadata.
pub async fn update_file_metadata(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let update = parse_metadata(&body)?;
    state
        .files
        .update_metadata(&name, &update)
        .await
        .map_err(|err| state.reject(err))?;
    Ok(Json(json!({ "message": "Metadata updated successfully" })))
}

/// Fallback for unknown routes.
pub async fn route_not_found() -> AppError {
    AppError::not_found("Route not found")
}

/// Accept only a JSON object whose values are all strings.
fn parse_metadata(raw: &[u8]) -> Result<Metadata, AppError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|_| AppError::bad_request("Invalid metadata format"))?;
    let Value::Object(entries) = value else {
        return Err(AppError::bad_request("Invalid metadata format"));
    };
    entries
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(text) => Ok((key, text)),
            _ => Err(AppError::bad_request(format!(
                "metadata value for `{}` must be a string",
                key
            ))),
        })
        .collect()
}

fn set_download_headers(
    headers: &mut HeaderMap,
    name: &str,
    content_type: Option<&str>,
    size: u64,
) {
    let content_type = content_type
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));

    let disposition = HeaderValue::from_str(&format!("attachment; filename={}", name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_body_must_be_object_of_strings() {
        let meta = parse_metadata(br#"{"test":"updated","Owner":"ops"}"#).unwrap();
        assert_eq!(meta.get("test"), Some("updated"));
        assert_eq!(meta.get("owner"), Some("ops"));

        let bad_bodies: [&[u8]; 4] = [b"not json", b"[1,2]", b"\"text\"", br#"{"n":1}"#];
        for bad in bad_bodies {
            let err = parse_metadata(bad).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn download_headers_fall_back_to_octet_stream() {
        let mut headers = HeaderMap::new();
        set_download_headers(&mut headers, "abc.txt", None, 10);
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(headers[header::CONTENT_LENGTH], "10");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=abc.txt"
        );
    }
}
