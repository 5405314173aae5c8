//! HTTP front end over the edit pipeline.
//!
//! A fixed pool of worker threads shares one `tiny_http` listener; each
//! request is decoded, handled, and answered entirely within one worker, so
//! there is no cross-request state to protect. The pool size doubles as the
//! bound on concurrent in-flight decodes.

use std::io::Read;
use std::sync::Arc;
use std::thread;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tiny_http::{Header, Method, Request, Response, Server};

use crate::{
    address::{LayerAddress, TextEdit},
    composite::{CpuCompositor, PreviewArtifact},
    error::{OvertypeError, OvertypeResult},
    pipeline,
};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_WORKERS: usize = 4;

/// Configuration surface of the service: bind address, port, allowed
/// cross-origin callers, upload ceiling, worker count.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            allowed_origins: vec!["*".to_string()],
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// A bound, running server. Dropping the handle does not stop the workers;
/// call [`ServerHandle::shutdown`] or [`ServerHandle::join`].
pub struct ServerHandle {
    server: Arc<Server>,
    workers: Vec<thread::JoinHandle<()>>,
    port: u16,
}

impl ServerHandle {
    /// Actual port the listener bound to (useful with port 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Unblock the listener and wait for the workers to drain.
    pub fn shutdown(self) {
        // unblock() releases exactly one blocked recv(); every worker needs
        // its own wakeup.
        for _ in &self.workers {
            self.server.unblock();
        }
        for worker in self.workers {
            let _ = worker.join();
        }
    }

    /// Block until the workers exit on their own.
    pub fn join(self) {
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

/// Bind the listener and spawn the worker pool.
pub fn start(config: ServerConfig) -> OvertypeResult<ServerHandle> {
    let addr = format!("{}:{}", config.bind, config.port);
    let server = Server::http(&addr)
        .map_err(|e| OvertypeError::validation(format!("bind {addr}: {e}")))?;
    let port = server
        .server_addr()
        .to_ip()
        .map(|a| a.port())
        .unwrap_or(config.port);
    let server = Arc::new(server);

    let workers = (0..config.workers.max(1))
        .map(|i| {
            let server = server.clone();
            let config = config.clone();
            thread::Builder::new()
                .name(format!("overtype-worker-{i}"))
                .spawn(move || {
                    while let Ok(request) = server.recv() {
                        handle_request(request, &config);
                    }
                })
                .map_err(|e| OvertypeError::validation(format!("spawn worker: {e}")))
        })
        .collect::<OvertypeResult<Vec<_>>>()?;

    tracing::info!(port, workers = config.workers, "listening");
    Ok(ServerHandle {
        server,
        workers,
        port,
    })
}

#[derive(serde::Deserialize)]
struct UploadBody {
    document: String,
}

#[derive(serde::Deserialize)]
struct UpdateTextBody {
    document: String,
    address: usize,
    new_text: String,
    #[serde(default)]
    expected_digest: Option<String>,
}

#[derive(serde::Deserialize)]
struct EditBody {
    address: usize,
    new_text: String,
}

#[derive(serde::Deserialize)]
struct SaveBody {
    document: String,
    #[serde(default)]
    edit: Option<EditBody>,
    #[serde(default)]
    expected_digest: Option<String>,
}

fn handle_request(mut request: Request, config: &ServerConfig) {
    let method = request.method().clone();
    let method_str = method.to_string();
    let path = request
        .url()
        .split('?')
        .next()
        .unwrap_or("/")
        .to_string();
    let origin = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Origin"))
        .map(|h| h.value.as_str().to_string());
    let allow_origin = cors_origin(config, origin.as_deref());

    tracing::debug!(method = %method_str, %path, "request");

    let response = match (&method, path.as_str()) {
        (Method::Options, _) => preflight_response(),
        (Method::Get, "/health") => json_response(200, &serde_json::json!({"status": "ok"})),
        (Method::Post, "/upload") => handle_upload(&mut request, config),
        (Method::Post, "/update_text") => handle_update_text(&mut request, config),
        (Method::Post, "/save") => handle_save(&mut request, config),
        _ => error_response(
            404,
            "not_found",
            &format!("no route for {method_str} {path}"),
        ),
    };

    let mut response = response;
    if let Some(origin) = allow_origin
        && let Some(h) = header("Access-Control-Allow-Origin", &origin)
    {
        response.add_header(h);
    }
    let _ = request.respond(response);
}

fn cors_origin(config: &ServerConfig, request_origin: Option<&str>) -> Option<String> {
    if config.allowed_origins.iter().any(|o| o == "*") {
        return Some("*".to_string());
    }
    let origin = request_origin?;
    config
        .allowed_origins
        .iter()
        .find(|o| o.as_str() == origin)
        .cloned()
}

type JsonResponse = Response<std::io::Cursor<Vec<u8>>>;

fn handle_upload(request: &mut Request, config: &ServerConfig) -> JsonResponse {
    let body: UploadBody = match read_json_body(request, config) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let bytes = match decode_document_field(&body.document) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match pipeline::inspect(&bytes, &CpuCompositor) {
        Ok(outcome) => json_response(
            200,
            &serde_json::json!({
                "digest": outcome.digest,
                "canvas": outcome.canvas,
                "layers": outcome.layers,
                "preview": outcome.preview.as_ref().map(preview_json),
            }),
        ),
        Err(e) => pipeline_error_response(&e),
    }
}

fn handle_update_text(request: &mut Request, config: &ServerConfig) -> JsonResponse {
    let body: UpdateTextBody = match read_json_body(request, config) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let bytes = match decode_document_field(&body.document) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let edit = TextEdit {
        address: LayerAddress(body.address),
        new_text: body.new_text,
    };

    match pipeline::mutate(&bytes, &edit, body.expected_digest.as_deref(), &CpuCompositor) {
        Ok(outcome) => json_response(
            200,
            &serde_json::json!({
                "success": true,
                "digest": outcome.digest,
                "applied": outcome.applied,
                "preview": outcome.preview.as_ref().map(preview_json),
            }),
        ),
        Err(e) => pipeline_error_response(&e),
    }
}

fn handle_save(request: &mut Request, config: &ServerConfig) -> JsonResponse {
    let body: SaveBody = match read_json_body(request, config) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let bytes = match decode_document_field(&body.document) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let edit = body.edit.map(|e| TextEdit {
        address: LayerAddress(e.address),
        new_text: e.new_text,
    });

    match pipeline::reserialize(&bytes, edit.as_ref(), body.expected_digest.as_deref()) {
        Ok(encoded) => {
            let mut response = Response::from_data(encoded).with_status_code(200);
            if let Some(h) = header("Content-Type", "application/octet-stream") {
                response.add_header(h);
            }
            if let Some(h) = header(
                "Content-Disposition",
                "attachment; filename=\"document.otd\"",
            ) {
                response.add_header(h);
            }
            response
        }
        Err(e) => pipeline_error_response(&e),
    }
}

fn read_json_body<T: serde::de::DeserializeOwned>(
    request: &mut Request,
    config: &ServerConfig,
) -> Result<T, JsonResponse> {
    if let Some(len) = request.body_length()
        && len > config.max_upload_bytes
    {
        return Err(error_response(
            413,
            "upload_too_large",
            &format!(
                "upload of {len} bytes exceeds the {} byte ceiling",
                config.max_upload_bytes
            ),
        ));
    }

    let mut raw = Vec::new();
    let limit = config.max_upload_bytes as u64 + 1;
    if request
        .as_reader()
        .take(limit)
        .read_to_end(&mut raw)
        .is_err()
    {
        return Err(error_response(400, "validation", "failed to read request body"));
    }
    if raw.len() > config.max_upload_bytes {
        return Err(error_response(
            413,
            "upload_too_large",
            &format!(
                "upload exceeds the {} byte ceiling",
                config.max_upload_bytes
            ),
        ));
    }

    serde_json::from_slice(&raw)
        .map_err(|e| error_response(400, "validation", &format!("malformed request body: {e}")))
}

fn decode_document_field(document: &str) -> Result<Vec<u8>, JsonResponse> {
    if document.is_empty() {
        return Err(error_response(400, "validation", "no document supplied"));
    }
    BASE64.decode(document).map_err(|e| {
        error_response(
            400,
            "validation",
            &format!("document field is not valid base64: {e}"),
        )
    })
}

fn preview_json(preview: &PreviewArtifact) -> serde_json::Value {
    serde_json::json!({
        "width": preview.width,
        "height": preview.height,
        "png_base64": BASE64.encode(&preview.png),
    })
}

fn pipeline_error_response(err: &OvertypeError) -> JsonResponse {
    let status = match err {
        OvertypeError::Validation(_) => 400,
        OvertypeError::AddressOutOfRange { .. } | OvertypeError::NotATextLayer(_) => 404,
        OvertypeError::DocumentChanged { .. } => 409,
        OvertypeError::MalformedDocument(_)
        | OvertypeError::CompositingFailed(_)
        | OvertypeError::EncodingFailed(_)
        | OvertypeError::Other(_) => 500,
    };
    tracing::debug!(status, kind = err.kind(), error = %err, "request failed");
    error_response(status, err.kind(), &err.to_string())
}

fn error_response(status: u16, kind: &str, message: &str) -> JsonResponse {
    json_response(
        status,
        &serde_json::json!({ "error": { "kind": kind, "message": message } }),
    )
}

fn json_response(status: u16, value: &serde_json::Value) -> JsonResponse {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::from_data(body).with_status_code(status);
    if let Some(h) = header("Content-Type", "application/json") {
        response.add_header(h);
    }
    response
}

fn preflight_response() -> JsonResponse {
    let mut response = Response::from_data(Vec::new()).with_status_code(204);
    if let Some(h) = header("Access-Control-Allow-Methods", "GET, POST, OPTIONS") {
        response.add_header(h);
    }
    if let Some(h) = header("Access-Control-Allow-Headers", "Content-Type") {
        response.add_header(h);
    }
    response
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_wildcard_answers_any_origin() {
        let config = ServerConfig::default();
        assert_eq!(
            cors_origin(&config, Some("https://example.com")).as_deref(),
            Some("*")
        );
        assert_eq!(cors_origin(&config, None).as_deref(), Some("*"));
    }

    #[test]
    fn cors_list_matches_exactly() {
        let config = ServerConfig {
            allowed_origins: vec!["https://editor.example".to_string()],
            ..Default::default()
        };
        assert_eq!(
            cors_origin(&config, Some("https://editor.example")).as_deref(),
            Some("https://editor.example")
        );
        assert_eq!(cors_origin(&config, Some("https://evil.example")), None);
        assert_eq!(cors_origin(&config, None), None);
    }
}
