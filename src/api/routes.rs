//! HTTP route handlers.
//!
//! `POST /v1/process/pdf` takes the PDF as the raw request body with
//! `Content-Type: application/pdf`; the client's file name and the
//! processing options travel as query parameters. Multipart form uploads
//! are rejected with 400; clients send the file bytes directly:
//!
//! ```text
//! curl -X POST --data-binary @paper.pdf -H 'Content-Type: application/pdf' \
//!     'http://localhost:8000/v1/process/pdf?filename=paper.pdf&wait_if_busy=true&timeout_s=60'
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::{AdmissionError, DocumentJob, JobError};
use crate::service::AdmissionService;

use super::schemas::{ErrorBody, HealthResponse, ProcessParams, StatusResponse};

/// An error response with an optional `Retry-After` header.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
    retry_after: Option<u64>,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
            retry_after: None,
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
            retry_after: None,
        }
    }

    /// Map a job failure onto a status code.
    #[must_use]
    pub fn from_job(err: &JobError, server: &ServerConfig) -> Self {
        match err {
            JobError::Admission(AdmissionError::Busy) => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                detail: "GPU is busy with another PDF processing request; try again shortly".into(),
                retry_after: Some(server.busy_retry_after_secs),
            },
            JobError::Admission(AdmissionError::Timeout { waited }) => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                detail: format!(
                    "GPU is still busy after waiting for {:.1} seconds; try again later",
                    waited.as_secs_f64()
                ),
                retry_after: Some(server.timeout_retry_after_secs),
            },
            JobError::Admission(AdmissionError::Cancelled) => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                detail: "request cancelled before a GPU slot was granted".into(),
                retry_after: None,
            },
            JobError::Admission(AdmissionError::InvalidRequest(msg)) => Self::bad_request(msg.clone()),
            JobError::Usage(e) => Self::internal(format!("admission bookkeeping error: {e}")),
            JobError::Pipeline(e) => Self::internal(e.to_string()),
        }
    }

    /// Response status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorBody {
                detail: self.detail,
            }),
        )
            .into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

async fn health(State(service): State<Arc<AdmissionService>>) -> Json<HealthResponse> {
    Json(service.health().into())
}

async fn models_status(State(service): State<Arc<AdmissionService>>) -> Json<StatusResponse> {
    Json(StatusResponse::new(service.status(), service.health()))
}

fn is_pdf(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/pdf"))
}

async fn process_pdf(
    State(service): State<Arc<AdmissionService>>,
    headers: HeaderMap,
    params: Result<Query<ProcessParams>, QueryRejection>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if !is_pdf(&headers) {
        return Err(ApiError::bad_request(
            "Invalid file type. Only PDF files are supported.",
        ));
    }
    if body.is_empty() {
        return Err(ApiError::bad_request("Empty file uploaded."));
    }

    let options = params
        .render_options(service.settings().seed)
        .map_err(ApiError::bad_request)?;
    let timeout = params.timeout().map_err(ApiError::bad_request)?;
    let job = DocumentJob::new(params.filename.unwrap_or_default(), body.to_vec(), options);
    let job_id = job.id;

    let artifact = service
        .process(job, params.wait_if_busy, timeout)
        .await
        .map_err(|e| ApiError::from_job(&e, &service.settings().server))?;

    let bytes = tokio::fs::read(&artifact.path).await;
    if let Some(dir) = &artifact.scratch_dir {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            warn!(job_id = %job_id, dir = ?dir, error = %e, "failed to remove scratch directory");
        }
    }
    let bytes = bytes.map_err(|e| ApiError::internal(format!("failed to read artifact: {e}")))?;

    info!(job_id = %job_id, size = bytes.len(), file = %artifact.file_name, "sending artifact");
    let disposition = format!(
        "attachment; filename=\"{}\"",
        artifact.file_name.replace(['"', '\\'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, artifact.media_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Build the router.
pub fn routes(service: Arc<AdmissionService>) -> Router {
    let upload_limit = service.settings().server.max_upload_bytes;
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/models/status", get(models_status))
        .route(
            "/v1/process/pdf",
            post(process_pdf).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::builders::build_service;
    use crate::config::Settings;
    use crate::core::{Artifact, DocumentPipeline, PipelineError};

    /// Writes the job's stem into a file under `root` and returns it.
    struct EchoPipeline {
        root: PathBuf,
    }

    #[async_trait]
    impl DocumentPipeline for EchoPipeline {
        async fn process(&self, job: DocumentJob) -> Result<Artifact, PipelineError> {
            let dir = self.root.join(job.id.to_string());
            let path = dir.join("result.zip");
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| PipelineError::Workspace { path: dir.clone(), source })?;
            tokio::fs::write(&path, job.stem())
                .await
                .map_err(|source| PipelineError::Workspace { path: path.clone(), source })?;
            Ok(Artifact {
                path,
                media_type: "application/zip".into(),
                file_name: format!("{}_markdown.zip", job.stem()),
                scratch_dir: Some(dir),
            })
        }
    }

    fn service(root: PathBuf) -> Arc<AdmissionService> {
        Arc::new(
            build_service(Settings::default(), |_| true, Arc::new(EchoPipeline { root })).unwrap(),
        )
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn upload(uri: &str, content_type: &str, body: &'static [u8]) -> Request<Body> {
        Request::post(uri)
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_model_names() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes(service(dir.path().to_path_buf()));

        let response = app
            .oneshot(Request::get("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["ocr_model"], "deepseek-ai/DeepSeek-OCR");
        assert_eq!(json["vl2_model"], "deepseek-ai/deepseek-vl2-tiny");
    }

    #[tokio::test]
    async fn status_reflects_held_slot() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path().to_path_buf());
        let app = routes(Arc::clone(&service));

        let _ticket = service
            .controller()
            .acquire(&crate::core::AdmissionRequest::fail_fast())
            .await
            .unwrap();
        let response = app
            .oneshot(Request::get("/v1/models/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = response_json(response).await;
        assert_eq!(json["busy"], true);
        assert_eq!(json["capacity"], 1);
        assert_eq!(json["in_use"], 1);
        assert_eq!(json["available"], 0);
        assert_eq!(json["models"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn process_returns_named_attachment_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes(service(dir.path().to_path_buf()));

        let response = app
            .oneshot(upload(
                "/v1/process/pdf?filename=report.pdf",
                "application/pdf",
                b"%PDF-1.7",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report_markdown.zip\""
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"report");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn rejects_non_pdf_and_empty_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes(service(dir.path().to_path_buf()));

        let response = app
            .clone()
            .oneshot(upload("/v1/process/pdf", "text/plain", b"hello"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(upload("/v1/process/pdf", "application/pdf", b""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_json(response).await["detail"], "Empty file uploaded.");
    }

    #[tokio::test]
    async fn multipart_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes(service(dir.path().to_path_buf()));

        let response = app
            .oneshot(upload(
                "/v1/process/pdf",
                "multipart/form-data; boundary=X",
                b"--X\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\n%PDF\r\n--X--",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response_json(response).await["detail"],
            "Invalid file type. Only PDF files are supported."
        );
    }

    #[tokio::test]
    async fn timeout_without_wait_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes(service(dir.path().to_path_buf()));

        let response = app
            .oneshot(upload(
                "/v1/process/pdf?timeout_s=5",
                "application/pdf",
                b"%PDF-1.7",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert!(json["detail"].as_str().unwrap().contains("wait_if_busy"));
    }

    #[tokio::test]
    async fn busy_maps_to_429_with_retry_after() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path().to_path_buf());
        let app = routes(Arc::clone(&service));
        let _held = service
            .controller()
            .acquire(&crate::core::AdmissionRequest::fail_fast())
            .await
            .unwrap();

        let response = app
            .oneshot(upload("/v1/process/pdf", "application/pdf", b"%PDF-1.7"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "15");
    }

    #[test]
    fn timeout_maps_to_503_with_retry_after() {
        let err = JobError::Admission(AdmissionError::Timeout {
            waited: Duration::from_millis(2500),
        });
        let api = ApiError::from_job(&err, &ServerConfig::default());
        assert_eq!(api.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = api.into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    }
}
