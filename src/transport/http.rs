use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::wire::{DocumentDto, ErrorBodyDto, PendingVerificationDto, SubjectDocumentsDto};
use super::{DocumentTransport, TransportError, VerifyRequest};
use crate::config::ClientConfig;
use crate::models::{
    Document, DocumentId, DocumentType, PendingVerification, SubjectDocuments, SubjectId,
};
use crate::progress::ProgressReporter;
use crate::validator::CandidateFile;

/// Bytes handed to the HTTP body per progress report.
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// reqwest client for the document backend.
pub struct HttpDocumentTransport {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
    bearer_token: Option<String>,
    /// Owner assumed for subject-side responses that omit it.
    session_subject: Option<SubjectId>,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    notes: &'a str,
}

impl HttpDocumentTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs: config.timeout_secs,
            bearer_token: config.bearer_token.clone(),
            session_subject: None,
        })
    }

    /// Attribute ownerless upload responses to `subject`.
    pub fn with_session_subject(mut self, subject: SubjectId) -> Self {
        self.session_subject = Some(subject);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_connect() {
            TransportError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            TransportError::Timeout(self.timeout_secs)
        } else {
            TransportError::HttpClient(e.to_string())
        }
    }

    /// Send and turn non-2xx statuses into errors.
    async fn execute(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<Response, TransportError> {
        let response = builder.send().await.map_err(|e| self.send_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound(what.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBodyDto>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        tracing::warn!(status = status.as_u16(), what, %message, "Document service returned an error");
        Err(TransportError::Server {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::HttpClient(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    async fn body_bytes(response: Response) -> Result<Vec<u8>, TransportError> {
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TransportError::HttpClient(e.to_string()))
    }

    fn file_part(file: &CandidateFile, progress: ProgressReporter) -> Result<Part, TransportError> {
        let total = file.bytes.len() as u64;
        let chunks: Vec<Vec<u8>> = file
            .bytes
            .chunks(UPLOAD_CHUNK_BYTES)
            .map(<[u8]>::to_vec)
            .collect();

        let mut sent = 0u64;
        let stream = futures_util::stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            progress.report(sent, total);
            Ok::<_, std::io::Error>(chunk)
        }));

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
            .file_name(file.file_name.clone());
        match file.media_type() {
            Some(media) => part
                .mime_str(media.mime())
                .map_err(|e| TransportError::HttpClient(e.to_string())),
            None => Ok(part),
        }
    }
}

impl DocumentTransport for HttpDocumentTransport {
    async fn upload_document(
        &self,
        file: &CandidateFile,
        document_type: DocumentType,
        description: Option<&str>,
        progress: ProgressReporter,
    ) -> Result<Document, TransportError> {
        let mut form = Form::new()
            .part("file", Self::file_part(file, progress)?)
            .text("documentType", document_type.as_str().to_string());
        if let Some(description) = description.filter(|d| !d.trim().is_empty()) {
            form = form.text("description", description.trim().to_string());
        }

        tracing::debug!(
            document_type = %document_type,
            file = %file.file_name,
            size = file.size_bytes,
            "Uploading document"
        );

        let response = self
            .execute(
                self.request(Method::POST, "/doctor/documents").multipart(form),
                "upload",
            )
            .await?;
        let dto: DocumentDto = Self::json(response).await?;
        dto.into_document(self.session_subject.as_ref())
    }

    async fn delete_document(&self, document_id: &DocumentId) -> Result<(), TransportError> {
        self.execute(
            self.request(Method::DELETE, &format!("/doctor/documents/{document_id}")),
            &format!("document {document_id}"),
        )
        .await?;
        Ok(())
    }

    async fn view_document(&self, document_id: &DocumentId) -> Result<Vec<u8>, TransportError> {
        let response = self
            .execute(
                self.request(Method::GET, &format!("/doctor/documents/{document_id}/view")),
                &format!("document {document_id}"),
            )
            .await?;
        Self::body_bytes(response).await
    }

    async fn download_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Vec<u8>, TransportError> {
        let response = self
            .execute(
                self.request(
                    Method::GET,
                    &format!("/doctor/documents/{document_id}/download"),
                ),
                &format!("document {document_id}"),
            )
            .await?;
        Self::body_bytes(response).await
    }

    async fn submit_documents_for_review(&self, notes: &str) -> Result<(), TransportError> {
        self.execute(
            self.request(Method::POST, "/doctor/documents/submit-for-review")
                .json(&SubmitBody { notes }),
            "submission",
        )
        .await?;
        Ok(())
    }

    async fn get_documents_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<SubjectDocuments, TransportError> {
        let response = self
            .execute(
                self.request(Method::GET, &format!("/admin/doctors/{subject_id}/documents")),
                &format!("subject {subject_id}"),
            )
            .await?;
        let dto: SubjectDocumentsDto = Self::json(response).await?;
        dto.into_domain(subject_id)
    }

    async fn verify_document(
        &self,
        document_id: &DocumentId,
        request: &VerifyRequest,
    ) -> Result<(), TransportError> {
        self.execute(
            self.request(Method::PUT, &format!("/admin/documents/{document_id}/verify"))
                .json(request),
            &format!("document {document_id}"),
        )
        .await?;
        Ok(())
    }

    async fn verify_all_documents(
        &self,
        subject_id: &SubjectId,
        request: &VerifyRequest,
    ) -> Result<(), TransportError> {
        self.execute(
            self.request(
                Method::PUT,
                &format!("/admin/doctors/{subject_id}/documents/verify-all"),
            )
            .json(request),
            &format!("subject {subject_id}"),
        )
        .await?;
        Ok(())
    }

    async fn pending_verifications(&self) -> Result<Vec<PendingVerification>, TransportError> {
        let response = self
            .execute(
                self.request(Method::GET, "/admin/doctors/pending-verification"),
                "pending verifications",
            )
            .await?;
        let entries: Vec<PendingVerificationDto> = Self::json(response).await?;
        Ok(entries.into_iter().map(PendingVerification::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Multipart, Path, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};

    use super::*;
    use crate::models::VerificationStatus;
    use crate::progress::ProgressTracker;

    type Captured = Arc<Mutex<Vec<String>>>;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn transport(base_url: String) -> HttpDocumentTransport {
        let config = ClientConfig {
            api_base_url: base_url,
            timeout_secs: 5,
            bearer_token: Some("secret".into()),
            ..ClientConfig::default()
        };
        HttpDocumentTransport::new(&config).unwrap()
    }

    #[tokio::test]
    async fn trims_trailing_slash_from_base_url() {
        let t = transport("http://localhost:9/api/".into());
        assert_eq!(t.base_url(), "http://localhost:9/api");
    }

    #[tokio::test]
    async fn fetches_and_narrows_subject_documents() {
        let app = Router::new().route(
            "/admin/doctors/:id/documents",
            get(|Path(id): Path<String>| async move {
                Json(serde_json::json!({
                    "documents": [{
                        "id": 11,
                        "doctorId": id,
                        "documentType": "LICENSE",
                        "fileName": "license.pdf",
                        "mimeType": "application/pdf",
                        "verificationStatus": "PENDING"
                    }],
                    "hasAllRequiredDocuments": false,
                    "allDocumentsVerified": false
                }))
            }),
        );
        let t = transport(serve(app).await);

        let docs = t
            .get_documents_for_subject(&SubjectId::new("42"))
            .await
            .unwrap();

        assert_eq!(docs.documents.len(), 1);
        assert_eq!(docs.documents[0].subject_id, SubjectId::new("42"));
        assert_eq!(
            docs.documents[0].verification_status,
            VerificationStatus::Pending
        );
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let app = Router::new()
            .route(
                "/doctor/documents/:id",
                axum::routing::delete(|| async { StatusCode::NOT_FOUND }),
            )
            .route(
                "/doctor/documents/submit-for-review",
                post(|| async {
                    (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        Json(serde_json::json!({ "message": "required documents missing" })),
                    )
                }),
            )
            .route(
                "/admin/doctors/pending-verification",
                get(|| async { "not json" }),
            );
        let t = transport(serve(app).await);

        assert!(matches!(
            t.delete_document(&DocumentId::new("9")).await,
            Err(TransportError::NotFound(_))
        ));
        assert_eq!(
            t.submit_documents_for_review("please").await,
            Err(TransportError::Server {
                status: 422,
                message: "required documents missing".into()
            })
        );
        assert!(matches!(
            t.pending_verifications().await,
            Err(TransportError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let t = transport(format!("http://{addr}"));
        assert!(matches!(
            t.pending_verifications().await,
            Err(TransportError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn upload_sends_multipart_and_reports_progress() {
        let seen: Captured = Arc::default();
        let app = Router::new()
            .route(
                "/doctor/documents",
                post(
                    |State(seen): State<Captured>, mut multipart: Multipart| async move {
                        let mut size = 0;
                        while let Some(field) = multipart.next_field().await.unwrap() {
                            let name = field.name().unwrap_or_default().to_string();
                            let content_type = field.content_type().map(str::to_string);
                            let data = field.bytes().await.unwrap();
                            if name == "file" {
                                size = data.len();
                                seen.lock().unwrap().push(format!(
                                    "file:{}",
                                    content_type.unwrap_or_default()
                                ));
                            } else {
                                seen.lock().unwrap().push(format!(
                                    "{name}:{}",
                                    String::from_utf8_lossy(&data)
                                ));
                            }
                        }
                        Json(serde_json::json!({
                            "id": "u-1",
                            "documentType": "CERTIFICATE",
                            "fileName": "cert.png",
                            "fileSizeKB": size / 1024,
                            "mimeType": "image/png",
                            "verificationStatus": "PENDING"
                        }))
                    },
                ),
            )
            .with_state(seen.clone());
        let t = transport(serve(app).await).with_session_subject(SubjectId::new("42"));

        let tracker = ProgressTracker::new();
        let file = CandidateFile::new("cert.png", vec![7u8; 200 * 1024], Some("image/png"));
        let doc = t
            .upload_document(&file, DocumentType::Certificate, Some("board"), tracker.start())
            .await
            .unwrap();

        assert_eq!(doc.id, DocumentId::new("u-1"));
        assert_eq!(doc.subject_id, SubjectId::new("42"));
        assert_eq!(doc.file_size_kb, 200);
        assert_eq!(tracker.current().percent(), Some(100));

        let seen = seen.lock().unwrap().clone();
        assert!(seen.contains(&"file:image/png".to_string()));
        assert!(seen.contains(&"documentType:CERTIFICATE".to_string()));
        assert!(seen.contains(&"description:board".to_string()));
    }

    #[tokio::test]
    async fn verify_sends_decision_body_and_token() {
        let seen: Captured = Arc::default();
        let app = Router::new()
            .route(
                "/admin/documents/:id/verify",
                put(
                    |State(seen): State<Captured>,
                     headers: axum::http::HeaderMap,
                     Json(body): Json<serde_json::Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        seen.lock().unwrap().push(auth);
                        seen.lock().unwrap().push(body.to_string());
                        StatusCode::NO_CONTENT
                    },
                ),
            )
            .with_state(seen.clone());
        let t = transport(serve(app).await);

        t.verify_document(
            &DocumentId::new("5"),
            &VerifyRequest::single(false, Some("expired".into())),
        )
        .await
        .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen[0], "Bearer secret");
        let body: serde_json::Value = serde_json::from_str(&seen[1]).unwrap();
        assert_eq!(body["verified"], false);
        assert_eq!(body["verificationNotes"], "expired");
        assert!(body.get("documentIds").is_none());
    }

    #[tokio::test]
    async fn verify_all_sends_snapshot_ids() {
        let seen: Captured = Arc::default();
        let app = Router::new()
            .route(
                "/admin/doctors/:id/documents/verify-all",
                put(
                    |State(seen): State<Captured>, Json(body): Json<serde_json::Value>| async move {
                        seen.lock().unwrap().push(body.to_string());
                        StatusCode::NO_CONTENT
                    },
                ),
            )
            .with_state(seen.clone());
        let t = transport(serve(app).await);

        let mut request = VerifyRequest::single(true, Some("ok".into()));
        request.document_ids = vec![DocumentId::new("7"), DocumentId::new("9")];
        t.verify_all_documents(&SubjectId::new("42"), &request)
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        let body: serde_json::Value = serde_json::from_str(&seen[0]).unwrap();
        assert_eq!(body["verified"], true);
        assert_eq!(body["documentIds"], serde_json::json!(["7", "9"]));
    }
}
