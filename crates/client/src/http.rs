//! REST implementation of [`JobStatusClient`].

use std::fmt;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use article_audio_core::{
    clamp_progress, parse_timestamp, ArticleId, AudioJob, AudioStream, ClientConfig, JobError,
    JobId, JobStatus, JobStatusClient, StatusSnapshot, VoiceOptions,
};

use crate::envelope::{self, Decoded};

/// Errors building an [`HttpJobStatusClient`].
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("API token contains characters not allowed in a header")]
    InvalidToken,

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// What a request is about; used to shape lookup errors.
#[derive(Clone, Copy)]
enum Subject<'a> {
    Job(&'a JobId),
    Article(&'a ArticleId),
}

impl fmt::Display for Subject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Job(id) => write!(f, "audio job {id}"),
            Subject::Article(id) => write!(f, "article {id}"),
        }
    }
}

/// Map a failing HTTP (or envelope) status onto the error taxonomy.
fn map_status(code: u16, message: String, subject: Subject<'_>) -> JobError {
    match code {
        400 | 422 => JobError::Validation(message),
        401 | 403 => JobError::Permission(message),
        404 => JobError::NotFound(subject.to_string()),
        409 | 425 => match subject {
            Subject::Job(id) => JobError::NotReady(id.clone()),
            Subject::Article(_) => JobError::Transport(format!("HTTP {code}: {message}")),
        },
        412 => JobError::Config(message),
        _ => JobError::Transport(format!("HTTP {code}: {message}")),
    }
}

fn transport(err: reqwest::Error) -> JobError {
    JobError::Transport(err.to_string())
}

#[derive(Deserialize)]
struct SubmitBody {
    #[serde(alias = "jobId")]
    id: JobId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    status: JobStatus,
    #[serde(default)]
    progress_percentage: Option<f64>,
    #[serde(default)]
    error_message: Option<String>,
}

impl From<StatusBody> for StatusSnapshot {
    fn from(body: StatusBody) -> Self {
        Self {
            status: body.status,
            progress: body.progress_percentage.and_then(clamp_progress),
            error_message: body.error_message,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobBody {
    id: JobId,
    #[serde(default)]
    article_id: Option<ArticleId>,
    status: JobStatus,
    #[serde(default)]
    progress_percentage: Option<f64>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
}

impl JobBody {
    fn into_job(self, fallback_article: &ArticleId) -> AudioJob {
        AudioJob {
            id: self.id,
            article_id: self.article_id.unwrap_or_else(|| fallback_article.clone()),
            status: self.status,
            progress: self.progress_percentage.and_then(clamp_progress),
            error_message: self.error_message,
            created_at: self.created_at.as_deref().and_then(parse_timestamp),
            file_name: self.file_name,
        }
    }
}

/// `JobStatusClient` over the platform's REST API.
#[derive(Debug, Clone)]
pub struct HttpJobStatusClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpJobStatusClient {
    pub fn new(config: &ClientConfig) -> Result<Self, BuildError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BuildError::InvalidBaseUrl(config.base_url.clone()));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| BuildError::InvalidToken)?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn article_url(&self, article_id: &ArticleId) -> String {
        format!(
            "{}/api/articles/{}/audio",
            self.base_url,
            urlencoding::encode(article_id.as_str())
        )
    }

    fn job_url(&self, job_id: &JobId, suffix: &str) -> String {
        format!(
            "{}/api/audio/{}{}",
            self.base_url,
            urlencoding::encode(job_id.as_str()),
            suffix
        )
    }

    /// Send a request and turn non-success HTTP statuses into `JobError`s.
    async fn send(&self, request: RequestBuilder, subject: Subject<'_>) -> Result<Response, JobError> {
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        let message = envelope::error_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
        tracing::debug!(status = status.as_u16(), %subject, %message, "backend rejected request");
        Err(map_status(status.as_u16(), message, subject))
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        response: Response,
        subject: Subject<'_>,
    ) -> Result<T, JobError> {
        let body = response.bytes().await.map_err(transport)?;
        match envelope::decode::<T>(&body) {
            Ok(Decoded::Data(data)) => Ok(data),
            Ok(Decoded::Rejected { code, message }) => Err(map_status(code, message, subject)),
            Err(e) => Err(JobError::Transport(format!("malformed response for {subject}: {e}"))),
        }
    }

    async fn ack(&self, response: Response, subject: Subject<'_>) -> Result<(), JobError> {
        let body = response.bytes().await.map_err(transport)?;
        match envelope::decode_ack(&body) {
            Decoded::Data(()) => Ok(()),
            Decoded::Rejected { code, message } => Err(map_status(code, message, subject)),
        }
    }
}

#[async_trait]
impl JobStatusClient for HttpJobStatusClient {
    async fn submit(
        &self,
        article_id: &ArticleId,
        options: &VoiceOptions,
    ) -> Result<JobId, JobError> {
        options.validate()?;
        let subject = Subject::Article(article_id);
        let request = self
            .http
            .post(self.article_url(article_id))
            .header(ACCEPT, "application/json")
            .json(options);
        let response = self.send(request, subject).await?;
        let body: SubmitBody = self.decode(response, subject).await?;
        tracing::debug!(article_id = %article_id, job_id = %body.id, "submission accepted");
        Ok(body.id)
    }

    async fn get_status(&self, job_id: &JobId) -> Result<StatusSnapshot, JobError> {
        let subject = Subject::Job(job_id);
        let request = self
            .http
            .get(self.job_url(job_id, "/status"))
            .header(ACCEPT, "application/json");
        let response = self.send(request, subject).await?;
        let body: StatusBody = self.decode(response, subject).await?;
        Ok(body.into())
    }

    async fn get_stream(&self, job_id: &JobId) -> Result<AudioStream, JobError> {
        let subject = Subject::Job(job_id);
        let request = self
            .http
            .get(self.job_url(job_id, "/stream"))
            .header(ACCEPT, "audio/*");
        let response = self.send(request, subject).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        // A JSON body here is an envelope, never audio.
        if content_type.starts_with("application/json") {
            self.ack(response, subject).await?;
            return Err(JobError::NotReady(job_id.clone()));
        }

        let bytes = response.bytes().await.map_err(transport)?;
        if bytes.is_empty() {
            return Err(JobError::NotReady(job_id.clone()));
        }
        Ok(AudioStream::new(content_type, bytes))
    }

    async fn list_jobs(&self, article_id: &ArticleId) -> Result<Vec<AudioJob>, JobError> {
        let subject = Subject::Article(article_id);
        let request = self
            .http
            .get(self.article_url(article_id))
            .header(ACCEPT, "application/json");
        let response = self.send(request, subject).await?;
        let bodies: Vec<JobBody> = self.decode(response, subject).await?;
        Ok(bodies
            .into_iter()
            .map(|body| body.into_job(article_id))
            .collect())
    }

    async fn delete(&self, job_id: &JobId) -> Result<(), JobError> {
        let subject = Subject::Job(job_id);
        let response = self
            .send(self.http.delete(self.job_url(job_id, "")), subject)
            .await?;
        self.ack(response, subject).await
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let job = JobId::from("j1");
        let article = ArticleId::from("a1");
        assert!(matches!(
            map_status(400, "bad".into(), Subject::Article(&article)),
            JobError::Validation(_)
        ));
        assert!(matches!(
            map_status(403, "no".into(), Subject::Article(&article)),
            JobError::Permission(_)
        ));
        assert!(matches!(
            map_status(412, "no default".into(), Subject::Article(&article)),
            JobError::Config(_)
        ));
        assert_eq!(
            map_status(404, "gone".into(), Subject::Job(&job)),
            JobError::NotFound("audio job j1".into())
        );
        assert_eq!(
            map_status(409, "busy".into(), Subject::Job(&job)),
            JobError::NotReady(job.clone())
        );
        assert!(matches!(
            map_status(503, "down".into(), Subject::Job(&job)),
            JobError::Transport(_)
        ));
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let config = ClientConfig {
            base_url: "ftp://cms".into(),
            ..Default::default()
        };
        assert!(matches!(
            HttpJobStatusClient::new(&config),
            Err(BuildError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_trims_trailing_slash() {
        let config = ClientConfig {
            base_url: "http://cms.local/".into(),
            ..Default::default()
        };
        let client = HttpJobStatusClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://cms.local");
        assert_eq!(
            client.job_url(&JobId::from("a b"), "/status"),
            "http://cms.local/api/audio/a%20b/status"
        );
    }

    #[test]
    fn test_job_body_conversion() {
        let body: JobBody = serde_json::from_str(
            r#"{"id":7,"status":"GENERATING","progressPercentage":42.6,"createdAt":"2024-01-02 03:04:05","fileName":"a.mp3"}"#,
        )
        .unwrap();
        let job = body.into_job(&ArticleId::from("art"));
        assert_eq!(job.id, JobId::from("7"));
        assert_eq!(job.article_id, ArticleId::from("art"));
        assert_eq!(job.progress, Some(43));
        assert!(job.created_at.is_some());
        assert_eq!(job.file_name.as_deref(), Some("a.mp3"));
    }
}
