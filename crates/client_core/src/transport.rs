use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ConsultationKind, PatientId},
    error::ErrorBody,
    protocol::{
        dictation_route, document_route, login_route, patients_route, signup_route, whoami_route,
        Consultation, Patient, PatientDraft, SignupRequest, SignupResponse, SubmissionRejection,
        SubmissionResponse, TokenResponse, WhoAmIResponse, DICTATION_FIELD, DOCUMENT_FIELD,
    },
};
use tracing::debug;

use crate::{
    config::ClientSettings,
    error::{ClientError, ClientResult},
    session::Session,
    types::{AudioArtifact, Credentials, DocumentFile},
};

/// Remote clinical backend as seen by the client core.
///
/// A `401` from any method taking a [`Session`] must surface as
/// [`ClientError::Auth`] so the session manager can end the session.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Exchanges credentials for a bearer token.
    async fn login(&self, credentials: &Credentials) -> ClientResult<String>;
    async fn signup(&self, credentials: &Credentials) -> ClientResult<Option<String>>;
    async fn whoami(&self, session: &Session) -> ClientResult<WhoAmIResponse>;
    async fn list_patients(&self, session: &Session) -> ClientResult<Vec<Patient>>;
    async fn create_patient(&self, session: &Session, draft: &PatientDraft)
        -> ClientResult<Patient>;
    async fn submit_dictation(
        &self,
        session: &Session,
        patient_id: PatientId,
        audio: &AudioArtifact,
    ) -> ClientResult<Consultation>;
    async fn submit_document(
        &self,
        session: &Session,
        patient_id: PatientId,
        document: &DocumentFile,
    ) -> ClientResult<Consultation>;
}

pub struct HttpBackend {
    http: Client,
    base_url: String,
    submission_timeout: Duration,
}

impl HttpBackend {
    pub fn new(settings: &ClientSettings) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: settings.backend_url.trim_end_matches('/').to_string(),
            submission_timeout: settings.submission_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }

    async fn post_submission(
        &self,
        session: &Session,
        route: String,
        form: Form,
        kind: ConsultationKind,
    ) -> ClientResult<Consultation> {
        debug!(route = %route, kind = %kind, "http: posting submission");
        let response = self
            .http
            .post(self.url(&route))
            .bearer_auth(session.bearer())
            .timeout(self.submission_timeout)
            .multipart(form)
            .send()
            .await?;
        expect_record(response, kind).await
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn login(&self, credentials: &Credentials) -> ClientResult<String> {
        let response = self
            .http
            .post(self.url(login_route()))
            .form(&[
                ("username", credentials.email.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;
        let body: TokenResponse = expect_json(response).await?;
        body.access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ClientError::remote(200, "login response carried no access token"))
    }

    async fn signup(&self, credentials: &Credentials) -> ClientResult<Option<String>> {
        let response = self
            .http
            .post(self.url(signup_route()))
            .json(&SignupRequest {
                email: credentials.email.clone(),
                password: credentials.password.clone(),
            })
            .send()
            .await?;
        let body: SignupResponse = expect_json(response).await?;
        Ok(body.access_token.filter(|token| !token.is_empty()))
    }

    async fn whoami(&self, session: &Session) -> ClientResult<WhoAmIResponse> {
        let response = self
            .http
            .get(self.url(whoami_route()))
            .bearer_auth(session.bearer())
            .send()
            .await?;
        expect_json(response).await
    }

    async fn list_patients(&self, session: &Session) -> ClientResult<Vec<Patient>> {
        let response = self
            .http
            .get(self.url(patients_route()))
            .bearer_auth(session.bearer())
            .send()
            .await?;
        expect_json(response).await
    }

    async fn create_patient(
        &self,
        session: &Session,
        draft: &PatientDraft,
    ) -> ClientResult<Patient> {
        let response = self
            .http
            .post(self.url(patients_route()))
            .bearer_auth(session.bearer())
            .json(draft)
            .send()
            .await?;
        expect_json(response).await
    }

    async fn submit_dictation(
        &self,
        session: &Session,
        patient_id: PatientId,
        audio: &AudioArtifact,
    ) -> ClientResult<Consultation> {
        let part = Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime_type)
            .map_err(|err| invalid_mime(&audio.mime_type, err))?;
        let form = Form::new().part(DICTATION_FIELD, part);
        self.post_submission(
            session,
            dictation_route(patient_id),
            form,
            ConsultationKind::Dictation,
        )
        .await
    }

    async fn submit_document(
        &self,
        session: &Session,
        patient_id: PatientId,
        document: &DocumentFile,
    ) -> ClientResult<Consultation> {
        let part = Part::bytes(document.bytes.clone())
            .file_name(document.file_name.clone())
            .mime_str(&document.mime_type)
            .map_err(|err| invalid_mime(&document.mime_type, err))?;
        let form = Form::new().part(DOCUMENT_FIELD, part);
        self.post_submission(
            session,
            document_route(patient_id),
            form,
            ConsultationKind::Document,
        )
        .await
    }
}

async fn expect_json<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        let detail = read_detail(response).await;
        return Err(ClientError::Auth(
            detail.unwrap_or_else(|| "credentials rejected".to_string()),
        ));
    }
    if !status.is_success() {
        let detail = read_detail(response).await;
        return Err(ClientError::remote(
            status.as_u16(),
            detail.unwrap_or_else(|| fallback_reason(status)),
        ));
    }
    Ok(response.json::<T>().await?)
}

async fn expect_record(response: Response, kind: ConsultationKind) -> ClientResult<Consultation> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        let detail = read_detail(response).await;
        return Err(ClientError::Auth(
            detail.unwrap_or_else(|| "credentials rejected".to_string()),
        ));
    }
    let bytes = response.bytes().await?;
    let parsed = match serde_json::from_slice::<SubmissionResponse>(&bytes) {
        Ok(parsed) => parsed,
        Err(err) if status.is_success() => {
            return Err(ClientError::remote(
                status.as_u16(),
                format!("malformed response: {err}"),
            ));
        }
        Err(_) => {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            let detail = if text.is_empty() {
                fallback_reason(status)
            } else {
                text
            };
            return Err(ClientError::remote(status.as_u16(), detail));
        }
    };
    parsed
        .into_consultation(kind)
        .map_err(|rejection| rejection_error(status, kind, rejection))
}

fn rejection_error(
    status: StatusCode,
    kind: ConsultationKind,
    rejection: SubmissionRejection,
) -> ClientError {
    let detail = match rejection {
        SubmissionRejection::MissingId { detail } => detail.unwrap_or_else(|| match kind {
            ConsultationKind::Dictation => "transcription returned no record".to_string(),
            ConsultationKind::Document => "document analysis returned no record".to_string(),
        }),
        SubmissionRejection::KindMismatch { expected, actual } => {
            format!("expected a {expected} record, backend returned {actual}")
        }
        SubmissionRejection::MissingField(field) => format!("record is missing '{field}'"),
        SubmissionRejection::BadTimestamp(value) => {
            format!("record has an unreadable creation_date '{value}'")
        }
    };
    ClientError::remote(status.as_u16(), detail)
}

async fn read_detail(response: Response) -> Option<String> {
    let bytes = response.bytes().await.ok()?;
    if let Ok(body) = serde_json::from_slice::<ErrorBody>(&bytes) {
        if let Some(message) = body.message() {
            return Some(message);
        }
    }
    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn invalid_mime(mime_type: &str, err: reqwest::Error) -> ClientError {
    ClientError::Validation(format!("invalid mime type '{mime_type}': {err}"))
}

fn fallback_reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
