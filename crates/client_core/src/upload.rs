use std::time::Duration;

use shared::{
    domain::{ConsultationKind, PatientId},
    protocol::Consultation,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    config::ClientSettings,
    error::{ClientError, ClientResult},
    session::SessionManager,
    types::DocumentFile,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadPhase {
    #[default]
    Idle,
    Transferring,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConfig {
    pub max_document_bytes: usize,
    pub submission_timeout: Duration,
}

impl From<&ClientSettings> for UploadConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            max_document_bytes: settings.max_document_bytes,
            submission_timeout: settings.submission_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDocument {
    pub patient_id: PatientId,
    pub document: DocumentFile,
}

/// Document state machine: `Idle -> Transferring -> {Committed | Failed} -> Idle`.
pub struct UploadSession {
    config: UploadConfig,
    phase: UploadPhase,
    pending: Option<PendingDocument>,
    phases: broadcast::Sender<UploadPhase>,
}

impl UploadSession {
    pub fn new(config: UploadConfig) -> Self {
        let (phases, _) = broadcast::channel(64);
        Self {
            config,
            phase: UploadPhase::Idle,
            pending: None,
            phases,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadPhase> {
        self.phases.subscribe()
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    pub fn pending(&self) -> Option<&PendingDocument> {
        self.pending.as_ref()
    }

    /// Sends `document` for analysis. Input problems are rejected before the
    /// phase leaves `Idle`.
    pub async fn submit(
        &mut self,
        sessions: &SessionManager,
        patient_id: PatientId,
        document: Option<DocumentFile>,
    ) -> ClientResult<Consultation> {
        if self.phase == UploadPhase::Transferring {
            return Err(ClientError::Busy("a document is already being transferred".into()));
        }
        let document = self.check(document)?;
        // A new file supersedes whatever was kept from a failed attempt.
        if let Some(previous) = self.pending.take() {
            info!(file = %previous.document.file_name, "upload: replacing pending document");
        }
        self.transfer(sessions, PendingDocument { patient_id, document })
            .await
    }

    pub async fn retry(&mut self, sessions: &SessionManager) -> ClientResult<Consultation> {
        if self.phase == UploadPhase::Transferring {
            return Err(ClientError::Busy("a document is already being transferred".into()));
        }
        let Some(pending) = self.pending.take() else {
            return Err(ClientError::Validation("no document is waiting for retry".into()));
        };
        self.transfer(sessions, pending).await
    }

    pub fn discard_pending(&mut self) -> Option<PendingDocument> {
        self.pending.take()
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.phase = UploadPhase::Idle;
    }

    fn check(&self, document: Option<DocumentFile>) -> ClientResult<DocumentFile> {
        let document =
            document.ok_or_else(|| ClientError::Validation("no document selected".into()))?;
        if document.is_empty() {
            return Err(ClientError::Validation(format!(
                "document '{}' is empty",
                document.file_name
            )));
        }
        if document.len() > self.config.max_document_bytes {
            return Err(ClientError::Validation(format!(
                "document '{}' is {} bytes; the limit is {}",
                document.file_name,
                document.len(),
                self.config.max_document_bytes
            )));
        }
        Ok(document)
    }

    async fn transfer(
        &mut self,
        sessions: &SessionManager,
        pending: PendingDocument,
    ) -> ClientResult<Consultation> {
        self.set_phase(UploadPhase::Transferring);
        let patient_id = pending.patient_id;
        let document = &pending.document;
        info!(
            patient_id = patient_id.0,
            file = %document.file_name,
            bytes = document.len(),
            "upload: transferring document"
        );
        let outcome = sessions
            .authenticated_within(
                "submit_document",
                self.config.submission_timeout,
                |backend, session| async move {
                    backend.submit_document(&session, patient_id, document).await
                },
            )
            .await
            .and_then(|record| match record.kind {
                ConsultationKind::Document => Ok(record),
                other => Err(ClientError::remote(
                    200,
                    format!("expected a document record, got {other}"),
                )),
            });

        match outcome {
            Ok(mut record) => {
                record.patient_id.get_or_insert(patient_id);
                info!(
                    consultation_id = record.id.0,
                    patient_id = patient_id.0,
                    "upload: document committed"
                );
                self.set_phase(UploadPhase::Committed);
                self.set_phase(UploadPhase::Idle);
                Ok(record)
            }
            Err(err) => {
                warn!(patient_id = patient_id.0, "upload: document failed: {err}");
                self.pending = Some(pending);
                self.set_phase(UploadPhase::Failed);
                self.set_phase(UploadPhase::Idle);
                Err(err)
            }
        }
    }

    fn set_phase(&mut self, phase: UploadPhase) {
        self.phase = phase;
        let _ = self.phases.send(phase);
    }
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;
