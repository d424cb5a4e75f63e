use std::sync::Arc;

use shared::{
    domain::{ConsultationId, PatientId},
    protocol::{Consultation, Patient, PatientDraft},
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    audio::AudioInput,
    capture::{CaptureConfig, CapturePhase, CaptureSession, PendingDictation},
    config::ClientSettings,
    consultations::ConsultationStore,
    directory::PatientDirectory,
    error::{ClientError, ClientResult, Notice, NoticeContext},
    session::{SessionEvent, SessionManager},
    types::DocumentFile,
    upload::{PendingDocument, UploadConfig, UploadPhase, UploadSession},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveModule {
    #[default]
    History,
    Dictation,
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceEvent {
    DirectoryUpdated {
        count: usize,
    },
    PatientSelected {
        patient_id: PatientId,
    },
    ModuleChanged {
        module: ActiveModule,
    },
    ConsultationAdded {
        patient_id: PatientId,
        consultation_id: ConsultationId,
    },
    NoticeRaised(Notice),
    /// Everything scoped to the previous session was dropped.
    Reset,
}

/// Per-operator workspace: the patient directory, the selected patient's
/// history and the dictation/document modules acting on it.
///
/// Commands take `&mut self`, so at most one capture or upload runs at a time.
/// Switching patient or module is refused while a dictation is recording.
///
/// A logout seen on the [`SessionManager`], whoever triggered it, drops all
/// patient data and releases the audio device before the next command or query
/// returns.
pub struct WorkspaceController {
    sessions: Arc<SessionManager>,
    session_events: broadcast::Receiver<SessionEvent>,
    session_epoch: Option<u64>,
    directory: PatientDirectory,
    selected: Option<PatientId>,
    module: ActiveModule,
    consultations: ConsultationStore,
    capture: CaptureSession,
    upload: UploadSession,
    notices: Vec<Notice>,
    events: broadcast::Sender<WorkspaceEvent>,
}

impl WorkspaceController {
    pub fn new(
        sessions: Arc<SessionManager>,
        audio: Arc<dyn AudioInput>,
        settings: &ClientSettings,
    ) -> Self {
        Self::with_configs(
            sessions,
            audio,
            CaptureConfig::from(settings),
            UploadConfig::from(settings),
        )
    }

    pub fn with_configs(
        sessions: Arc<SessionManager>,
        audio: Arc<dyn AudioInput>,
        capture: CaptureConfig,
        upload: UploadConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let session_events = sessions.subscribe();
        Self {
            sessions,
            session_events,
            session_epoch: None,
            directory: PatientDirectory::new(),
            selected: None,
            module: ActiveModule::History,
            consultations: ConsultationStore::new(),
            capture: CaptureSession::new(audio, capture),
            upload: UploadSession::new(upload),
            notices: Vec::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_capture(&self) -> broadcast::Receiver<CapturePhase> {
        self.capture.subscribe()
    }

    pub fn subscribe_upload(&self) -> broadcast::Receiver<UploadPhase> {
        self.upload.subscribe()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub async fn is_authenticated(&self) -> bool {
        self.sessions.is_authenticated().await
    }

    /// Loads the directory for a freshly mounted workspace.
    pub async fn mount(&mut self) -> ClientResult<usize> {
        self.refresh_patients().await
    }

    pub async fn refresh_patients(&mut self) -> ClientResult<usize> {
        self.sync_session().await;
        let fetched = self
            .directory
            .fetch_all(&self.sessions)
            .await
            .map(|patients| patients.len());
        match fetched {
            Ok(count) => {
                self.emit(WorkspaceEvent::DirectoryUpdated { count });
                Ok(count)
            }
            Err(err) => Err(self.raise(NoticeContext::ListPatients, err)),
        }
    }

    pub async fn add_patient(&mut self, draft: PatientDraft) -> ClientResult<Patient> {
        self.sync_session().await;
        match self.directory.add(&self.sessions, draft).await {
            Ok(patient) => {
                self.emit(WorkspaceEvent::DirectoryUpdated {
                    count: self.directory.len(),
                });
                Ok(patient)
            }
            Err(err) => Err(self.raise(NoticeContext::CreatePatient, err)),
        }
    }

    /// Shows `patient_id`'s own records, returns to the history module and drops
    /// capture/upload state left from the previous patient.
    pub async fn select_patient(&mut self, patient_id: PatientId) -> ClientResult<()> {
        self.sync_session().await;
        if self.capture.is_recording() {
            return Err(self.raise(
                NoticeContext::General,
                ClientError::Busy(
                    "stop or cancel the dictation before switching patient".into(),
                ),
            ));
        }
        let Some(patient) = self.directory.get(patient_id) else {
            return Err(self.raise(
                NoticeContext::General,
                ClientError::Validation(format!("unknown patient {patient_id}")),
            ));
        };

        self.consultations.seed(patient);
        self.capture.reset();
        self.upload.reset();
        self.selected = Some(patient_id);
        self.module = ActiveModule::History;
        info!(
            patient_id = patient_id.0,
            records = self.consultations.len(),
            "workspace: patient selected"
        );
        self.emit(WorkspaceEvent::PatientSelected { patient_id });
        self.emit(WorkspaceEvent::ModuleChanged {
            module: ActiveModule::History,
        });
        Ok(())
    }

    pub async fn set_module(&mut self, module: ActiveModule) -> ClientResult<()> {
        self.sync_session().await;
        if self.selected.is_none() {
            return Err(self.raise(
                NoticeContext::General,
                ClientError::Validation("no patient selected".into()),
            ));
        }
        if self.capture.is_recording() && module != ActiveModule::Dictation {
            return Err(self.raise(
                NoticeContext::General,
                ClientError::Busy("stop or cancel the dictation before leaving it".into()),
            ));
        }
        self.change_module(module);
        Ok(())
    }

    pub async fn start_dictation(&mut self) -> ClientResult<Uuid> {
        self.sync_session().await;
        let patient_id = self.require_patient(NoticeContext::Dictation)?;
        self.change_module(ActiveModule::Dictation);
        match self.capture.start(patient_id).await {
            Ok(session_id) => Ok(session_id),
            Err(err) => Err(self.raise(NoticeContext::Dictation, err)),
        }
    }

    pub async fn stop_dictation(&mut self) -> ClientResult<Consultation> {
        self.sync_session().await;
        match self.capture.stop(&self.sessions).await {
            Ok(record) => Ok(self.apply_submission(record)),
            Err(err) => Err(self.raise(NoticeContext::Dictation, err)),
        }
    }

    pub fn cancel_dictation(&mut self) -> bool {
        self.drain_session_events();
        self.capture.cancel()
    }

    pub async fn retry_dictation(&mut self) -> ClientResult<Consultation> {
        self.sync_session().await;
        match self.capture.retry(&self.sessions).await {
            Ok(record) => Ok(self.apply_submission(record)),
            Err(err) => Err(self.raise(NoticeContext::Dictation, err)),
        }
    }

    pub fn discard_dictation(&mut self) -> Option<PendingDictation> {
        self.drain_session_events();
        self.capture.discard_pending()
    }

    pub async fn submit_document(
        &mut self,
        document: Option<DocumentFile>,
    ) -> ClientResult<Consultation> {
        self.sync_session().await;
        let patient_id = self.require_patient(NoticeContext::Document)?;
        if self.capture.is_recording() {
            return Err(self.raise(
                NoticeContext::Document,
                ClientError::Busy(
                    "stop or cancel the dictation before sending a document".into(),
                ),
            ));
        }
        self.change_module(ActiveModule::Document);
        match self.upload.submit(&self.sessions, patient_id, document).await {
            Ok(record) => Ok(self.apply_submission(record)),
            Err(err) => Err(self.raise(NoticeContext::Document, err)),
        }
    }

    pub async fn retry_document(&mut self) -> ClientResult<Consultation> {
        self.sync_session().await;
        match self.upload.retry(&self.sessions).await {
            Ok(record) => Ok(self.apply_submission(record)),
            Err(err) => Err(self.raise(NoticeContext::Document, err)),
        }
    }

    pub fn discard_document(&mut self) -> Option<PendingDocument> {
        self.drain_session_events();
        self.upload.discard_pending()
    }

    pub async fn logout(&mut self) {
        self.sessions.logout().await;
        self.reset();
    }

    /// Drops every piece of state tied to the current session.
    pub fn reset(&mut self) {
        self.capture.reset();
        self.upload.reset();
        self.directory.clear();
        self.consultations.clear();
        self.selected = None;
        self.module = ActiveModule::History;
        self.notices.clear();
        self.session_epoch = None;
        info!("workspace: reset");
        self.emit(WorkspaceEvent::Reset);
    }

    pub fn directory(&mut self) -> &PatientDirectory {
        self.drain_session_events();
        &self.directory
    }

    pub fn patients(&mut self) -> &[Patient] {
        self.drain_session_events();
        self.directory.patients()
    }

    pub fn selected_patient(&mut self) -> Option<&Patient> {
        self.drain_session_events();
        self.selected.and_then(|id| self.directory.get(id))
    }

    pub fn active_module(&mut self) -> ActiveModule {
        self.drain_session_events();
        self.module
    }

    pub fn consultations(&mut self) -> &ConsultationStore {
        self.drain_session_events();
        &self.consultations
    }

    /// Selected patient's records, newest first.
    pub fn history(&mut self) -> Vec<&Consultation> {
        self.drain_session_events();
        self.consultations.history()
    }

    pub fn capture_phase(&mut self) -> CapturePhase {
        self.drain_session_events();
        self.capture.phase()
    }

    pub fn upload_phase(&mut self) -> UploadPhase {
        self.drain_session_events();
        self.upload.phase()
    }

    pub fn pending_dictation(&mut self) -> Option<&PendingDictation> {
        self.drain_session_events();
        self.capture.pending()
    }

    pub fn pending_document(&mut self) -> Option<&PendingDocument> {
        self.drain_session_events();
        self.upload.pending()
    }

    pub fn notices(&mut self) -> &[Notice] {
        self.drain_session_events();
        &self.notices
    }

    pub fn dismiss_notice(&mut self, index: usize) -> Option<Notice> {
        (index < self.notices.len()).then(|| self.notices.remove(index))
    }

    /// Resets when the session changed since the last command, so nothing
    /// loaded under an older token leaks into the new one.
    async fn sync_session(&mut self) {
        self.drain_session_events();
        let current = self.sessions.current().await.map(|session| session.epoch());
        if self.session_epoch.is_some() && self.session_epoch != current {
            warn!(
                previous = ?self.session_epoch,
                current = ?current,
                "workspace: session changed; resetting"
            );
            self.reset();
        }
        self.session_epoch = current;
    }

    /// Applies logouts published by the session manager since the last call.
    /// Only the end of the session this workspace loaded its data under resets it.
    fn drain_session_events(&mut self) {
        loop {
            match self.session_events.try_recv() {
                Ok(SessionEvent::LoggedOut { epoch, reason }) => {
                    if self.session_epoch == Some(epoch) {
                        warn!(epoch, ?reason, "workspace: session ended; resetting");
                        self.reset();
                    }
                }
                Ok(SessionEvent::LoggedIn { .. }) => {}
                Err(TryRecvError::Lagged(missed)) => {
                    if self.session_epoch.is_some() {
                        warn!(missed, "workspace: session events lagged; resetting");
                        self.reset();
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn require_patient(&mut self, context: NoticeContext) -> ClientResult<PatientId> {
        match self.selected {
            Some(patient_id) => Ok(patient_id),
            None => Err(self.raise(
                context,
                ClientError::Validation("no patient selected".into()),
            )),
        }
    }

    fn apply_submission(&mut self, record: Consultation) -> Consultation {
        if let Some(patient_id) = record.patient_id {
            self.directory.record_consultation(patient_id, record.clone());
            if self.selected == Some(patient_id) {
                self.consultations.merge(record.clone());
            }
            self.emit(WorkspaceEvent::ConsultationAdded {
                patient_id,
                consultation_id: record.id,
            });
        }
        self.change_module(ActiveModule::History);
        record
    }

    fn change_module(&mut self, module: ActiveModule) {
        if self.module != module {
            self.module = module;
            self.emit(WorkspaceEvent::ModuleChanged { module });
        }
    }

    fn raise(&mut self, context: NoticeContext, err: ClientError) -> ClientError {
        if err.requires_reauth() {
            self.reset();
        }
        let notice = Notice::from_error(context, &err);
        self.notices.push(notice.clone());
        self.emit(WorkspaceEvent::NoticeRaised(notice));
        err
    }

    fn emit(&self, event: WorkspaceEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/workspace_tests.rs"]
mod tests;
