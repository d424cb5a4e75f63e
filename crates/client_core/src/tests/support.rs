//! In-memory fakes of the backend and audio seams shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{ConsultationId, ConsultationKind, PatientId},
    protocol::{timestamp, Consultation, Patient, PatientDraft, WhoAmIResponse},
};
use tokio::sync::{mpsc, Mutex};

use crate::{
    audio::{AudioChunk, AudioDevice, AudioInput},
    error::{ClientError, ClientResult},
    session::{Session, SessionManager},
    transport::BackendApi,
    types::{AudioArtifact, Credentials, DocumentFile},
};

pub(crate) const TOKEN: &str = "abc123";
pub(crate) const PASSWORD: &str = "secret";

pub(crate) fn patient(id: i64, nom: &str) -> Patient {
    Patient {
        id: PatientId(id),
        nom: nom.to_string(),
        prenom: "A".to_string(),
        date_naissance: None,
        medecin_id: None,
        consultations: Vec::new(),
    }
}

pub(crate) fn record(id: i64, kind: ConsultationKind, date: &str) -> Consultation {
    Consultation {
        id: ConsultationId(id),
        kind,
        content: format!("{kind} {id}"),
        creation_date: timestamp::parse(date).expect("date"),
        patient_id: None,
    }
}

pub(crate) fn credentials() -> Credentials {
    Credentials::new("doc@example.org", PASSWORD)
}

pub(crate) async fn logged_in(backend: Arc<FakeBackend>) -> Arc<SessionManager> {
    let sessions = SessionManager::with_request_timeout(backend, Duration::from_secs(5));
    sessions.login(&credentials()).await.expect("login");
    sessions
}

pub(crate) struct FakeBackend {
    token: String,
    signup_token: Option<String>,
    expired: AtomicBool,
    patients: Mutex<Vec<Patient>>,
    next_patient_id: Mutex<i64>,
    list_failure: Mutex<Option<ClientError>>,
    create_failure: Mutex<Option<ClientError>>,
    forced_patient_id: Mutex<Option<PatientId>>,
    dictation_responses: Mutex<VecDeque<ClientResult<Consultation>>>,
    document_responses: Mutex<VecDeque<ClientResult<Consultation>>>,
    submission_delay: Mutex<Option<Duration>>,
    next_consultation_id: Mutex<i64>,
    pub(crate) received_audio: Mutex<Vec<(PatientId, AudioArtifact)>>,
    pub(crate) received_documents: Mutex<Vec<(PatientId, DocumentFile)>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            token: TOKEN.to_string(),
            signup_token: None,
            expired: AtomicBool::new(false),
            patients: Mutex::new(Vec::new()),
            next_patient_id: Mutex::new(100),
            list_failure: Mutex::new(None),
            create_failure: Mutex::new(None),
            forced_patient_id: Mutex::new(None),
            dictation_responses: Mutex::new(VecDeque::new()),
            document_responses: Mutex::new(VecDeque::new()),
            submission_delay: Mutex::new(None),
            next_consultation_id: Mutex::new(1000),
            received_audio: Mutex::new(Vec::new()),
            received_documents: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_patients(patients: Vec<Patient>) -> Self {
        let backend = Self::new();
        *backend.patients.try_lock().expect("fresh backend") = patients;
        backend
    }

    pub(crate) fn with_signup_token(mut self, token: Option<&str>) -> Self {
        self.signup_token = token.map(str::to_string);
        self
    }

    /// Every later bearer call answers as if the token had expired.
    pub(crate) fn expire_token(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    pub(crate) async fn fail_next_list(&self, err: ClientError) {
        *self.list_failure.lock().await = Some(err);
    }

    pub(crate) async fn fail_next_create(&self, err: ClientError) {
        *self.create_failure.lock().await = Some(err);
    }

    pub(crate) async fn force_patient_id(&self, id: PatientId) {
        *self.forced_patient_id.lock().await = Some(id);
    }

    pub(crate) async fn push_dictation(&self, response: ClientResult<Consultation>) {
        self.dictation_responses.lock().await.push_back(response);
    }

    pub(crate) async fn push_document(&self, response: ClientResult<Consultation>) {
        self.document_responses.lock().await.push_back(response);
    }

    pub(crate) async fn delay_submissions(&self, delay: Duration) {
        *self.submission_delay.lock().await = Some(delay);
    }

    pub(crate) async fn calls(&self, name: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| **call == name)
            .count()
    }

    async fn authorize(&self, op: &'static str, session: &Session) -> ClientResult<()> {
        self.calls.lock().await.push(op);
        if self.expired.load(Ordering::SeqCst) || session.bearer() != self.token {
            return Err(ClientError::Auth("Could not validate credentials".into()));
        }
        Ok(())
    }

    async fn next_record(
        &self,
        queue: &Mutex<VecDeque<ClientResult<Consultation>>>,
        kind: ConsultationKind,
    ) -> ClientResult<Consultation> {
        if let Some(delay) = *self.submission_delay.lock().await {
            tokio::time::sleep(delay).await;
        }
        if let Some(response) = queue.lock().await.pop_front() {
            return response;
        }
        let mut next = self.next_consultation_id.lock().await;
        *next += 1;
        Ok(record(*next, kind, "2024-06-01T09:00:00Z"))
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn login(&self, credentials: &Credentials) -> ClientResult<String> {
        self.calls.lock().await.push("login");
        if credentials.password != PASSWORD {
            return Err(ClientError::Auth("Email ou mot de passe incorrect".into()));
        }
        Ok(self.token.clone())
    }

    async fn signup(&self, _credentials: &Credentials) -> ClientResult<Option<String>> {
        self.calls.lock().await.push("signup");
        Ok(self.signup_token.clone())
    }

    async fn whoami(&self, session: &Session) -> ClientResult<WhoAmIResponse> {
        self.authorize("whoami", session).await?;
        Ok(WhoAmIResponse {
            email: "doc@example.org".into(),
            id: None,
        })
    }

    async fn list_patients(&self, session: &Session) -> ClientResult<Vec<Patient>> {
        self.authorize("list_patients", session).await?;
        if let Some(err) = self.list_failure.lock().await.take() {
            return Err(err);
        }
        Ok(self.patients.lock().await.clone())
    }

    async fn create_patient(
        &self,
        session: &Session,
        draft: &PatientDraft,
    ) -> ClientResult<Patient> {
        self.authorize("create_patient", session).await?;
        if let Some(err) = self.create_failure.lock().await.take() {
            return Err(err);
        }
        let id = match self.forced_patient_id.lock().await.take() {
            Some(id) => id,
            None => {
                let mut next = self.next_patient_id.lock().await;
                *next += 1;
                PatientId(*next)
            }
        };
        let created = Patient {
            id,
            nom: draft.nom.clone(),
            prenom: draft.prenom.clone(),
            date_naissance: draft.date_naissance,
            medecin_id: None,
            consultations: Vec::new(),
        };
        self.patients.lock().await.push(created.clone());
        Ok(created)
    }

    async fn submit_dictation(
        &self,
        session: &Session,
        patient_id: PatientId,
        audio: &AudioArtifact,
    ) -> ClientResult<Consultation> {
        self.authorize("submit_dictation", session).await?;
        self.received_audio
            .lock()
            .await
            .push((patient_id, audio.clone()));
        self.next_record(&self.dictation_responses, ConsultationKind::Dictation)
            .await
    }

    async fn submit_document(
        &self,
        session: &Session,
        patient_id: PatientId,
        document: &DocumentFile,
    ) -> ClientResult<Consultation> {
        self.authorize("submit_document", session).await?;
        self.received_documents
            .lock()
            .await
            .push((patient_id, document.clone()));
        self.next_record(&self.document_responses, ConsultationKind::Document)
            .await
    }
}

/// Audio input replaying fixed chunks, counting opens and releases.
pub(crate) struct ScriptedAudioInput {
    chunks: Vec<Vec<u8>>,
    fail_open: Option<String>,
    fail_start: Option<String>,
    live: bool,
    opens: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedAudioInput {
    pub(crate) fn with_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            fail_open: None,
            fail_start: None,
            live: false,
            opens: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn speech() -> Self {
        Self::with_chunks(vec![b"RIFF".to_vec(), b"chunk-1".to_vec(), b"chunk-2".to_vec()])
    }

    pub(crate) fn denied() -> Self {
        let mut input = Self::speech();
        input.fail_open = Some("microphone permission denied".into());
        input
    }

    pub(crate) fn failing_start() -> Self {
        let mut input = Self::speech();
        input.fail_start = Some("stream could not start".into());
        input
    }

    /// Keeps the chunk channel open until the device is released, like a microphone.
    pub(crate) fn live(mut self) -> Self {
        self.live = true;
        self
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioInput for ScriptedAudioInput {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self) -> ClientResult<Box<dyn AudioDevice>> {
        if let Some(reason) = &self.fail_open {
            return Err(ClientError::Device(reason.clone()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDevice {
            chunks: self.chunks.clone(),
            fail_start: self.fail_start.clone(),
            live: self.live,
            sender: None,
            releases: Arc::clone(&self.releases),
        }))
    }
}

struct ScriptedDevice {
    chunks: Vec<Vec<u8>>,
    fail_start: Option<String>,
    live: bool,
    sender: Option<mpsc::Sender<AudioChunk>>,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl AudioDevice for ScriptedDevice {
    fn mime_type(&self) -> &str {
        "audio/webm"
    }

    async fn start(&mut self) -> ClientResult<mpsc::Receiver<AudioChunk>> {
        if let Some(reason) = &self.fail_start {
            return Err(ClientError::Device(reason.clone()));
        }
        let (tx, rx) = mpsc::channel(self.chunks.len() + 1);
        for (sequence, data) in self.chunks.iter().enumerate() {
            tx.try_send(AudioChunk {
                sequence: sequence as u64,
                data: data.clone(),
            })
            .expect("channel sized for every chunk");
        }
        if self.live {
            self.sender = Some(tx);
        }
        Ok(rx)
    }

    fn release(&mut self) {
        self.sender = None;
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
