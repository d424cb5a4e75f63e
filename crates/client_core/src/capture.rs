use std::{sync::Arc, time::Duration};

use shared::{
    domain::{ConsultationKind, PatientId},
    protocol::Consultation,
};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{timeout, timeout_at, Instant},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    audio::{AudioChunk, AudioInput, DeviceGuard},
    config::ClientSettings,
    error::{ClientError, ClientResult},
    session::SessionManager,
    types::AudioArtifact,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePhase {
    #[default]
    Idle,
    Recording,
    Finalizing,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub max_recording: Duration,
    /// Bound on draining the device after release.
    pub finalize_timeout: Duration,
    pub submission_timeout: Duration,
}

impl From<&ClientSettings> for CaptureConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            max_recording: settings.max_recording(),
            finalize_timeout: settings.request_timeout(),
            submission_timeout: settings.submission_timeout(),
        }
    }
}

/// A dictation whose submission failed, kept until retried or discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDictation {
    pub patient_id: PatientId,
    pub artifact: AudioArtifact,
}

#[derive(Default)]
struct CollectedAudio {
    bytes: Vec<u8>,
    chunk_count: usize,
    overran: bool,
}

struct ActiveRecording {
    session_id: Uuid,
    patient_id: PatientId,
    started_at: Instant,
    mime_type: String,
    file_name: String,
    guard: DeviceGuard,
    collector: JoinHandle<CollectedAudio>,
}

/// Dictation state machine:
/// `Idle -> Recording -> Finalizing -> {Committed | Failed} -> Idle`.
///
/// The device is owned by a [`DeviceGuard`] for the whole recording, so every
/// exit path (stop, cancel, drop, failed start) releases it exactly once.
pub struct CaptureSession {
    input: Arc<dyn AudioInput>,
    config: CaptureConfig,
    phase: CapturePhase,
    active: Option<ActiveRecording>,
    pending: Option<PendingDictation>,
    phases: broadcast::Sender<CapturePhase>,
}

impl CaptureSession {
    pub fn new(input: Arc<dyn AudioInput>, config: CaptureConfig) -> Self {
        let (phases, _) = broadcast::channel(64);
        Self {
            input,
            config,
            phase: CapturePhase::Idle,
            active: None,
            pending: None,
            phases,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CapturePhase> {
        self.phases.subscribe()
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Patient the current recording belongs to.
    pub fn recording_for(&self) -> Option<PatientId> {
        self.active.as_ref().map(|active| active.patient_id)
    }

    pub fn pending(&self) -> Option<&PendingDictation> {
        self.pending.as_ref()
    }

    pub async fn start(&mut self, patient_id: PatientId) -> ClientResult<Uuid> {
        if self.active.is_some() || self.phase != CapturePhase::Idle {
            return Err(ClientError::Busy("a dictation is already recording".into()));
        }
        if self.pending.is_some() {
            return Err(ClientError::Busy(
                "a failed dictation is waiting to be retried or discarded".into(),
            ));
        }

        let device = self.input.open().await?;
        let mut guard = DeviceGuard::new(self.input.name(), device);
        // Dropping the guard on error releases whatever `start` managed to acquire.
        let chunks = guard.start().await?;

        let session_id = Uuid::new_v4();
        let started_at = Instant::now();
        let deadline = started_at + self.config.max_recording;
        let collector = tokio::spawn(collect_chunks(chunks, deadline));
        self.active = Some(ActiveRecording {
            session_id,
            patient_id,
            started_at,
            mime_type: guard.mime_type(),
            file_name: guard.file_name(),
            guard,
            collector,
        });
        self.set_phase(CapturePhase::Recording);
        info!(
            %session_id,
            patient_id = patient_id.0,
            input = self.input.name(),
            "capture: recording started"
        );
        Ok(session_id)
    }

    /// Ends the recording, releases the device, assembles the audio and submits
    /// it for transcription.
    pub async fn stop(&mut self, sessions: &SessionManager) -> ClientResult<Consultation> {
        let Some(mut active) = self.active.take() else {
            return Err(ClientError::Busy("no dictation is recording".into()));
        };
        self.set_phase(CapturePhase::Finalizing);
        active.guard.release();

        let collected = match timeout(self.config.finalize_timeout, &mut active.collector).await {
            Ok(Ok(collected)) => collected,
            Ok(Err(err)) => {
                return self.fail(ClientError::Device(format!("audio collection failed: {err}")));
            }
            Err(_) => {
                active.collector.abort();
                return self.fail(ClientError::Timeout(format!(
                    "audio device did not finish within {}s",
                    self.config.finalize_timeout.as_secs_f64()
                )));
            }
        };

        if collected.bytes.is_empty() {
            return self.fail(ClientError::Device("no audio was captured".into()));
        }

        let pending = PendingDictation {
            patient_id: active.patient_id,
            artifact: AudioArtifact {
                recording_id: active.session_id,
                file_name: active.file_name,
                mime_type: active.mime_type,
                bytes: collected.bytes,
                chunk_count: collected.chunk_count,
                duration: active.started_at.elapsed(),
            },
        };
        debug!(
            session_id = %active.session_id,
            bytes = pending.artifact.bytes.len(),
            chunks = pending.artifact.chunk_count,
            "capture: audio assembled"
        );

        if collected.overran {
            self.pending = Some(pending);
            return self.fail(ClientError::Timeout(format!(
                "recording exceeded {}s; audio kept for retry",
                self.config.max_recording.as_secs()
            )));
        }

        self.submit(sessions, pending).await
    }

    /// Resubmits the dictation kept from a failed attempt.
    pub async fn retry(&mut self, sessions: &SessionManager) -> ClientResult<Consultation> {
        if self.active.is_some() {
            return Err(ClientError::Busy("a dictation is already recording".into()));
        }
        let Some(pending) = self.pending.take() else {
            return Err(ClientError::Validation("no dictation is waiting for retry".into()));
        };
        self.set_phase(CapturePhase::Finalizing);
        self.submit(sessions, pending).await
    }

    /// Aborts the recording without submitting. Returns whether one was active.
    pub fn cancel(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };
        active.guard.release();
        active.collector.abort();
        info!(session_id = %active.session_id, "capture: recording cancelled");
        self.set_phase(CapturePhase::Idle);
        true
    }

    pub fn discard_pending(&mut self) -> Option<PendingDictation> {
        let discarded = self.pending.take();
        if let Some(pending) = &discarded {
            info!(
                recording_id = %pending.artifact.recording_id,
                "capture: pending dictation discarded"
            );
        }
        discarded
    }

    /// Drops all state scoped to the current patient.
    pub fn reset(&mut self) {
        self.cancel();
        self.discard_pending();
        self.phase = CapturePhase::Idle;
    }

    async fn submit(
        &mut self,
        sessions: &SessionManager,
        pending: PendingDictation,
    ) -> ClientResult<Consultation> {
        let patient_id = pending.patient_id;
        let artifact = &pending.artifact;
        let outcome = sessions
            .authenticated_within(
                "submit_dictation",
                self.config.submission_timeout,
                |backend, session| async move {
                    backend.submit_dictation(&session, patient_id, artifact).await
                },
            )
            .await
            .and_then(|record| {
                if record.kind == ConsultationKind::Dictation {
                    Ok(record)
                } else {
                    Err(ClientError::remote(
                        200,
                        format!("expected a dictation record, got {}", record.kind),
                    ))
                }
            });

        match outcome {
            Ok(mut record) => {
                record.patient_id.get_or_insert(patient_id);
                info!(
                    recording_id = %pending.artifact.recording_id,
                    consultation_id = record.id.0,
                    patient_id = patient_id.0,
                    "capture: dictation committed"
                );
                self.set_phase(CapturePhase::Committed);
                self.set_phase(CapturePhase::Idle);
                Ok(record)
            }
            Err(err) => {
                self.pending = Some(pending);
                self.fail(err)
            }
        }
    }

    fn fail<T>(&mut self, err: ClientError) -> ClientResult<T> {
        warn!("capture: dictation failed: {err}");
        self.set_phase(CapturePhase::Failed);
        self.set_phase(CapturePhase::Idle);
        Err(err)
    }

    fn set_phase(&mut self, phase: CapturePhase) {
        self.phase = phase;
        let _ = self.phases.send(phase);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.collector.abort();
        }
    }
}

async fn collect_chunks(
    mut chunks: tokio::sync::mpsc::Receiver<AudioChunk>,
    deadline: Instant,
) -> CollectedAudio {
    let mut collected = CollectedAudio::default();
    loop {
        match timeout_at(deadline, chunks.recv()).await {
            Ok(Some(chunk)) => {
                collected.chunk_count += 1;
                collected.bytes.extend_from_slice(&chunk.data);
            }
            Ok(None) => break,
            Err(_) => {
                collected.overran = true;
                break;
            }
        }
    }
    collected
}

#[cfg(test)]
#[path = "tests/capture_tests.rs"]
mod tests;
