use std::sync::Arc;

use super::*;
use crate::test_support::{logged_in, record, FakeBackend};

fn config() -> UploadConfig {
    UploadConfig {
        max_document_bytes: 1024,
        submission_timeout: Duration::from_secs(1),
    }
}

fn scan() -> DocumentFile {
    DocumentFile::new("ordonnance.pdf", b"%PDF-1.7 ordonnance".to_vec())
}

fn drain(phases: &mut broadcast::Receiver<UploadPhase>) -> Vec<UploadPhase> {
    let mut seen = Vec::new();
    while let Ok(phase) = phases.try_recv() {
        seen.push(phase);
    }
    seen
}

#[tokio::test]
async fn submit_transfers_document_and_commits() {
    let backend = Arc::new(FakeBackend::new());
    let sessions = logged_in(backend.clone()).await;
    let mut upload = UploadSession::new(config());
    let mut phases = upload.subscribe();

    let committed = upload
        .submit(&sessions, PatientId(1), Some(scan()))
        .await
        .expect("submit");

    assert_eq!(committed.kind, ConsultationKind::Document);
    assert_eq!(committed.patient_id, Some(PatientId(1)));
    assert_eq!(upload.phase(), UploadPhase::Idle);
    assert_eq!(
        drain(&mut phases),
        vec![
            UploadPhase::Transferring,
            UploadPhase::Committed,
            UploadPhase::Idle,
        ]
    );
    let received = backend.received_documents.lock().await;
    assert_eq!(received[0].0, PatientId(1));
    assert_eq!(received[0].1.mime_type, "application/pdf");
}

#[tokio::test]
async fn missing_empty_or_oversized_files_never_leave_idle() {
    let backend = Arc::new(FakeBackend::new());
    let sessions = logged_in(backend.clone()).await;
    let mut upload = UploadSession::new(config());
    let mut phases = upload.subscribe();

    let missing = upload.submit(&sessions, PatientId(1), None).await;
    let empty = upload
        .submit(&sessions, PatientId(1), Some(DocumentFile::new("vide.pdf", Vec::new())))
        .await;
    let oversized = upload
        .submit(
            &sessions,
            PatientId(1),
            Some(DocumentFile::new("scan.png", vec![0u8; 2048])),
        )
        .await;

    for outcome in [missing, empty, oversized] {
        assert!(matches!(outcome, Err(ClientError::Validation(_))));
    }
    assert!(drain(&mut phases).is_empty());
    assert!(upload.pending().is_none());
    assert_eq!(backend.calls("submit_document").await, 0);
}

#[tokio::test]
async fn failed_transfer_keeps_the_document_for_retry() {
    let backend = Arc::new(FakeBackend::new());
    let sessions = logged_in(backend.clone()).await;
    backend
        .push_document(Err(ClientError::remote(500, "Erreur API Analyse")))
        .await;
    let mut upload = UploadSession::new(config());
    let mut phases = upload.subscribe();

    let err = upload
        .submit(&sessions, PatientId(1), Some(scan()))
        .await
        .expect_err("must fail");

    assert_eq!(err, ClientError::remote(500, "Erreur API Analyse"));
    assert_eq!(
        drain(&mut phases),
        vec![
            UploadPhase::Transferring,
            UploadPhase::Failed,
            UploadPhase::Idle,
        ]
    );
    assert_eq!(upload.pending().expect("pending").document, scan());

    upload.retry(&sessions).await.expect("retry");
    assert!(upload.pending().is_none());
    assert_eq!(backend.calls("submit_document").await, 2);
}

#[tokio::test]
async fn retry_without_pending_document_is_a_validation_error() {
    let backend = Arc::new(FakeBackend::new());
    let sessions = logged_in(backend).await;
    let mut upload = UploadSession::new(config());

    let err = upload.retry(&sessions).await.expect_err("must fail");

    assert!(matches!(err, ClientError::Validation(_)));
}

#[tokio::test]
async fn record_of_another_kind_is_rejected() {
    let backend = Arc::new(FakeBackend::new());
    let sessions = logged_in(backend.clone()).await;
    backend
        .push_document(Ok(record(3, ConsultationKind::Dictation, "2024-05-01")))
        .await;
    let mut upload = UploadSession::new(config());

    let err = upload
        .submit(&sessions, PatientId(1), Some(scan()))
        .await
        .expect_err("must fail");

    assert!(matches!(err, ClientError::Remote { .. }));
    assert!(upload.pending().is_some());
}

#[tokio::test]
async fn slow_analysis_times_out() {
    let backend = Arc::new(FakeBackend::new());
    let sessions = logged_in(backend.clone()).await;
    backend.delay_submissions(Duration::from_millis(500)).await;
    let mut upload = UploadSession::new(UploadConfig {
        submission_timeout: Duration::from_millis(50),
        ..config()
    });

    let err = upload
        .submit(&sessions, PatientId(1), Some(scan()))
        .await
        .expect_err("must time out");

    assert!(matches!(err, ClientError::Timeout(_)));
    assert_eq!(upload.phase(), UploadPhase::Idle);
}

#[tokio::test]
async fn new_file_replaces_the_pending_one() {
    let backend = Arc::new(FakeBackend::new());
    let sessions = logged_in(backend.clone()).await;
    backend
        .push_document(Err(ClientError::Network("connection reset".into())))
        .await;
    let mut upload = UploadSession::new(config());

    upload
        .submit(&sessions, PatientId(1), Some(scan()))
        .await
        .expect_err("must fail");
    let other = DocumentFile::new("bilan.txt", b"Glycemie 0.9".to_vec());
    upload
        .submit(&sessions, PatientId(1), Some(other.clone()))
        .await
        .expect("submit");

    assert!(upload.pending().is_none());
    assert_eq!(backend.received_documents.lock().await[1].1, other);
}
