//! Client core for the cabinet clinical backend: session lifecycle, the
//! patient directory, per-patient workspace and the dictation/document
//! capture state machines.

pub mod audio;
pub mod capture;
pub mod collation;
pub mod config;
pub mod consultations;
pub mod directory;
pub mod error;
pub mod session;
pub mod transport;
pub mod types;
pub mod upload;
pub mod workspace;

pub use audio::{AudioChunk, AudioDevice, AudioInput, DeviceGuard, FileAudioInput};
pub use capture::{CaptureConfig, CapturePhase, CaptureSession, PendingDictation};
pub use config::ClientSettings;
pub use consultations::ConsultationStore;
pub use directory::PatientDirectory;
pub use error::{ClientError, ClientResult, ErrorCategory, Notice, NoticeContext};
pub use session::{LogoutReason, Session, SessionEvent, SessionManager};
pub use transport::{BackendApi, HttpBackend};
pub use types::{AudioArtifact, Credentials, DocumentFile};
pub use upload::{PendingDocument, UploadConfig, UploadPhase, UploadSession};
pub use workspace::{ActiveModule, WorkspaceController, WorkspaceEvent};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
