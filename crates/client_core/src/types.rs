use std::{path::Path, time::Duration};

use shared::protocol::DICTATION_FILENAME;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub(crate) fn validated(&self) -> ClientResult<Self> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(ClientError::Validation("email is required".into()));
        }
        if self.password.is_empty() {
            return Err(ClientError::Validation("password is required".into()));
        }
        Ok(Self::new(email, self.password.clone()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One dictation assembled from the buffered device chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub recording_id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub chunk_count: usize,
    pub duration: Duration,
}

impl AudioArtifact {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            recording_id: Uuid::new_v4(),
            file_name: DICTATION_FILENAME.to_string(),
            mime_type: mime_type.into(),
            bytes,
            chunk_count: 1,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DocumentFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            file_name,
            mime_type,
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> ClientResult<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            ClientError::Validation(format!("cannot read document '{}': {err}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        Ok(Self::new(file_name, bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
