use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Bad credentials, or a token the backend no longer accepts.
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("backend error ({status}): {detail}")]
    Remote { status: u16, detail: String },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("timed out: {0}")]
    Timeout(String),
    /// The command is not allowed in the current phase.
    #[error("operation rejected: {0}")]
    Busy(String),
    /// A result arrived after the session it was issued under ended.
    #[error("session ended before the result could be applied")]
    SessionEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Auth,
    Transport,
    Remote,
    Validation,
    Device,
    Timeout,
    State,
}

impl ClientError {
    pub fn remote(status: u16, detail: impl Into<String>) -> Self {
        Self::Remote {
            status,
            detail: detail.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(_) | Self::SessionEnded => ErrorCategory::Auth,
            Self::Network(_) => ErrorCategory::Transport,
            Self::Remote { .. } => ErrorCategory::Remote,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Device(_) => ErrorCategory::Device,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Busy(_) => ErrorCategory::State,
        }
    }

    pub fn requires_reauth(&self) -> bool {
        self.category() == ErrorCategory::Auth
    }

    /// Whether retrying the same command can succeed without operator changes.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Remote | ErrorCategory::Timeout
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(err.to_string());
        }
        if err.is_decode() {
            let status = err.status().map(|s| s.as_u16()).unwrap_or(200);
            return Self::remote(status, format!("malformed response: {err}"));
        }
        Self::Network(err.to_string())
    }
}

/// Which operator action a notice belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeContext {
    Login,
    Signup,
    ListPatients,
    CreatePatient,
    Dictation,
    Document,
    General,
}

/// Dismissible, operator-facing form of a [`ClientError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    context: NoticeContext,
    category: ErrorCategory,
    message: String,
    retriable: bool,
}

impl Notice {
    pub fn from_error(context: NoticeContext, err: &ClientError) -> Self {
        let message = match (context, err) {
            (_, ClientError::Network(_)) => {
                "Erreur réseau; vérifiez la connexion puis réessayez.".to_string()
            }
            (NoticeContext::Dictation, ClientError::Remote { detail, .. }) => {
                format!("La transcription a échoué: {detail}")
            }
            (NoticeContext::Document, ClientError::Remote { detail, .. }) => {
                format!("L'analyse du document a échoué: {detail}")
            }
            (_, other) => other.to_string(),
        };
        Self {
            context,
            category: err.category(),
            message,
            retriable: err.is_retriable(),
        }
    }

    pub fn context(&self) -> NoticeContext {
        self.context
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retriable(&self) -> bool {
        self.retriable
    }
}
