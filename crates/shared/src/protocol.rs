use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ConsultationId, ConsultationKind, MedecinId, PatientId},
    error::ErrorBody,
};

pub const DICTATION_FIELD: &str = "audioFile";
pub const DICTATION_FILENAME: &str = "dictation.webm";
pub const DICTATION_MIME: &str = "audio/webm";
pub const DOCUMENT_FIELD: &str = "documentFile";

pub fn login_route() -> &'static str {
    "/api/medecins/login"
}

pub fn signup_route() -> &'static str {
    "/api/medecins/signup"
}

pub fn whoami_route() -> &'static str {
    "/api/medecins/me"
}

pub fn patients_route() -> &'static str {
    "/api/patients"
}

pub fn dictation_route(patient_id: PatientId) -> String {
    format!("/api/dictation/{}", patient_id.0)
}

pub fn document_route(patient_id: PatientId) -> String {
    format!("/api/document/{}", patient_id.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupResponse {
    #[serde(default)]
    pub id: Option<MedecinId>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    pub email: String,
    #[serde(default)]
    pub id: Option<MedecinId>,
}

/// Fields the operator fills in to create a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDraft {
    pub nom: String,
    pub prenom: String,
    pub date_naissance: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub nom: String,
    pub prenom: String,
    #[serde(default)]
    pub date_naissance: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medecin_id: Option<MedecinId>,
    #[serde(default)]
    pub consultations: Vec<Consultation>,
}

impl Patient {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.prenom, self.nom)
    }
}

/// Immutable record produced by a transcription or a document analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultation {
    pub id: ConsultationId,
    #[serde(rename = "type")]
    pub kind: ConsultationKind,
    pub content: String,
    #[serde(with = "timestamp")]
    pub creation_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<PatientId>,
}

/// Raw body of a dictation or document submission.
///
/// The backend answers with either a consultation or an error body, and the
/// client only trusts it as a record when an `id` is present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionResponse {
    #[serde(default)]
    pub id: Option<ConsultationId>,
    #[serde(default, rename = "type")]
    pub kind: Option<ConsultationKind>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub patient_id: Option<PatientId>,
    #[serde(flatten)]
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionRejection {
    MissingId { detail: Option<String> },
    KindMismatch { expected: ConsultationKind, actual: ConsultationKind },
    MissingField(&'static str),
    BadTimestamp(String),
}

impl SubmissionResponse {
    pub fn into_consultation(
        self,
        expected: ConsultationKind,
    ) -> Result<Consultation, SubmissionRejection> {
        let Some(id) = self.id else {
            return Err(SubmissionRejection::MissingId {
                detail: self.error.message(),
            });
        };
        let kind = self.kind.unwrap_or(expected);
        if kind != expected {
            return Err(SubmissionRejection::KindMismatch {
                expected,
                actual: kind,
            });
        }
        let content = self
            .content
            .ok_or(SubmissionRejection::MissingField("content"))?;
        let raw_date = self
            .creation_date
            .ok_or(SubmissionRejection::MissingField("creation_date"))?;
        let creation_date = timestamp::parse(&raw_date)
            .map_err(|err| SubmissionRejection::BadTimestamp(err.value))?;
        Ok(Consultation {
            id,
            kind,
            content,
            creation_date,
            patient_id: self.patient_id,
        })
    }
}

/// Lenient codec for backend timestamps.
///
/// Accepts RFC 3339, naive ISO date-times (read as UTC) and bare dates
/// (midnight UTC). Always writes RFC 3339.
pub mod timestamp {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use crate::error::TimestampError;

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn parse(value: &str) -> Result<DateTime<Utc>, TimestampError> {
        let trimmed = value.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(parsed.with_timezone(&Utc));
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(naive.and_utc());
            }
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| TimestampError {
                value: value.to_string(),
            })
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }
}
