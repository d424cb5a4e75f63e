use std::{cmp::Ordering, collections::HashSet};

use shared::{
    domain::PatientId,
    protocol::{Consultation, Patient, PatientDraft},
};
use tracing::{info, warn};

use crate::{
    collation::compare_surnames,
    error::{ClientError, ClientResult},
    session::SessionManager,
};

/// Cached patient list, kept sorted by surname.
///
/// The cache trusts local state until the next full refetch: a created
/// patient is inserted locally and never reconciled against the server list.
#[derive(Debug, Default)]
pub struct PatientDirectory {
    patients: Vec<Patient>,
    loaded: bool,
}

impl PatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fetch_all(&mut self, sessions: &SessionManager) -> ClientResult<&[Patient]> {
        let fetched = sessions
            .authenticated("list_patients", |backend, session| async move {
                backend.list_patients(&session).await
            })
            .await?;

        let mut seen = HashSet::new();
        let mut patients = Vec::with_capacity(fetched.len());
        for patient in fetched {
            if seen.insert(patient.id) {
                patients.push(patient);
            } else {
                warn!(
                    patient_id = patient.id.0,
                    "directory: dropping duplicate patient from listing"
                );
            }
        }
        patients.sort_by(|a, b| compare_surnames(&a.nom, &b.nom));

        self.patients = patients;
        self.loaded = true;
        info!(count = self.patients.len(), "directory: patients loaded");
        Ok(&self.patients)
    }

    /// Creates the patient remotely, then inserts it after any entries with an
    /// equal surname. Nothing is inserted unless the remote create succeeded.
    pub async fn add(
        &mut self,
        sessions: &SessionManager,
        draft: PatientDraft,
    ) -> ClientResult<Patient> {
        let draft = validate_draft(draft)?;
        let created = sessions
            .authenticated("create_patient", |backend, session| async move {
                backend.create_patient(&session, &draft).await
            })
            .await?;

        if self.get(created.id).is_some() {
            warn!(patient_id = created.id.0, "directory: backend returned an existing patient id");
            return Err(ClientError::remote(
                200,
                format!("backend returned duplicate patient id {}", created.id),
            ));
        }

        let index = self.insertion_index(&created.nom);
        self.patients.insert(index, created.clone());
        info!(patient_id = created.id.0, position = index, "directory: patient added");
        Ok(created)
    }

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    pub fn get(&self, patient_id: PatientId) -> Option<&Patient> {
        self.patients.iter().find(|patient| patient.id == patient_id)
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn clear(&mut self) {
        self.patients.clear();
        self.loaded = false;
    }

    /// Mirrors a committed record into the cached patient so reselecting the
    /// patient shows it without a refetch.
    pub(crate) fn record_consultation(&mut self, patient_id: PatientId, record: Consultation) {
        if let Some(patient) = self.patients.iter_mut().find(|p| p.id == patient_id) {
            if !patient.consultations.iter().any(|c| c.id == record.id) {
                patient.consultations.push(record);
            }
        }
    }

    fn insertion_index(&self, nom: &str) -> usize {
        self.patients
            .partition_point(|existing| compare_surnames(&existing.nom, nom) != Ordering::Greater)
    }
}

pub fn validate_draft(draft: PatientDraft) -> ClientResult<PatientDraft> {
    let nom = draft.nom.trim();
    if nom.is_empty() {
        return Err(ClientError::Validation("nom is required".into()));
    }
    let prenom = draft.prenom.trim();
    if prenom.is_empty() {
        return Err(ClientError::Validation("prenom is required".into()));
    }
    Ok(PatientDraft {
        nom: nom.to_string(),
        prenom: prenom.to_string(),
        date_naissance: draft.date_naissance,
    })
}

#[cfg(test)]
#[path = "tests/directory_tests.rs"]
mod tests;
