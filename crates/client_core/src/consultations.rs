use shared::{
    domain::PatientId,
    protocol::{Consultation, Patient},
};
use tracing::warn;

/// Consultation records of the selected patient.
///
/// Records are append-only. Storage order is newest-merge-first, which is only
/// a convenience; [`ConsultationStore::history`] is the display order.
#[derive(Debug, Default)]
pub struct ConsultationStore {
    patient_id: Option<PatientId>,
    records: Vec<Consultation>,
}

impl ConsultationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the visible set with `patient`'s own records.
    pub fn seed(&mut self, patient: &Patient) {
        self.patient_id = Some(patient.id);
        self.records = patient.consultations.clone();
    }

    pub fn clear(&mut self) {
        self.patient_id = None;
        self.records.clear();
    }

    /// Returns `false` when the record belongs to another patient or is already known.
    pub fn merge(&mut self, record: Consultation) -> bool {
        let Some(owner) = self.patient_id else {
            warn!(consultation_id = record.id.0, "consultations: merge with no patient selected");
            return false;
        };
        if record.patient_id.is_some_and(|patient_id| patient_id != owner) {
            warn!(
                consultation_id = record.id.0,
                patient_id = owner.0,
                "consultations: ignoring record of another patient"
            );
            return false;
        }
        if self.records.iter().any(|existing| existing.id == record.id) {
            return false;
        }
        self.records.insert(0, record);
        true
    }

    /// Records sorted by `creation_date`, newest first.
    pub fn history(&self) -> Vec<&Consultation> {
        let mut ordered: Vec<&Consultation> = self.records.iter().collect();
        ordered.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
        ordered
    }

    pub fn records(&self) -> &[Consultation] {
        &self.records
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
