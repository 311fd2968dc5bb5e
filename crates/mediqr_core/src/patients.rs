//! crates/mediqr_core/src/patients.rs
//!
//! CRUD over patients and their embedded medical records.

use crate::domain::{sort_newest_first, MedicalRecord, Patient, PatientDraft, PatientId};
use crate::error::{CoreError, CoreResult};
use crate::store::{Collection, RecordStore, WriteGuard};
use std::collections::HashSet;
use tracing::{debug, info};

/// Upper bound on re-draws when a fresh id collides with a stored one.
const MAX_ID_ATTEMPTS: usize = 64;

#[derive(Clone)]
pub struct PatientRepository {
    store: RecordStore,
}

impl PatientRepository {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> CoreResult<Vec<Patient>> {
        Ok(self.store.load(Collection::Patients).await?)
    }

    /// Creates a patient with a freshly allocated id and persists it.
    pub async fn create(
        &self,
        draft: PatientDraft,
        initial_records: Vec<MedicalRecord>,
    ) -> CoreResult<Patient> {
        let guard = self.store.write_lock().await;
        self.create_locked(&guard, draft, initial_records).await
    }

    pub(crate) async fn create_locked(
        &self,
        _guard: &WriteGuard<'_>,
        draft: PatientDraft,
        mut initial_records: Vec<MedicalRecord>,
    ) -> CoreResult<Patient> {
        let mut patients: Vec<Patient> = self.store.load(Collection::Patients).await?;
        let id = {
            let mut rng = rand::thread_rng();
            allocate_id(&patients, || PatientId::generate(&mut rng))?
        };

        sort_newest_first(&mut initial_records);
        let patient = Patient::from_draft(id, draft, initial_records);
        patients.push(patient.clone());
        self.store.save(Collection::Patients, &patients).await?;

        info!(patient_id = %patient.id, records = patient.medical_records.len(), "Patient created");
        Ok(patient)
    }

    pub async fn get_by_id(&self, id: &PatientId) -> CoreResult<Option<Patient>> {
        let patients: Vec<Patient> = self.store.load(Collection::Patients).await?;
        Ok(patients.into_iter().find(|p| &p.id == id))
    }

    /// Replaces the stored patient carrying the same id. Never creates.
    pub async fn update(&self, patient: Patient) -> CoreResult<Patient> {
        let guard = self.store.write_lock().await;
        self.update_locked(&guard, patient).await
    }

    async fn update_locked(
        &self,
        _guard: &WriteGuard<'_>,
        patient: Patient,
    ) -> CoreResult<Patient> {
        let mut patients: Vec<Patient> = self.store.load(Collection::Patients).await?;
        let slot = patients
            .iter_mut()
            .find(|p| p.id == patient.id)
            .ok_or_else(|| CoreError::RecordNotFound(patient.id.clone()))?;
        *slot = patient.clone();
        self.store.save(Collection::Patients, &patients).await?;
        debug!(patient_id = %patient.id, "Patient updated");
        Ok(patient)
    }

    /// Appends a record and keeps the list newest first.
    pub async fn add_record(
        &self,
        patient_id: &PatientId,
        record: MedicalRecord,
    ) -> CoreResult<Patient> {
        let guard = self.store.write_lock().await;
        let patients: Vec<Patient> = self.store.load(Collection::Patients).await?;
        let mut patient = patients
            .into_iter()
            .find(|p| &p.id == patient_id)
            .ok_or_else(|| CoreError::RecordNotFound(patient_id.clone()))?;

        info!(
            patient_id = %patient_id,
            record = %record.name,
            author = %record.author,
            "Appending medical record"
        );
        patient.medical_records.push(record);
        sort_newest_first(&mut patient.medical_records);
        self.update_locked(&guard, patient).await
    }
}

/// Draws ids until one is not already taken.
fn allocate_id<F>(existing: &[Patient], mut draw: F) -> CoreResult<PatientId>
where
    F: FnMut() -> PatientId,
{
    let taken: HashSet<&PatientId> = existing.iter().map(|p| &p.id).collect();
    for _ in 0..MAX_ID_ATTEMPTS {
        let candidate = draw();
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        debug!(candidate = %candidate, "Patient id collision, drawing again");
    }
    Err(CoreError::IdSpaceExhausted(MAX_ID_ATTEMPTS))
}
