//! crates/mediqr_core/src/identity.rs
//!
//! Registration, login (credentials or patient token), logout and the
//! current-session lookup.
//!
//! The identity moves between two states: anonymous (no session slot) and
//! authenticated with a role. Any successful login overwrites the slot and
//! logout clears it. Which capabilities a role unlocks is decided by the caller.

use crate::domain::{MedicalRecord, Patient, PatientDraft, PatientId, Role, Session, User};
use crate::error::{CoreError, CoreResult};
use crate::patients::PatientRepository;
use crate::store::{Collection, RecordStore, Slot};
use tracing::{error, info, warn};

//=========================================================================================
// Configuration
//=========================================================================================

/// The built-in hospital account seeded on the first login attempt.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub hospital_email: String,
    pub hospital_secret: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            hospital_email: "doctor@hospital.com".to_string(),
            hospital_secret: "password123".to_string(),
        }
    }
}

//=========================================================================================
// Session Slots
//=========================================================================================

/// The process-wide identity state: the current session and the last
/// successfully scanned token. Both start absent.
#[derive(Clone)]
pub struct SessionSlots {
    store: RecordStore,
}

impl SessionSlots {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    pub async fn current(&self) -> CoreResult<Option<Session>> {
        Ok(self.store.load_slot(Slot::Session).await?)
    }

    async fn replace(&self, session: &Session) -> CoreResult<()> {
        Ok(self.store.save_slot(Slot::Session, session).await?)
    }

    async fn clear(&self) -> CoreResult<()> {
        Ok(self.store.clear_slot(Slot::Session).await?)
    }

    /// The last-scanned slot holds the bare token text.
    pub async fn last_scanned(&self) -> CoreResult<Option<PatientId>> {
        let token = self.store.load_text_slot(Slot::LastScanned).await?;
        Ok(token.map(PatientId::new))
    }

    async fn remember_scanned(&self, token: &PatientId) -> CoreResult<()> {
        Ok(self.store.save_text_slot(Slot::LastScanned, token.as_str()).await?)
    }
}

//=========================================================================================
// IdentityService
//=========================================================================================

#[derive(Clone)]
pub struct IdentityService {
    store: RecordStore,
    patients: PatientRepository,
    slots: SessionSlots,
    config: IdentityConfig,
}

impl IdentityService {
    pub fn new(
        store: RecordStore,
        patients: PatientRepository,
        slots: SessionSlots,
        config: IdentityConfig,
    ) -> Self {
        Self {
            store,
            patients,
            slots,
            config,
        }
    }

    /// Creates a patient and its paired patient account.
    ///
    /// Fails with `EmailTaken` when any account, of either role, already uses the email.
    /// When the account cannot be saved, the patient list is put back as it was.
    pub async fn register(
        &self,
        draft: PatientDraft,
        password: &str,
        initial_records: Vec<MedicalRecord>,
    ) -> CoreResult<Patient> {
        let guard = self.store.write_lock().await;
        let mut users: Vec<User> = self.store.load(Collection::Users).await?;
        if users.iter().any(|u| u.email == draft.email) {
            warn!(email = %draft.email, "Registration rejected: email already in use");
            return Err(CoreError::EmailTaken(draft.email));
        }

        let previous: Vec<Patient> = self.store.load(Collection::Patients).await?;
        let patient = self
            .patients
            .create_locked(&guard, draft, initial_records)
            .await?;
        users.push(User {
            email: patient.email.clone(),
            role: Role::Patient,
            patient_id: Some(patient.id.clone()),
            credential_secret: password.to_string(),
        });
        if let Err(e) = self.store.save(Collection::Users, &users).await {
            warn!(patient_id = %patient.id, error = %e, "Account save failed; removing patient");
            if let Err(restore) = self.store.save(Collection::Patients, &previous).await {
                error!(
                    patient_id = %patient.id,
                    error = %restore,
                    "Failed to remove orphan patient"
                );
            }
            return Err(e.into());
        }

        info!(patient_id = %patient.id, email = %patient.email, "Patient registered");
        Ok(patient)
    }

    pub async fn login_with_credentials(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> CoreResult<Session> {
        let users = self.seed_hospital_account().await?;

        let session = users
            .iter()
            .find(|u| u.email == email && u.role == role)
            .filter(|u| u.credential_secret == password)
            .map(User::to_session)
            .ok_or(CoreError::InvalidCredentials)?;

        self.slots.replace(&session).await?;
        info!(email = %session.email, role = %session.role, "Logged in with credentials");
        Ok(session)
    }

    /// Logs in the patient whose id equals `token`, and remembers the token for re-login.
    ///
    /// An unknown token or a failed write leaves the current session untouched.
    pub async fn login_with_token(&self, token: &str) -> CoreResult<Session> {
        let users: Vec<User> = self.store.load(Collection::Users).await?;
        let session = users
            .iter()
            .find(|u| {
                u.role == Role::Patient
                    && u.patient_id.as_ref().is_some_and(|id| id.as_str() == token)
            })
            .map(User::to_session)
            .ok_or_else(|| CoreError::PatientNotFound(token.to_string()))?;

        // The session is switched last, so a failed write leaves it as it was.
        self.slots.remember_scanned(&PatientId::new(token)).await?;
        self.slots.replace(&session).await?;
        info!(patient_id = token, "Logged in with patient token");
        Ok(session)
    }

    /// Logs in again with the last token that succeeded.
    pub async fn login_with_last_scanned(&self) -> CoreResult<Session> {
        let token = self.slots.last_scanned().await?.ok_or_else(|| {
            CoreError::PatientNotFound("no previously scanned patient".to_string())
        })?;
        self.login_with_token(token.as_str()).await
    }

    pub async fn last_scanned(&self) -> CoreResult<Option<PatientId>> {
        self.slots.last_scanned().await
    }

    pub async fn current_session(&self) -> CoreResult<Option<Session>> {
        self.slots.current().await
    }

    /// Clears the session. The last-scanned token is kept.
    pub async fn logout(&self) -> CoreResult<()> {
        self.slots.clear().await?;
        info!("Logged out");
        Ok(())
    }

    /// Makes sure one hospital account exists and returns the user list.
    async fn seed_hospital_account(&self) -> CoreResult<Vec<User>> {
        let _guard = self.store.write_lock().await;
        let mut users: Vec<User> = self.store.load(Collection::Users).await?;
        if !users.iter().any(|u| u.role == Role::Hospital) {
            users.push(User {
                email: self.config.hospital_email.clone(),
                role: Role::Hospital,
                patient_id: None,
                credential_secret: self.config.hospital_secret.clone(),
            });
            self.store.save(Collection::Users, &users).await?;
            info!(email = %self.config.hospital_email, "Seeded built-in hospital account");
        }
        Ok(users)
    }
}
