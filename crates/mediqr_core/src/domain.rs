//! crates/mediqr_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! The serde layout mirrors what is persisted in the key-value medium, so field
//! renames here are storage format changes.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

//=========================================================================================
// Roles and Enumerations
//=========================================================================================

/// Which side of the system an identity (or a record author) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Hospital,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Patient => f.write_str("patient"),
            Role::Hospital => f.write_str("hospital"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

//=========================================================================================
// Patient Identifier
//=========================================================================================

/// The patient token, `MEDI-` followed by six uppercase alphanumerics.
///
/// The same string is rendered as the QR payload and accepted as a login credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(String);

impl PatientId {
    pub const PREFIX: &'static str = "MEDI-";
    pub const SUFFIX_LEN: usize = 6;
    const ALPHABET: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    /// Draws a fresh identifier from the given random source.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let suffix: String = (0..Self::SUFFIX_LEN)
            .map(|_| Self::ALPHABET[rng.gen_range(0..Self::ALPHABET.len())] as char)
            .collect();
        Self(format!("{}{}", Self::PREFIX, suffix))
    }

    /// Wraps a string as-is. Scanned text is only prefix-checked before lookup,
    /// so this does not enforce the full shape.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// True when the text carries the token prefix.
    pub fn has_token_prefix(text: &str) -> bool {
        text.starts_with(Self::PREFIX)
    }

    /// True when the id has exactly the generated shape.
    pub fn is_well_formed(&self) -> bool {
        match self.0.strip_prefix(Self::PREFIX) {
            Some(suffix) => {
                suffix.len() == Self::SUFFIX_LEN
                    && suffix
                        .bytes()
                        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
            }
            None => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//=========================================================================================
// Entities
//=========================================================================================

/// One immutable attachment belonging to a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Self-describing encoded payload (a `data:` URL).
    #[serde(rename = "data")]
    pub payload: String,
    pub uploaded_at: DateTime<Utc>,
    pub author: Role,
}

/// The registration form: every patient field except the id and the records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientDraft {
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    pub contact: String,
    pub email: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: PatientId,
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    pub contact: String,
    pub email: String,
    pub address: String,
    /// Newest first.
    pub medical_records: Vec<MedicalRecord>,
}

impl Patient {
    pub fn from_draft(
        id: PatientId,
        draft: PatientDraft,
        medical_records: Vec<MedicalRecord>,
    ) -> Self {
        Self {
            id,
            name: draft.name,
            age: draft.age,
            gender: draft.gender,
            contact: draft.contact,
            email: draft.email,
            address: draft.address,
            medical_records,
        }
    }
}

/// A stored account. Only used internally for login/signup: it carries the secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<PatientId>,
    /// Stored as given; this is a local simulation, not a credential vault.
    #[serde(rename = "passwordHash")]
    pub credential_secret: String,
}

impl User {
    pub fn to_session(&self) -> Session {
        Session {
            email: self.email.clone(),
            role: self.role,
            patient_id: self.patient_id.clone(),
        }
    }
}

/// The current logged-in identity for the running process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<PatientId>,
}

/// Orders records newest first. The sort is stable, so records sharing an
/// upload time keep their relative order.
pub fn sort_newest_first(records: &mut [MedicalRecord]) {
    records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn record(name: &str, secs: i64) -> MedicalRecord {
        MedicalRecord {
            name: name.to_string(),
            mime_type: "application/pdf".to_string(),
            payload: "data:application/pdf;base64,AA==".to_string(),
            uploaded_at: Utc.timestamp_opt(secs, 0).unwrap(),
            author: Role::Patient,
        }
    }

    #[test]
    fn generated_ids_are_well_formed() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let id = PatientId::generate(&mut rng);
            assert!(id.is_well_formed(), "bad id {}", id);
            assert!(PatientId::has_token_prefix(id.as_str()));
        }
    }

    #[test]
    fn shape_check_rejects_lowercase_and_wrong_length() {
        assert!(!PatientId::new("MEDI-abc123").is_well_formed());
        assert!(!PatientId::new("MEDI-ABC12").is_well_formed());
        assert!(!PatientId::new("MEDX-ABC123").is_well_formed());
        assert!(PatientId::new("MEDI-ABC123").is_well_formed());
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let mut records = vec![record("a", 10), record("b", 30), record("c", 10), record("d", 20)];
        sort_newest_first(&mut records);
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn user_serializes_with_storage_field_names() {
        let user = User {
            email: "doctor@hospital.com".to_string(),
            role: Role::Hospital,
            patient_id: None,
            credential_secret: "password123".to_string(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["passwordHash"], "password123");
        assert_eq!(json["role"], "hospital");
        assert!(json.get("patientId").is_none());
    }

    #[test]
    fn record_serializes_type_and_data_keys() {
        let json = serde_json::to_value(record("scan.pdf", 0)).unwrap();
        assert_eq!(json["type"], "application/pdf");
        assert!(json["data"].as_str().unwrap().starts_with("data:"));
        assert!(json.get("uploadedAt").is_some());
    }
}
