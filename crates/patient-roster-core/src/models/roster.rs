//! The roster: the full ordered list of patients known to a client.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use super::Patient;

/// Roster parse/validation errors.
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Malformed roster payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Duplicate patient id {0} in roster")]
    DuplicateId(i64),
}

pub type RosterResult<T> = Result<T, RosterError>;

/// Ordered sequence of patients in server order.
///
/// Always replaced wholesale; patient ids are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Roster {
    patients: Vec<Patient>,
}

impl Roster {
    /// Build a roster, rejecting duplicate ids.
    pub fn new(patients: Vec<Patient>) -> RosterResult<Self> {
        let mut seen = HashSet::with_capacity(patients.len());
        for patient in &patients {
            if !seen.insert(patient.id) {
                return Err(RosterError::DuplicateId(patient.id));
            }
        }
        Ok(Self { patients })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a full-roster JSON array.
    pub fn from_json(payload: &str) -> RosterResult<Self> {
        let patients: Vec<Patient> = serde_json::from_str(payload)?;
        Self::new(patients)
    }

    pub fn to_json(&self) -> RosterResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Patient> {
        self.patients.iter()
    }

    /// Ids in roster order.
    pub fn ids(&self) -> Vec<i64> {
        self.patients.iter().map(|p| p.id).collect()
    }

    pub fn get(&self, id: i64) -> Option<&Patient> {
        self.patients.iter().find(|p| p.id == id)
    }

    pub fn into_patients(self) -> Vec<Patient> {
        self.patients
    }
}

impl<'a> IntoIterator for &'a Roster {
    type Item = &'a Patient;
    type IntoIter = std::slice::Iter<'a, Patient>;

    fn into_iter(self) -> Self::IntoIter {
        self.patients.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO: &str = r#"[
        {"id":2,"firstName":"Petr","lastName":"Sidorov","dateOfBirth":"1975-03-09"},
        {"id":1,"firstName":"Anna","lastName":"Ivanova","dateOfBirth":"1990-05-17"}
    ]"#;

    #[test]
    fn test_parse_keeps_server_order() {
        let roster = Roster::from_json(TWO).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.ids(), vec![2, 1]);
        assert_eq!(roster.get(1).unwrap().first_name, "Anna");
        assert!(roster.get(3).is_none());
    }

    #[test]
    fn test_parse_empty_array() {
        let roster = Roster::from_json("[]").unwrap();
        assert!(roster.is_empty());
        assert_eq!(roster, Roster::empty());
    }

    #[test]
    fn test_not_json_is_malformed() {
        let err = Roster::from_json("not json").unwrap_err();
        assert!(matches!(err, RosterError::Malformed(_)));
    }

    #[test]
    fn test_object_instead_of_array_is_malformed() {
        let err = Roster::from_json(r#"{"id":1}"#).unwrap_err();
        assert!(matches!(err, RosterError::Malformed(_)));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let payload = r#"[
            {"id":5,"firstName":"A","lastName":"B","dateOfBirth":"2000-01-01"},
            {"id":5,"firstName":"C","lastName":"D","dateOfBirth":"2000-01-02"}
        ]"#;
        let err = Roster::from_json(payload).unwrap_err();
        assert!(matches!(err, RosterError::DuplicateId(5)));
    }

    #[test]
    fn test_json_round_trip_preserves_order() {
        let roster = Roster::from_json(TWO).unwrap();
        let again = Roster::from_json(&roster.to_json().unwrap()).unwrap();
        assert_eq!(roster, again);
    }
}
