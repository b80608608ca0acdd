//! Patient models.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::dates;

/// A patient record as served by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    /// Server-assigned identifier, unique within a roster
    pub id: i64,
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Date of birth (no time component)
    #[serde(with = "dates::calendar_date")]
    pub date_of_birth: NaiveDate,
    /// Registration timestamp; the reception API omits it
    #[serde(
        default,
        with = "dates::optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<NaiveDateTime>,
}

impl Patient {
    /// "First Last", as shown in confirmations.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Completed years of age on the given day.
    ///
    /// Returns 0 for a birth date after `today`.
    pub fn age_on(&self, today: NaiveDate) -> u32 {
        let mut age = today.year() - self.date_of_birth.year();
        if (today.month(), today.day()) < (self.date_of_birth.month(), self.date_of_birth.day()) {
            age -= 1;
        }
        age.max(0) as u32
    }
}

/// Request body for registering a patient at the reception desk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    #[serde(with = "dates::calendar_date")]
    pub date_of_birth: NaiveDate,
}

impl NewPatient {
    /// Create a request with required fields.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, date_of_birth: NaiveDate) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            date_of_birth,
        }
    }

    /// Trim names and check that none is blank.
    ///
    /// Returns the name of the first missing field on failure.
    pub fn validated(self) -> Result<Self, &'static str> {
        let first_name = self.first_name.trim().to_string();
        let last_name = self.last_name.trim().to_string();
        if first_name.is_empty() {
            return Err("firstName");
        }
        if last_name.is_empty() {
            return Err("lastName");
        }
        Ok(Self {
            first_name,
            last_name,
            date_of_birth: self.date_of_birth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn patient(dob: NaiveDate) -> Patient {
        Patient {
            id: 1,
            first_name: "Ivan".into(),
            last_name: "Petrov".into(),
            date_of_birth: dob,
            created_at: None,
        }
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{"id":7,"firstName":"Anna","lastName":"Ivanova","dateOfBirth":"1990-05-17","createdAt":"2024-01-15"}"#;
        let p: Patient = serde_json::from_str(json).unwrap();
        assert_eq!(p.id, 7);
        assert_eq!(p.first_name, "Anna");
        assert_eq!(p.date_of_birth, date(1990, 5, 17));
        assert_eq!(p.created_at, Some(date(2024, 1, 15).and_hms_opt(0, 0, 0).unwrap()));
    }

    #[test]
    fn test_deserialize_without_created_at() {
        let json = r#"{"id":3,"firstName":"Oleg","lastName":"Smirnov","dateOfBirth":"1985-12-01"}"#;
        let p: Patient = serde_json::from_str(json).unwrap();
        assert!(p.created_at.is_none());

        let back = serde_json::to_value(&p).unwrap();
        assert!(back.get("createdAt").is_none());
        assert_eq!(back["dateOfBirth"], "1985-12-01");
    }

    #[test]
    fn test_deserialize_array_dates() {
        let json = r#"{"id":2,"firstName":"A","lastName":"B","dateOfBirth":[2001,2,3],"createdAt":[2024,3,4,10,30,5]}"#;
        let p: Patient = serde_json::from_str(json).unwrap();
        assert_eq!(p.date_of_birth, date(2001, 2, 3));
        assert_eq!(p.created_at, Some(date(2024, 3, 4).and_hms_opt(10, 30, 5).unwrap()));
    }

    #[test]
    fn test_age_before_and_after_birthday() {
        let p = patient(date(1990, 6, 15));
        assert_eq!(p.age_on(date(2024, 6, 14)), 33);
        assert_eq!(p.age_on(date(2024, 6, 15)), 34);
        assert_eq!(p.age_on(date(2024, 12, 31)), 34);
    }

    #[test]
    fn test_age_future_birth_date() {
        let p = patient(date(2030, 1, 1));
        assert_eq!(p.age_on(date(2024, 1, 1)), 0);
    }

    #[test]
    fn test_new_patient_validation() {
        let ok = NewPatient::new("  Anna ", "Ivanova", date(1990, 1, 1)).validated().unwrap();
        assert_eq!(ok.first_name, "Anna");

        let missing = NewPatient::new("Anna", "   ", date(1990, 1, 1)).validated();
        assert_eq!(missing, Err("lastName"));

        let missing = NewPatient::new("", "Ivanova", date(1990, 1, 1)).validated();
        assert_eq!(missing, Err("firstName"));
    }

    #[test]
    fn test_new_patient_wire_format() {
        let body = serde_json::to_value(NewPatient::new("Anna", "Ivanova", date(1990, 5, 17))).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"firstName": "Anna", "lastName": "Ivanova", "dateOfBirth": "1990-05-17"})
        );
    }
}
