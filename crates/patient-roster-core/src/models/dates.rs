//! Serde adapters for the date shapes the backend emits.
//!
//! The REST endpoints write ISO strings. The broker's message converter uses a
//! bare object mapper, which writes `LocalDate`/`LocalDateTime` as numeric
//! arrays (`[2024,1,15]`, `[2024,1,15,10,30]`). Both are accepted; output is
//! always ISO.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{de, Deserialize};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Deserialize)]
#[serde(untagged)]
enum DateRepr {
    Text(String),
    Parts(Vec<i64>),
}

fn part<E: de::Error>(parts: &[i64], idx: usize) -> Result<u32, E> {
    let value = parts.get(idx).copied().unwrap_or(0);
    u32::try_from(value).map_err(|_| E::custom(format!("date component out of range: {value}")))
}

fn date_from_parts<E: de::Error>(parts: &[i64]) -> Result<NaiveDate, E> {
    if parts.len() < 3 {
        return Err(E::custom(format!(
            "expected at least [year, month, day], got {} components",
            parts.len()
        )));
    }
    let year = i32::try_from(parts[0]).map_err(|_| E::custom("year out of range"))?;
    NaiveDate::from_ymd_opt(year, part(parts, 1)?, part(parts, 2)?)
        .ok_or_else(|| E::custom(format!("invalid calendar date: {parts:?}")))
}

fn timestamp_from_parts<E: de::Error>(parts: &[i64]) -> Result<NaiveDateTime, E> {
    if parts.len() > 7 {
        return Err(E::custom(format!("too many timestamp components: {}", parts.len())));
    }
    date_from_parts(parts)?
        .and_hms_nano_opt(part(parts, 3)?, part(parts, 4)?, part(parts, 5)?, part(parts, 6)?)
        .ok_or_else(|| E::custom(format!("invalid time of day: {parts:?}")))
}

fn date_from_text<E: de::Error>(text: &str) -> Result<NaiveDate, E> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|e| E::custom(format!("invalid date '{text}': {e}")))
}

fn timestamp_from_text<E: de::Error>(text: &str) -> Result<NaiveDateTime, E> {
    let text = text.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.naive_utc());
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| E::custom(format!("invalid timestamp '{text}'")))
}

pub mod calendar_date {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&date.format(DATE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        match DateRepr::deserialize(deserializer)? {
            DateRepr::Text(text) => date_from_text(&text),
            DateRepr::Parts(parts) if parts.len() == 3 => date_from_parts(&parts),
            DateRepr::Parts(parts) => Err(de::Error::custom(format!(
                "expected [year, month, day], got {} components",
                parts.len()
            ))),
        }
    }
}

pub mod optional_timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.collect_str(&ts.format(TIMESTAMP_FORMAT)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<DateRepr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(DateRepr::Text(text)) => timestamp_from_text(&text).map(Some),
            Some(DateRepr::Parts(parts)) => timestamp_from_parts(&parts).map(Some),
        }
    }
}
