//! Decoder for the OpenSky `states/all` response.
//!
//! The API returns every state vector as a positional JSON array rather than
//! an object, so each field is pulled out by index.

use crate::types::{LiveRecord, PositionSource};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("State {index} has {got} fields, need at least {need}")]
    FieldCount { index: usize, need: usize, got: usize },
    #[error("State {index} field {field} has unexpected type")]
    InvalidField { index: usize, field: &'static str },
    #[error("Server returned error: {0}")]
    ServerResponse(String),
}

/// Number of positional fields in a state vector.
const STATE_FIELDS: usize = 17;

#[derive(Debug, Deserialize)]
struct StatesResponse {
    #[serde(default)]
    time: Option<u64>,
    #[serde(default)]
    states: Option<Vec<Vec<Value>>>,
}

/// Response timestamp plus decoded state vectors.
#[derive(Debug, Clone, Default)]
pub struct States {
    pub time: Option<u64>,
    pub records: Vec<LiveRecord>,
}

/// Parse a `states/all` response body.
pub fn parse_states(data: &[u8]) -> Result<States, ParseError> {
    if data.starts_with(b"<!") || data.starts_with(b"<html") {
        let text = String::from_utf8_lossy(&data[..data.len().min(500)]);
        return Err(ParseError::ServerResponse(text.to_string()));
    }

    let response: StatesResponse = serde_json::from_slice(data)?;

    let records = response
        .states
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(index, fields)| parse_state(index, fields))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(States {
        time: response.time,
        records,
    })
}

/// Parse one positional state vector. Trailing fields beyond the known
/// seventeen (e.g. the extended aircraft category) are ignored.
pub fn parse_state(index: usize, fields: &[Value]) -> Result<LiveRecord, ParseError> {
    if fields.len() < STATE_FIELDS {
        return Err(ParseError::FieldCount {
            index,
            need: STATE_FIELDS,
            got: fields.len(),
        });
    }

    let field = Field { index, fields };

    Ok(LiveRecord {
        icao24: field.string(0, "icao24")?,
        callsign: field.opt_string(1, "callsign")?,
        origin_country: field.string(2, "origin_country")?,
        time_position: field.opt_u64(3, "time_position")?,
        last_contact: field.opt_u64(4, "last_contact")?.unwrap_or(0),
        longitude: field.opt_f64(5, "longitude")?,
        latitude: field.opt_f64(6, "latitude")?,
        baro_altitude: field.opt_f64(7, "baro_altitude")?,
        on_ground: field.bool(8, "on_ground")?,
        velocity: field.opt_f64(9, "velocity")?,
        true_track: field.opt_f64(10, "true_track")?,
        vertical_rate: field.opt_f64(11, "vertical_rate")?,
        // 12: sensors, only populated when filtering by receiver
        geo_altitude: field.opt_f64(13, "geo_altitude")?,
        squawk: field.opt_string(14, "squawk")?,
        spi: field.bool(15, "spi")?,
        position_source: field
            .opt_u64(16, "position_source")?
            .map(PositionSource::from)
            .unwrap_or_default(),
    })
}

struct Field<'a> {
    index: usize,
    fields: &'a [Value],
}

impl Field<'_> {
    fn invalid(&self, field: &'static str) -> ParseError {
        ParseError::InvalidField {
            index: self.index,
            field,
        }
    }

    fn opt_string(&self, at: usize, name: &'static str) -> Result<Option<String>, ParseError> {
        match &self.fields[at] {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            _ => Err(self.invalid(name)),
        }
    }

    fn string(&self, at: usize, name: &'static str) -> Result<String, ParseError> {
        Ok(self.opt_string(at, name)?.unwrap_or_default())
    }

    fn opt_f64(&self, at: usize, name: &'static str) -> Result<Option<f64>, ParseError> {
        match &self.fields[at] {
            Value::Null => Ok(None),
            Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| self.invalid(name)),
            _ => Err(self.invalid(name)),
        }
    }

    fn opt_u64(&self, at: usize, name: &'static str) -> Result<Option<u64>, ParseError> {
        match &self.fields[at] {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .map(Some)
                .ok_or_else(|| self.invalid(name)),
            _ => Err(self.invalid(name)),
        }
    }

    fn bool(&self, at: usize, name: &'static str) -> Result<bool, ParseError> {
        match &self.fields[at] {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(*b),
            _ => Err(self.invalid(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "time": 1700000000,
        "states": [
            ["4007f1", "BAW123  ", "United Kingdom", 1699999998, 1699999999,
             -0.1631, 51.4703, 1524.0, false, 102.3, 270.5, -3.2,
             null, 1600.2, "2201", false, 0],
            ["3c6444", null, "Germany", null, 1699999990,
             null, null, null, true, 0.0, null, null,
             null, null, null, false, 2, 4]
        ]
    }"#;

    #[test]
    fn test_parse_states() {
        let states = parse_states(SAMPLE.as_bytes()).unwrap();
        assert_eq!(states.time, Some(1700000000));
        assert_eq!(states.records.len(), 2);

        let first = &states.records[0];
        assert_eq!(first.icao24, "4007f1");
        assert_eq!(first.callsign.as_deref(), Some("BAW123  "));
        assert_eq!(first.geo_altitude, Some(1600.2));
        assert_eq!(first.velocity, Some(102.3));
        assert_eq!(first.squawk.as_deref(), Some("2201"));
        assert_eq!(first.position_source, PositionSource::Adsb);

        let second = &states.records[1];
        assert_eq!(second.callsign, None);
        assert!(second.on_ground);
        assert_eq!(second.time_position, None);
        assert_eq!(second.position_source, PositionSource::Mlat);
    }

    #[test]
    fn test_null_states() {
        let states = parse_states(br#"{"time": 1700000000, "states": null}"#).unwrap();
        assert!(states.records.is_empty());
    }

    #[test]
    fn test_short_state_rejected() {
        let err = parse_states(br#"{"time": 1, "states": [["abc", "X"]]}"#).unwrap_err();
        assert!(matches!(
            err,
            ParseError::FieldCount { index: 0, need: 17, got: 2 }
        ));
    }

    #[test]
    fn test_wrong_field_type() {
        let body = r#"{"states": [["abc", 42, "X", null, 1, null, null, null,
            false, null, null, null, null, null, null, false, 0]]}"#;
        let err = parse_states(body.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidField { index: 0, field: "callsign" }
        ));
    }

    #[test]
    fn test_html_error_page() {
        let err = parse_states(b"<!DOCTYPE html><p>down</p>").unwrap_err();
        assert!(matches!(err, ParseError::ServerResponse(_)));
    }
}
