//! Core data types for live aircraft state and route enrichment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One decoded state vector from the live feed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveRecord {
    /// ICAO 24-bit transponder address in hex.
    pub icao24: String,
    /// Callsign as broadcast, usually space padded to 8 chars.
    pub callsign: Option<String>,
    pub origin_country: String,
    /// Unix seconds of the last position update.
    pub time_position: Option<u64>,
    /// Unix seconds of the last message of any kind.
    pub last_contact: u64,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    /// Barometric altitude in meters.
    pub baro_altitude: Option<f64>,
    pub on_ground: bool,
    /// Ground speed in m/s.
    pub velocity: Option<f64>,
    /// Degrees clockwise from north.
    pub true_track: Option<f64>,
    /// Vertical rate in m/s, positive when climbing.
    pub vertical_rate: Option<f64>,
    /// Geometric altitude in meters.
    pub geo_altitude: Option<f64>,
    pub squawk: Option<String>,
    pub spi: bool,
    pub position_source: PositionSource,
}

/// Origin of a state vector's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionSource {
    #[default]
    Adsb,
    Asterix,
    Mlat,
    Flarm,
    Unknown,
}

impl From<u64> for PositionSource {
    fn from(v: u64) -> Self {
        match v {
            0 => Self::Adsb,
            1 => Self::Asterix,
            2 => Self::Mlat,
            3 => Self::Flarm,
            _ => Self::Unknown,
        }
    }
}

/// Airport descriptor from the reference database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airport {
    pub iata: String,
    pub name: String,
    pub country: String,
}

/// Origin and destination for a callsign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub from: Airport,
    pub to: Airport,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}) -> {} ({}, {})",
            self.from.iata,
            self.from.name,
            self.from.country,
            self.to.iata,
            self.to.name,
            self.to.country
        )
    }
}

/// A live record that carried a callsign with a known route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedAircraft {
    pub callsign: String,
    pub route: Route,
    pub altitude: Option<f64>,
    pub velocity: Option<f64>,
}

/// One serialized merge cycle, shared by every subscriber.
///
/// Cloning is a reference count bump; the payload itself is never copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    payload: Arc<str>,
    aircraft: usize,
}

impl Snapshot {
    /// Serialize aircraft, keeping their order.
    pub fn encode(aircraft: &[EnrichedAircraft]) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_string(aircraft)?;
        Ok(Self {
            payload: payload.into(),
            aircraft: aircraft.len(),
        })
    }

    /// Decode a payload produced by [`Snapshot::encode`].
    pub fn decode(payload: &str) -> Result<Vec<EnrichedAircraft>, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn as_str(&self) -> &str {
        &self.payload
    }

    /// Number of aircraft in the payload.
    pub fn aircraft_count(&self) -> usize {
        self.aircraft
    }

    /// Size of the serialized payload.
    pub fn byte_len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft == 0
    }

    /// True if both snapshots share the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}
