//! Callsign to route lookup against the Virtual Radar reference dataset.

use crate::types::{Airport, Route};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Reference database not found: {0}")]
    NotFound(String),
}

const FIND_ROUTE: &str = "
    select
        FromAirportIata, FromAirportName, FromAirportCountry,
        ToAirportIata, ToAirportName, ToAirportCountry
    from RouteView
    where Callsign = ?1
";

/// Resolves a callsign to its scheduled route.
pub trait RouteLookup: Send + Sync {
    /// `Ok(None)` means the callsign is unknown, which is routine.
    fn find_route(&self, callsign: &str) -> Result<Option<Route>, RouteError>;
}

/// Read-only handle to a `StandingData.sqb` database.
pub struct RouteDatabase {
    conn: Mutex<Connection>,
}

impl RouteDatabase {
    /// Open the database read-only and check the route view is queryable.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RouteError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(RouteError::NotFound(path.display().to_string()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        Self::from_connection(conn)
    }

    /// Wrap an existing connection, e.g. an in-memory fixture.
    pub fn from_connection(conn: Connection) -> Result<Self, RouteError> {
        // Fails early if RouteView is missing or has the wrong columns.
        conn.prepare_cached(FIND_ROUTE)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RouteLookup for RouteDatabase {
    fn find_route(&self, callsign: &str) -> Result<Option<Route>, RouteError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(FIND_ROUTE)?;

        let route = stmt
            .query_row([callsign], |row| {
                Ok(Route {
                    from: Airport {
                        iata: row.get(0)?,
                        name: row.get(1)?,
                        country: row.get(2)?,
                    },
                    to: Airport {
                        iata: row.get(3)?,
                        name: row.get(4)?,
                        country: row.get(5)?,
                    },
                })
            })
            .optional()?;

        Ok(route)
    }
}

/// In-memory route table.
#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, callsign: impl Into<String>, route: Route) {
        self.routes.insert(callsign.into(), route);
    }
}

impl FromIterator<(String, Route)> for RouteTable {
    fn from_iter<I: IntoIterator<Item = (String, Route)>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().collect(),
        }
    }
}

impl RouteLookup for RouteTable {
    fn find_route(&self, callsign: &str) -> Result<Option<Route>, RouteError> {
        Ok(self.routes.get(callsign).cloned())
    }
}
