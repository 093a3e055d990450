//! Fetch, filter and enrich live records into one snapshot.

use crate::client::{ClientError, StateFeed};
use crate::hub::SnapshotSource;
use crate::report::Reporter;
use crate::routes::RouteLookup;
use crate::types::{EnrichedAircraft, LiveRecord, Snapshot};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Feed error: {0}")]
    Feed(#[from] ClientError),
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Per-fetch filter counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub received: usize,
    pub kept: usize,
    pub no_callsign: usize,
    pub no_route: usize,
    pub lookup_errors: usize,
}

/// Joins the live feed with the route reference data.
pub struct Merger<F, R> {
    feed: F,
    routes: R,
    reporter: Arc<dyn Reporter>,
}

impl<F: StateFeed, R: RouteLookup> Merger<F, R> {
    pub fn new(feed: F, routes: R, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            feed,
            routes,
            reporter,
        }
    }

    /// Fetch the current records and serialize the enriched subset.
    pub async fn fetch(&self) -> Result<Snapshot, MergeError> {
        let start = Instant::now();
        let records = self.feed.fetch_states().await?;

        let (aircraft, stats) = self.enrich(&records);
        let snapshot = Snapshot::encode(&aircraft)?;

        tracing::debug!(
            received = stats.received,
            kept = stats.kept,
            no_callsign = stats.no_callsign,
            no_route = stats.no_route,
            lookup_errors = stats.lookup_errors,
            bytes = snapshot.byte_len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Merged snapshot"
        );

        Ok(snapshot)
    }

    /// Keep records with a callsign and a known route, in feed order.
    pub fn enrich(&self, records: &[LiveRecord]) -> (Vec<EnrichedAircraft>, MergeStats) {
        let mut stats = MergeStats {
            received: records.len(),
            ..Default::default()
        };
        let mut aircraft = Vec::with_capacity(records.len());

        for record in records {
            let callsign = match record.callsign.as_deref().map(str::trim) {
                Some(c) if !c.is_empty() => c,
                _ => {
                    stats.no_callsign += 1;
                    continue;
                }
            };

            let route = match self.routes.find_route(callsign) {
                Ok(Some(route)) => route,
                Ok(None) => {
                    tracing::debug!("Missing route for callsign: {}", callsign);
                    stats.no_route += 1;
                    continue;
                }
                Err(e) => {
                    self.reporter.report(&e);
                    stats.lookup_errors += 1;
                    continue;
                }
            };

            aircraft.push(EnrichedAircraft {
                callsign: callsign.to_string(),
                route,
                altitude: record.geo_altitude,
                velocity: record.velocity,
            });
        }

        stats.kept = aircraft.len();
        (aircraft, stats)
    }
}

impl<F: StateFeed, R: RouteLookup> SnapshotSource for Merger<F, R> {
    async fn fetch(&self) -> Result<Snapshot, MergeError> {
        Merger::fetch(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::testing::CapturingReporter;
    use crate::routes::{RouteError, RouteTable};
    use crate::types::{Airport, Route};
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedFeed {
        result: Mutex<Option<Result<Vec<LiveRecord>, ClientError>>>,
        calls: AtomicUsize,
    }

    impl FixedFeed {
        fn ok(records: Vec<LiveRecord>) -> Self {
            Self {
                result: Mutex::new(Some(Ok(records))),
                calls: AtomicUsize::new(0),
            }
        }

        fn err(error: ClientError) -> Self {
            Self {
                result: Mutex::new(Some(Err(error))),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl StateFeed for FixedFeed {
        async fn fetch_states(&self) -> Result<Vec<LiveRecord>, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.lock().take().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct BrokenLookup;

    impl RouteLookup for BrokenLookup {
        fn find_route(&self, _callsign: &str) -> Result<Option<Route>, RouteError> {
            Err(RouteError::Database(rusqlite::Error::InvalidQuery))
        }
    }

    fn record(callsign: Option<&str>, altitude: Option<f64>, velocity: Option<f64>) -> LiveRecord {
        LiveRecord {
            icao24: "4007f1".to_string(),
            callsign: callsign.map(str::to_string),
            geo_altitude: altitude,
            baro_altitude: altitude.map(|a| a - 50.0),
            velocity,
            ..Default::default()
        }
    }

    fn route(from: &str, to: &str) -> Route {
        Route {
            from: Airport {
                iata: from.to_string(),
                name: format!("{} Airport", from),
                country: "United Kingdom".to_string(),
            },
            to: Airport {
                iata: to.to_string(),
                name: format!("{} Airport", to),
                country: "Spain".to_string(),
            },
        }
    }

    fn routes() -> RouteTable {
        let mut table = RouteTable::new();
        table.insert("BAW123", route("LHR", "MAD"));
        table.insert("EZY45", route("LGW", "BCN"));
        table
    }

    fn merger<F: StateFeed, R: RouteLookup>(
        feed: F,
        routes: R,
    ) -> (Merger<F, R>, Arc<CapturingReporter>) {
        let reporter = Arc::new(CapturingReporter::default());
        (Merger::new(feed, routes, reporter.clone()), reporter)
    }

    #[tokio::test]
    async fn test_trims_callsign_and_drops_missing() {
        let feed = FixedFeed::ok(vec![
            record(Some("BAW123 "), Some(1600.0), Some(120.5)),
            record(None, Some(900.0), Some(80.0)),
        ]);
        let (merger, reporter) = merger(feed, routes());

        let snapshot = merger.fetch().await.unwrap();
        let aircraft = Snapshot::decode(snapshot.as_str()).unwrap();

        assert_eq!(aircraft.len(), 1);
        assert_eq!(aircraft[0].callsign, "BAW123");
        assert_eq!(aircraft[0].route, route("LHR", "MAD"));
        assert_eq!(aircraft[0].altitude, Some(1600.0));
        assert_eq!(aircraft[0].velocity, Some(120.5));
        assert!(reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_yields_empty_snapshot() {
        let feed = FixedFeed::ok(vec![record(Some("XYZ999"), None, None)]);
        let (merger, reporter) = merger(feed, routes());

        let snapshot = merger.fetch().await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.as_str(), "[]");
        assert!(reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn test_empty_feed() {
        let (merger, _) = merger(FixedFeed::ok(Vec::new()), routes());
        let snapshot = merger.fetch().await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_feed_error_propagates() {
        let feed = FixedFeed::err(ClientError::ServerError {
            status: StatusCode::SERVICE_UNAVAILABLE,
        });
        let (merger, reporter) = merger(feed, routes());

        let err = merger.fetch().await.unwrap_err();
        assert!(matches!(err, MergeError::Feed(ClientError::ServerError { .. })));
        assert_eq!(merger.feed.calls.load(Ordering::SeqCst), 1);
        // Propagated to the caller, not reported here.
        assert!(reporter.reports().is_empty());
    }

    #[test]
    fn test_preserves_feed_order_and_nulls() {
        let (merger, _) = merger(FixedFeed::ok(Vec::new()), routes());
        let records = vec![
            record(Some("EZY45   "), None, Some(200.0)),
            record(Some("   "), Some(1.0), Some(1.0)),
            record(Some("NOPE1"), Some(2.0), Some(2.0)),
            record(Some("BAW123"), Some(3000.0), None),
        ];

        let (aircraft, stats) = merger.enrich(&records);

        let callsigns: Vec<_> = aircraft.iter().map(|a| a.callsign.as_str()).collect();
        assert_eq!(callsigns, ["EZY45", "BAW123"]);
        assert_eq!(aircraft[0].altitude, None);
        assert_eq!(aircraft[1].velocity, None);
        assert_eq!(
            stats,
            MergeStats {
                received: 4,
                kept: 2,
                no_callsign: 1,
                no_route: 1,
                lookup_errors: 0,
            }
        );
    }

    #[test]
    fn test_lookup_error_reported_not_propagated() {
        let (merger, reporter) = merger(FixedFeed::ok(Vec::new()), BrokenLookup);
        let records = vec![record(Some("BAW123"), None, None)];

        let (aircraft, stats) = merger.enrich(&records);

        assert!(aircraft.is_empty());
        assert_eq!(stats.lookup_errors, 1);
        assert_eq!(
            stats.kept + stats.no_callsign + stats.no_route + stats.lookup_errors,
            stats.received
        );
        assert_eq!(reporter.reports().len(), 1);
    }
}
