//! External resources: persistent store, geolocation data, metrics.
//!
//! Everything the gateway borrows from the outside world is acquired in one
//! place with a fixed order (store, then geolocation, then metrics) and
//! released in reverse, so a failure partway through startup never leaves a
//! half-wired context behind.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::GatewayError;
use crate::store::Store;

/// A resolved client geolocation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2 country code.
    pub country_code: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Resolves a client address to a geolocation.
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, addr: IpAddr) -> Option<GeoLocation>;
}

/// Geolocation database backed by a local file of CIDR ranges.
///
/// One range per line: `network/prefix,country,latitude,longitude`. Only
/// IPv4 ranges are supported; IPv6 addresses resolve to nothing.
#[derive(Debug, Default)]
pub struct CidrGeoDb {
    ranges: Vec<CidrRange>,
}

#[derive(Debug)]
struct CidrRange {
    network: u32,
    mask: u32,
    location: GeoLocation,
}

impl CidrGeoDb {
    /// Parses the database file. Unparseable lines are skipped with a
    /// warning rather than failing the whole load.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut ranges = Vec::new();

        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Self::parse_line(line) {
                Some(range) => ranges.push(range),
                None => warn!(
                    "Skipping malformed geolocation entry at {}:{}",
                    path.display(),
                    lineno + 1
                ),
            }
        }

        Ok(Self { ranges })
    }

    fn parse_line(line: &str) -> Option<CidrRange> {
        let mut fields = line.split(',');
        let cidr = fields.next()?;
        let country = fields.next()?.trim();
        let latitude: f64 = fields.next()?.trim().parse().ok()?;
        let longitude: f64 = fields.next()?.trim().parse().ok()?;

        let (network, prefix) = cidr.trim().split_once('/')?;
        let network: Ipv4Addr = network.parse().ok()?;
        let prefix: u32 = prefix.parse().ok()?;
        if prefix > 32 {
            return None;
        }

        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        };

        Some(CidrRange {
            network: u32::from(network) & mask,
            mask,
            location: GeoLocation {
                country_code: country.to_uppercase(),
                latitude,
                longitude,
            },
        })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl GeoLookup for CidrGeoDb {
    fn lookup(&self, addr: IpAddr) -> Option<GeoLocation> {
        let IpAddr::V4(v4) = addr else {
            return None;
        };
        let bits = u32::from(v4);

        self.ranges
            .iter()
            .find(|r| bits & r.mask == r.network)
            .map(|r| r.location.clone())
    }
}

/// Opens the geolocation database if its file exists.
///
/// A missing file disables lookups entirely; an unreadable file is treated
/// the same way, with a warning.
pub fn open_geoloc_db(path: &Path) -> Option<Arc<dyn GeoLookup>> {
    if !path.exists() {
        info!(
            "🌍 No geolocation database at {}, lookups disabled",
            path.display()
        );
        return None;
    }

    match CidrGeoDb::load(path) {
        Ok(db) => {
            info!("🌍 Loaded {} geolocation ranges", db.len());
            Some(Arc::new(db))
        }
        Err(e) => {
            warn!("Failed to read geolocation database: {e}, lookups disabled");
            None
        }
    }
}

/// Sink for operational metrics.
///
/// The gateway reports through this seam; what backs it (a statsd pipeline,
/// a scrape endpoint, nothing at all) is the embedder's choice.
pub trait MetricsSink: Send + Sync {
    /// Gauge: number of currently online sessions.
    fn set_online_players(&self, count: usize);

    /// Counter: connections accepted by the listener.
    fn incr_connections_accepted(&self);

    /// Counter: sessions evicted by the liveness reaper.
    fn incr_sessions_reaped(&self, count: usize);
}

/// Discards every metric.
#[derive(Debug, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn set_online_players(&self, _count: usize) {}
    fn incr_connections_accepted(&self) {}
    fn incr_sessions_reaped(&self, _count: usize) {}
}

/// The gateway's acquired external resources.
pub struct Resources {
    pub store: Arc<dyn Store>,
    pub geo: Option<Arc<dyn GeoLookup>>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Resources {
    /// Acquires resources in dependency order: store first (verified with a
    /// trivial query), then geolocation data, then the metrics sink.
    pub async fn acquire(
        store: Arc<dyn Store>,
        geoloc_db_file: &Path,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, GatewayError> {
        let users = store.user_count().await?;
        info!("🗄️  Store reachable ({users} registered accounts)");

        let geo = open_geoloc_db(geoloc_db_file);

        metrics.set_online_players(0);

        Ok(Self {
            store,
            geo,
            metrics,
        })
    }

    /// Releases resources in reverse acquisition order. The online-players
    /// gauge is zeroed so a scraped value never outlives the process's
    /// actual population.
    pub async fn release(&self) {
        self.metrics.set_online_players(0);
        info!("🗄️  External resources released");
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("geo_enabled", &self.geo.is_some())
            .finish_non_exhaustive()
    }
}
