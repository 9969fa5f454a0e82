//! GeoIP country lookup using a MaxMind MMDB database
//!
//! Entirely optional: a missing or unreadable database disables the
//! enrichment with a warning and the countries table simply stays empty.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use maxminddb::{geoip2, Reader};
use tracing::{info, warn};

pub struct GeoIp {
    reader: Reader<Vec<u8>>,
}

pub type SharedGeoIp = Arc<GeoIp>;

impl GeoIp {
    /// Opens the database at the given path. Returns `None` (after logging)
    /// when the path is empty, the file is absent, or it cannot be read.
    pub fn open(database_path: &str) -> Option<SharedGeoIp> {
        if database_path.is_empty() {
            return None;
        }

        let path = Path::new(database_path);
        if !path.exists() {
            warn!(path = database_path, "GeoIP database not found, country lookup disabled");
            return None;
        }

        match Reader::open_readfile(path) {
            Ok(reader) => {
                info!(path = database_path, "GeoIP database loaded");
                Some(Arc::new(Self { reader }))
            }
            Err(e) => {
                warn!(path = database_path, error = %e, "failed to load GeoIP database, country lookup disabled");
                None
            }
        }
    }

    /// Returns the ISO country code for an IP, or `None` when the address
    /// is unparsable, private/local, or has no record.
    pub fn lookup_country(&self, ip: &str) -> Option<String> {
        let addr: IpAddr = ip.parse().ok()?;

        if is_private_ip(&addr) {
            return None;
        }

        let country: geoip2::Country = self.reader.lookup(addr).ok()?;
        let code = country.country.as_ref()?.iso_code?;
        if code.is_empty() {
            return None;
        }
        Some(code.to_string())
    }
}

/// Addresses that can never resolve to a country
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
