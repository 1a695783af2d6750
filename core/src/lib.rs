//! Shared value types for the ipsift probing engine.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// An IPv4 address under evaluation for selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Candidate(pub Ipv4Addr);

impl From<Ipv4Addr> for Candidate {
    fn from(ip: Ipv4Addr) -> Self {
        Candidate(ip)
    }
}

impl FromStr for Candidate {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Candidate(s.parse()?))
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One latency measurement: average round-trip over the successful replies
/// (absent when no reply carried a time) and packet loss in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    pub avg_ms: Option<f64>,
    pub loss_pct: f64,
}

impl LatencySample {
    /// Sample recorded when the whole probe timed out or faulted outright.
    pub fn total_loss() -> Self {
        LatencySample { avg_ms: None, loss_pct: 100.0 }
    }
}
