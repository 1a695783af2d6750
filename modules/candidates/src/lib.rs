//! Candidate pool loading: bare IPv4 addresses and CIDR blocks, deduplicated.

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use ipsift_core::Candidate;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Why a single input line was rejected.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("invalid CIDR block: {0}")]
    Cidr(String),
    #[error("invalid address: {0}")]
    Address(String),
}

/// Parse one non-blank line into candidates. A CIDR block expands to its
/// usable host addresses (network and broadcast excluded, with the usual
/// /31 and /32 exceptions); anything else must be a bare dotted-quad.
pub fn parse_line(line: &str) -> Result<Vec<Candidate>, LineError> {
    if line.contains('/') {
        let net: Ipv4Net = line.parse().map_err(|_| LineError::Cidr(line.to_string()))?;
        Ok(net.hosts().map(Candidate).collect())
    } else {
        line.parse::<Candidate>()
            .map(|c| vec![c])
            .map_err(|_| LineError::Address(line.to_string()))
    }
}

/// Parse raw input lines into a sorted, deduplicated candidate set.
/// Blank lines and `#` comments are skipped; malformed entries are logged
/// and skipped, never fatal.
pub fn parse_lines<'a, I>(lines: I) -> Vec<Candidate>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut set = BTreeSet::new();
    for raw in lines {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Ok(expanded) => set.extend(expanded),
            Err(e) => warn!("skipping input line: {}", e),
        }
    }
    set.into_iter().collect()
}

/// Load candidates from a file. An unreadable file is fatal; an empty
/// result is not (the caller decides there is no work to do).
pub fn load_path(path: &Path) -> Result<Vec<Candidate>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading candidate list {}", path.display()))?;
    Ok(parse_lines(raw.lines()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(lines: &[&str]) -> Vec<String> {
        parse_lines(lines.iter().copied())
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    #[test]
    fn expands_cidr_to_usable_hosts() {
        assert_eq!(addrs(&["192.168.1.0/30"]), vec!["192.168.1.1", "192.168.1.2"]);
    }

    #[test]
    fn full_slash_24_has_254_hosts() {
        assert_eq!(parse_lines(["172.16.5.0/24"]).len(), 254);
    }

    #[test]
    fn slash_31_and_32_keep_all_addresses() {
        assert_eq!(addrs(&["10.0.0.0/31"]), vec!["10.0.0.0", "10.0.0.1"]);
        assert_eq!(addrs(&["10.0.0.7/32"]), vec!["10.0.0.7"]);
    }

    #[test]
    fn host_bits_in_cidr_are_tolerated() {
        // 10.0.0.5/30 names the same network as 10.0.0.4/30
        assert_eq!(addrs(&["10.0.0.5/30"]), vec!["10.0.0.5", "10.0.0.6"]);
    }

    #[test]
    fn dedups_overlapping_inputs() {
        assert_eq!(
            addrs(&["10.0.0.1", "10.0.0.0/30", "10.0.0.1"]),
            vec!["10.0.0.1", "10.0.0.2"]
        );
    }

    #[test]
    fn skips_blank_comment_and_malformed_lines() {
        let got = addrs(&[
            "# edge pool",
            "",
            "not-an-ip",
            "300.1.2.3",
            "::1",
            "10.0.0.0/33",
            "  10.0.0.9  ",
        ]);
        assert_eq!(got, vec!["10.0.0.9"]);
    }

    #[test]
    fn empty_input_is_empty_not_error() {
        assert!(parse_lines([]).is_empty());
    }
}
