//! Address expression parsing: the textual range grammar accepted on the
//! CLI and in address-list files, plus CSV/YAML loaders (spec §6).
//!
//! Grounded on `examples/original_source/src/luxos/ips.py` (`splitip`,
//! `iter_ip_ranges`) for the range grammar, and
//! `examples/original_source/src/luxos/scripts/luxos.py::load_ip_list_from_csv`
//! for the CSV skip-header/skip-comment convention.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

/// Matches a dotted-quad with an optional `:port` suffix, mirroring
/// `splitip`'s regex in the original implementation.
static IPV4_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<ip>\d{1,3}(?:\.\d{1,3}){3})(?::(?P<port>\d+))?$").unwrap());

/// One parsed endpoint: a hostname or dotted-quad, with an optional port
/// (absent when the expression didn't specify one).
pub type Endpoint = (String, Option<u16>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrParseError(pub String);

impl fmt::Display for AddrParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AddrParseError {}

/// Split `host[:port]` into its parts. A dotted-quad is matched by regex,
/// same as `splitip`; anything that doesn't match is treated as a DNS name
/// with its own optional `:port` suffix.
fn split_host_port(txt: &str) -> Result<(String, Option<u16>), AddrParseError> {
    if txt.is_empty() {
        return Err(AddrParseError(format!("invalid ip:port address '{txt}'")));
    }

    if let Some(caps) = IPV4_PORT_RE.captures(txt) {
        let ip = caps.name("ip").unwrap().as_str().to_string();
        let port = caps
            .name("port")
            .map(|m| m.as_str().parse::<u16>())
            .transpose()
            .map_err(|_| AddrParseError(format!("port out of range in '{txt}'")))?;
        return Ok((ip, port));
    }

    // Not a dotted-quad — treat as a DNS name, with an optional trailing
    // `:port` the way `H:P` is written for hostnames too.
    if let Some((host, port)) = txt.rsplit_once(':') {
        if let Ok(p) = port.parse::<u16>() {
            if !host.is_empty() {
                return Ok((host.to_string(), Some(p)));
            }
        }
    }
    Ok((txt.to_string(), None))
}

/// `true` if `host` parses as a dotted-quad IPv4 literal.
fn is_ipv4_literal(host: &str) -> bool {
    host.parse::<Ipv4Addr>().is_ok()
}

/// Expand one address expression (spec §6 grammar) into the `(host, port)`
/// pairs it denotes, in ascending order for ranges.
///
/// Accepted forms, comma-separated, whitespace-insignificant:
/// - `H` — a dotted quad or DNS name.
/// - `H:P` — with an explicit port.
/// - `H1-H2` — an inclusive IPv4 range (DNS names cannot be ranged).
/// - `H:P-H2` / `H-H2:P` / `H:P-H2:P` (ports must match when both given).
pub fn iter_ip_ranges(
    expr: &str,
    default_port: Option<u16>,
) -> Result<Vec<Endpoint>, AddrParseError> {
    let mut out = Vec::new();
    let stripped: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.is_empty() {
        return Ok(out);
    }

    for segment in stripped.split(',') {
        if segment.is_empty() {
            continue;
        }
        match segment.split_once('-') {
            None => {
                let (host, port) = split_host_port(segment)?;
                out.push((host, port.or(default_port)));
            }
            Some((start, end)) => {
                let (start_host, start_port) = split_host_port(start)?;
                let (end_host, end_port) = split_host_port(end)?;

                if !is_ipv4_literal(&start_host) || !is_ipv4_literal(&end_host) {
                    return Err(AddrParseError(format!(
                        "range endpoints must be IPv4 literals, got '{segment}'"
                    )));
                }
                if let (Some(sp), Some(ep)) = (start_port, end_port) {
                    if sp != ep {
                        return Err(AddrParseError(format!(
                            "invalid range ports in '{segment}'"
                        )));
                    }
                }

                let first: u32 = start_host.parse::<Ipv4Addr>().unwrap().into();
                let last: u32 = end_host.parse::<Ipv4Addr>().unwrap().into();
                if first > last {
                    return Err(AddrParseError(format!(
                        "range start after end in '{segment}'"
                    )));
                }
                let resolved_port = start_port.or(end_port).or(default_port);
                for n in first..=last {
                    out.push((Ipv4Addr::from(n).to_string(), resolved_port));
                }
            }
        }
    }

    Ok(out)
}

/// Load one hostname-per-row (or comma-separated) addresses from a CSV
/// file, skipping `#`-prefixed comment rows and a leading `hostname`
/// header row, matching `load_ip_list_from_csv`.
pub fn load_csv(path: &Path, default_port: u16) -> Result<Vec<Endpoint>, AddrParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| AddrParseError(format!("failed to open {}: {e}", path.display())))?;

    let mut out = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| AddrParseError(format!("failed to read {}: {e}", path.display())))?;
        if record.is_empty() {
            continue;
        }
        let first = record.get(0).unwrap_or("").trim();
        if first.starts_with('#') {
            continue;
        }
        if i == 0 && first.eq_ignore_ascii_case("hostname") {
            continue;
        }
        for field in record.iter() {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let (host, port) = split_host_port(field)?;
            out.push((host, port.or(Some(default_port))));
        }
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct YamlMiners {
    miners: YamlMinersInner,
}

#[derive(Debug, Deserialize)]
struct YamlMinersInner {
    luxos_port: Option<u16>,
    addresses: Vec<String>,
}

/// Load a YAML address list: `miners: { luxos_port: <int>, addresses:
/// [segment, ...] }`. Each address segment is itself expanded through
/// [`iter_ip_ranges`], falling back to `luxos_port` then to `default_port`
/// when a segment carries no port of its own.
pub fn load_yaml(path: &Path, default_port: u16) -> Result<Vec<Endpoint>, AddrParseError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| AddrParseError(format!("failed to open {}: {e}", path.display())))?;
    let parsed: YamlMiners = serde_yaml::from_str(&contents)
        .map_err(|e| AddrParseError(format!("failed to parse {}: {e}", path.display())))?;

    let fallback_port = parsed.miners.luxos_port.unwrap_or(default_port);
    let mut out = Vec::new();
    for segment in &parsed.miners.addresses {
        out.extend(iter_ip_ranges(segment, Some(fallback_port))?);
    }
    Ok(out)
}
