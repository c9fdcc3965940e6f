// src/core/failover/info.rs

//! Helpers for digesting `INFO` responses and configured node addresses.

use tracing::error;

/// Keys of interest in `INFO` responses.
pub const KEY_RUN_ID: &str = "run_id";
pub const KEY_ROLE: &str = "role";
pub const KEY_MASTER_HOST: &str = "master_host";
pub const KEY_MASTER_PORT: &str = "master_port";

/// Role values as reported by `INFO replication`. Valkey still reports the
/// legacy `slave` token for replicas.
pub const ROLE_MASTER: &str = "master";
pub const ROLE_REPLICA: &str = "slave";

/// Takes a given `INFO` result from Valkey and extracts the wanted value.
///
/// The body is a sequence of CRLF-separated `key:value` lines interleaved with
/// `# Section` headers. Lines without a `:` are skipped; the first exact key
/// match wins and its value is returned verbatim. A missing key yields the
/// empty string.
pub fn parse_value<'a>(info: &'a str, key: &str) -> &'a str {
    for field in info.split("\r\n") {
        let Some((k, v)) = field.split_once(':') else {
            continue;
        };
        if k == key {
            return v;
        }
    }

    error!(key, "Could not find the requested key in the info response");
    ""
}

/// Splits a configured node address into host and port, falling back to
/// `default_port` when the address does not carry its own.
///
/// Accepts `host`, `host:port`, bracketed IPv6 (`[addr]:port`) and bare IPv6
/// addresses, which contain multiple colons and are taken wholesale.
pub fn split_host_port(address: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            if let Some(port) = tail.strip_prefix(':').and_then(|p| p.parse().ok()) {
                return (host.to_string(), port);
            }
            return (host.to_string(), default_port);
        }
        return (address.to_string(), default_port);
    }

    match address.split_once(':') {
        // A second colon means a bare IPv6 address rather than host:port.
        Some((_, tail)) if tail.contains(':') => (address.to_string(), default_port),
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (address.to_string(), default_port),
        },
        None => (address.to_string(), default_port),
    }
}
