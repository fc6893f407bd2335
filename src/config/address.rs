// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `host[:port]` addresses with DNS resolution and IPv4 coercion.
//!
//! Serialization preserves the configured form; `to_string()` renders the
//! validated `ip:port` (or `host:port` for remote addresses left to the
//! far end to resolve).

use std::net::{IpAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use super::validation::Validations;

/// An endpoint address from configuration. Blank until validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address {
    raw: String,
    #[serde(skip)]
    resolved: String,
    #[serde(skip)]
    port: u16,
    #[serde(skip)]
    valid: bool,
}

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            raw: address.into().trim().to_string(),
            resolved: String::new(),
            port: 0,
            valid: false,
        }
    }

    /// A pre-validated loopback address, used for defaulted tunnel
    /// entrances and synthesized jump tunnels.
    pub fn loopback(port: u16) -> Self {
        Self {
            raw: format!("127.0.0.1:{port}"),
            resolved: format!("127.0.0.1:{port}"),
            port,
            valid: true,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.raw.trim().is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The raw configured form, before validation.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Validate and resolve the address.
    ///
    /// A single token is a host when `default_port` is requested (port
    /// defaults to 22) and a port on `0.0.0.0` otherwise. A host that
    /// fails to resolve is an error, unless `remote` (the far end of the
    /// SSH hop may be able to resolve it), in which case it is a warning
    /// and the name is kept verbatim.
    pub fn validate(
        &mut self,
        group: &str,
        name: &str,
        attr: &str,
        remote: bool,
        default_port: bool,
        validations: &mut Validations,
    ) -> bool {
        self.valid = true;
        let raw = self.raw.trim().to_string();
        let parts: Vec<&str> = raw.split(':').collect();
        let (host, port_token) = match parts.as_slice() {
            [single] => {
                if default_port {
                    (single.to_string(), "22".to_string())
                } else {
                    ("0.0.0.0".to_string(), single.to_string())
                }
            }
            [host, port] => (host.to_string(), port.to_string()),
            _ => {
                validations.error(format!(
                    "{group} ({name}) {attr} ({raw}) is invalid: required syntax is <host>:<port>"
                ));
                self.valid = false;
                return false;
            }
        };

        let mut resolved_host = host.clone();
        match resolve_ipv4(&host) {
            Some(ip) => {
                if !remote {
                    resolved_host = ip.to_string();
                }
            }
            None if remote => {
                validations.warn(format!(
                    "{group} ({name}) {attr} host ({host}) cannot be resolved locally"
                ));
            }
            None => {
                validations.error(format!(
                    "{group} ({name}) {attr} host ({host}) cannot be resolved"
                ));
                self.valid = false;
            }
        }

        match port_token.parse::<u32>() {
            Ok(port) if (1..=65535).contains(&port) => {
                self.port = port as u16;
                self.resolved = format!("{resolved_host}:{port}");
            }
            Ok(_) => {
                validations.error(format!(
                    "{group} ({name}) {attr} port ({port_token}) range is invalid: must be between 1 and 65535"
                ));
                self.valid = false;
            }
            Err(err) => {
                validations.error(format!(
                    "{group} ({name}) {attr} port ({port_token}) {err}"
                ));
                self.valid = false;
            }
        }
        self.valid
    }
}

/// Resolve a host to its first IPv4 address via the system resolver.
fn resolve_ipv4(host: &str) -> Option<IpAddr> {
    // Port 0 keeps the resolver happy; only the IP side is wanted.
    (host, 0u16)
        .to_socket_addrs()
        .ok()?
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.resolved.is_empty() {
            write!(f, "{}", self.raw)
        } else {
            write!(f, "{}", self.resolved)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validated(raw: &str, remote: bool, default_port: bool) -> (Address, Validations, bool) {
        let mut address = Address::new(raw);
        let mut validations = Validations::default();
        let ok = address.validate("test", "unit", "address", remote, default_port, &mut validations);
        (address, validations, ok)
    }

    #[test]
    fn test_single_token_with_default_port() {
        let (address, _, ok) = validated("localhost", false, true);
        assert!(ok);
        assert_eq!(address.port(), 22);
        assert_eq!(address.to_string(), "127.0.0.1:22");
    }

    #[test]
    fn test_single_token_is_port_without_default() {
        let (address, _, ok) = validated("8080", false, false);
        assert!(ok);
        assert_eq!(address.port(), 8080);
        assert_eq!(address.to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_host_and_port() {
        let (address, _, ok) = validated("127.0.0.1:2222", false, false);
        assert!(ok);
        assert_eq!(address.port(), 2222);
        assert_eq!(address.to_string(), "127.0.0.1:2222");
    }

    #[test]
    fn test_too_many_parts_rejected() {
        let (address, validations, ok) = validated("a:b:c", false, false);
        assert!(!ok);
        assert!(!address.is_valid());
        assert!(validations.has_errors());
    }

    #[test]
    fn test_port_out_of_range() {
        let (_, validations, ok) = validated("127.0.0.1:65536", false, false);
        assert!(!ok);
        assert!(validations.has_errors());
        let (_, _, ok) = validated("127.0.0.1:65535", false, false);
        assert!(ok);
        let (_, validations, ok) = validated("127.0.0.1:0", false, false);
        assert!(!ok);
        assert!(validations.has_errors());
    }

    #[test]
    fn test_port_not_numeric() {
        let (_, validations, ok) = validated("127.0.0.1:ssh", false, false);
        assert!(!ok);
        assert!(validations.has_errors());
    }

    #[test]
    fn test_unresolvable_local_is_error() {
        let (_, validations, ok) = validated("no-such-host.invalid:22", false, false);
        assert!(!ok);
        assert!(validations.has_errors());
    }

    #[test]
    fn test_unresolvable_remote_is_warning() {
        let (address, validations, ok) = validated("no-such-host.invalid:22", true, false);
        assert!(ok);
        assert!(!validations.has_errors());
        assert!(validations.has_entries());
        // The name is preserved for the far end to resolve.
        assert_eq!(address.to_string(), "no-such-host.invalid:22");
    }

    #[test]
    fn test_blank() {
        assert!(Address::new("  ").is_blank());
        assert!(!Address::new("x").is_blank());
    }

    #[test]
    fn test_serde_preserves_input_form() {
        let address: Address = serde_yaml::from_str("localhost:8080").unwrap();
        assert_eq!(address.raw(), "localhost:8080");
        let out = serde_yaml::to_string(&address).unwrap();
        assert!(out.contains("localhost:8080"));
    }
}
