/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Server configuration: listen address, Preview/connection defaults, and
//! read-idle timeout. Deserializable from YAML, mirroring the teacher
//! crate's YAML-first configuration style, without the daemon-wide
//! audit/auth/TLS registries that don't apply to a freestanding engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The IANA-assigned ICAP port. The sample source this engine was modeled
/// on defaulted to 1334; RFC 3507 and IANA specify 1344, and that's what
/// this crate defaults to (see DESIGN.md Open Questions).
pub const DEFAULT_PORT: u16 = 1344;

/// Default `Max-Connections` advertised in OPTIONS responses.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1000;

/// Default `Options-TTL`, in seconds, advertised in OPTIONS responses.
pub const DEFAULT_OPTIONS_TTL_SECS: u64 = 3600;

/// Server-wide configuration. Construct with [`ServerConfig::default`] or
/// deserialize from YAML via `serde_yaml::from_str`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind. Defaults to listening locally only.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Default `Preview:` size advertised in OPTIONS responses. `None`
    /// means the engine doesn't request a preview unless the client sends
    /// one unprompted (REQMOD/RESPMOD requests may still carry their own
    /// `Preview:` header regardless of this default).
    pub preview_default: Option<usize>,
    /// `Max-Connections` advertised in OPTIONS responses.
    pub max_connections: u32,
    /// `Options-TTL`, in seconds, advertised in OPTIONS responses.
    pub options_ttl_secs: u64,
    /// Idle timeout between reads on a connection (spec.md §5 Timeouts).
    /// Exceeding it closes the connection without a response.
    #[serde(with = "duration_secs")]
    pub read_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            preview_default: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            options_ttl_secs: DEFAULT_OPTIONS_TTL_SECS,
            read_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// The socket address this config binds to, as a string suitable for
    /// `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// (De)serialize a [`Duration`] as a whole number of seconds, matching the
/// plain-integer style the teacher's YAML configs use for durations rather
/// than pulling in `humantime-serde` for a single field.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(de)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_iana_assigned() {
        assert_eq!(ServerConfig::default().port, 1344);
    }

    #[test]
    fn listen_addr_combines_host_and_port() {
        let cfg = ServerConfig { host: "0.0.0.0".to_string(), port: 1344, ..Default::default() };
        assert_eq!(cfg.listen_addr(), "0.0.0.0:1344");
    }

    #[test]
    fn roundtrips_through_yaml() {
        let cfg = ServerConfig::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.port, cfg.port);
        assert_eq!(parsed.read_idle_timeout, cfg.read_idle_timeout);
    }

    #[test]
    fn yaml_partial_override_keeps_other_defaults() {
        let parsed: ServerConfig = serde_yaml::from_str("port: 2344\n").unwrap();
        assert_eq!(parsed.port, 2344);
        assert_eq!(parsed.host, "127.0.0.1");
    }
}
