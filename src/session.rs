//! Session configuration: the one piece of host-facing configuration
//! the engine cares about.
//!
//! The engine itself never reads a config file; this module only
//! describes the shape of a session and how to load one (TOML via
//! `toml`, env overrides via `config`).

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::oid::Oid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnmpVersion {
    V1,
    V2c,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityLevel {
    NoAuth,
    Auth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplicationKind {
    Generator,
    Responder,
    Notifier,
    Listener,
}

/// v3 parameters, broken out of `SessionConfig` since v1/v2c sessions
/// never populate them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct V3Params {
    pub user_name: String,
    pub context_name: String,
    #[serde(with = "hex_bytes", default)]
    pub engine_id: Vec<u8>,
    pub engine_boots: u32,
    pub engine_time: u32,
    pub auth_password: Option<String>,
    pub priv_password: Option<String>,
}

/// Per-application-instance configuration.
///
/// `enterprise_oid` is only meaningful for `Generator`/`Notifier`
/// (v1 trap enterprise field); `agent_tree` membership for `Responder`
/// is represented by the caller constructing an [`crate::agent::InstanceTree`]
/// alongside the session, not by a field here — the tree is owned
/// state, not configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub application: ApplicationKind,
    pub peer: IpAddr,
    pub port: u16,
    pub transport: Transport,
    pub version: SnmpVersion,
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default)]
    pub v3: V3Params,
    #[serde(default)]
    pub security_level: SecurityLevel,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, with = "oid_opt")]
    pub enterprise_oid: Option<Oid>,
}

impl Default for SecurityLevel {
    fn default() -> Self {
        SecurityLevel::NoAuth
    }
}

fn default_community() -> String {
    "public".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_retries() -> u32 {
    3
}

fn default_window() -> usize {
    1
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Per-attempt deadline for a synchronous request: `timeout / (retries+1)`.
    pub fn per_attempt_timeout(&self) -> Duration {
        self.timeout() / (self.retries + 1)
    }

    pub fn default_port_for(application: ApplicationKind) -> u16 {
        match application {
            ApplicationKind::Notifier | ApplicationKind::Listener => 162,
            ApplicationKind::Generator | ApplicationKind::Responder => 161,
        }
    }
}

/// Top-level engine configuration: process-wide knobs plus a list of
/// sessions to establish at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
    /// Directories scanned for `.mib`/`.txt` SMI modules at startup.
    #[serde(default)]
    pub mib_search_path: Vec<String>,
}

impl EngineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| Error::mib_parse(format!("invalid TOML: {e}")))?;
        Ok(config)
    }

    /// Overlays environment variables prefixed `SNMP_ENGINE_` on top of
    /// a base config.
    pub fn load_from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("SNMP_ENGINE").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod oid_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::oid::Oid;

    pub fn serialize<S: Serializer>(oid: &Option<Oid>, s: S) -> Result<S::Ok, S::Error> {
        match oid {
            Some(o) => s.serialize_str(&o.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Oid>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        match s {
            Some(s) => Oid::parse(&s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_attempt_timeout_splits_evenly() {
        let cfg = SessionConfig {
            application: ApplicationKind::Generator,
            peer: "127.0.0.1".parse().unwrap(),
            port: 161,
            transport: Transport::Udp,
            version: SnmpVersion::V2c,
            community: "public".into(),
            v3: V3Params::default(),
            security_level: SecurityLevel::NoAuth,
            timeout_ms: 3000,
            retries: 2,
            window: 1,
            delay_ms: 0,
            tags: vec![],
            enterprise_oid: None,
        };
        assert_eq!(cfg.per_attempt_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn default_ports_match_spec() {
        assert_eq!(SessionConfig::default_port_for(ApplicationKind::Generator), 161);
        assert_eq!(SessionConfig::default_port_for(ApplicationKind::Responder), 161);
        assert_eq!(SessionConfig::default_port_for(ApplicationKind::Notifier), 162);
        assert_eq!(SessionConfig::default_port_for(ApplicationKind::Listener), 162);
    }

    #[test]
    fn load_from_file_parses_toml() {
        let toml_src = r#"
mib_search_path = ["/usr/share/snmp/mibs"]

[[sessions]]
application = "generator"
peer = "192.0.2.1"
port = 161
transport = "udp"
version = "v2c"
community = "public"
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, toml_src).unwrap();
        let cfg = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(cfg.sessions.len(), 1);
        assert_eq!(cfg.sessions[0].port, 161);
        assert_eq!(cfg.mib_search_path, vec!["/usr/share/snmp/mibs".to_string()]);
    }
}
