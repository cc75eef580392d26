//! Node-wide tunables, loaded from an optional TOML file and otherwise
//! defaulted. This is the §9 "Global mutability of tunables" resolution:
//! every threshold the registry/transports/sender consult is a field here,
//! passed into [`crate::manager::Manager::start`] rather than a global.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::beacon::CipherSuite;

fn default_tcp_peer_unavailability_ms() -> u64 {
    30_000
}

fn default_non_tcp_peer_unavailability_ms() -> u64 {
    15_000
}

fn default_ssdp_advertisement_interval_ms() -> u64 {
    500
}

fn default_update_windows_foreground_ms() -> u64 {
    10_000
}

fn default_beacon_milliseconds_to_expire() -> u64 {
    4 * 60 * 60 * 1000
}

fn default_base_db_path() -> String {
    "/db".to_string()
}

fn default_local_seq_point_prefix() -> String {
    "localseq:".to_string()
}

fn default_discovery_port() -> u16 {
    52731
}

fn default_http_port() -> u16 {
    8080
}

fn default_device_name() -> String {
    "thali-node".to_string()
}

/// Which mobile platform this node emulates for `NativeTransport` address
/// semantics (§3 RawPeerEvent: Android carries a loopback port, iOS opens
/// connections on demand and carries neither host nor port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativePlatform {
    Android,
    Ios,
}

impl Default for NativePlatform {
    fn default() -> Self {
        NativePlatform::Android
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_tcp_peer_unavailability_ms")]
    pub tcp_peer_unavailability_ms: u64,

    #[serde(default = "default_non_tcp_peer_unavailability_ms")]
    pub non_tcp_peer_unavailability_ms: u64,

    #[serde(default = "default_ssdp_advertisement_interval_ms")]
    pub ssdp_advertisement_interval_ms: u64,

    #[serde(default = "default_update_windows_foreground_ms")]
    pub update_windows_foreground_ms: u64,

    #[serde(default = "default_beacon_milliseconds_to_expire")]
    pub beacon_milliseconds_to_expire: u64,

    #[serde(default = "default_base_db_path")]
    pub base_db_path: String,

    #[serde(default = "default_local_seq_point_prefix")]
    pub local_seq_point_prefix: String,

    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// Port the admission-gated replication/notification router listens
    /// on. A real TLS-PSK terminator sits in front of this in production;
    /// `thalid` binds it in plain HTTP for local development.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default)]
    pub native_platform: NativePlatform,

    #[serde(default)]
    pub beacon_cipher: CipherSuite,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp_peer_unavailability_ms: default_tcp_peer_unavailability_ms(),
            non_tcp_peer_unavailability_ms: default_non_tcp_peer_unavailability_ms(),
            ssdp_advertisement_interval_ms: default_ssdp_advertisement_interval_ms(),
            update_windows_foreground_ms: default_update_windows_foreground_ms(),
            beacon_milliseconds_to_expire: default_beacon_milliseconds_to_expire(),
            base_db_path: default_base_db_path(),
            local_seq_point_prefix: default_local_seq_point_prefix(),
            discovery_port: default_discovery_port(),
            http_port: default_http_port(),
            device_name: default_device_name(),
            native_platform: NativePlatform::default(),
            beacon_cipher: CipherSuite::default(),
        }
    }
}

impl Config {
    /// Read `path` as TOML; if it does not exist, write a commented template
    /// (mirroring the teacher's `CLI/src/config.rs::Config::load` behavior)
    /// and return the defaults rather than failing the caller outright.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let template = "# thali node configuration\n\
                 # tcp_peer_unavailability_ms = 30000\n\
                 # non_tcp_peer_unavailability_ms = 15000\n\
                 # ssdp_advertisement_interval_ms = 500\n\
                 # update_windows_foreground_ms = 10000\n\
                 # beacon_milliseconds_to_expire = 14400000\n\
                 # base_db_path = \"/db\"\n\
                 # local_seq_point_prefix = \"localseq:\"\n\
                 # discovery_port = 52731\n\
                 # http_port = 8080\n\
                 # device_name = \"thali-node\"\n\
                 # native_platform = \"android\"  # or \"ios\"\n\
                 # beacon_cipher = \"ctr\"  # or \"gcm\"\n";
            std::fs::write(path, template)?;
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn tcp_peer_unavailability(&self) -> Duration {
        Duration::from_millis(self.tcp_peer_unavailability_ms)
    }

    pub fn non_tcp_peer_unavailability(&self) -> Duration {
        Duration::from_millis(self.non_tcp_peer_unavailability_ms)
    }

    pub fn ssdp_advertisement_interval(&self) -> Duration {
        Duration::from_millis(self.ssdp_advertisement_interval_ms)
    }

    pub fn update_windows_foreground(&self) -> Duration {
        Duration::from_millis(self.update_windows_foreground_ms)
    }

    pub fn beacon_expiration(&self) -> Duration {
        Duration::from_millis(self.beacon_milliseconds_to_expire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.tcp_peer_unavailability().as_millis(), 30_000);
        assert_eq!(cfg.native_platform, NativePlatform::Android);
    }

    #[test]
    fn load_writes_template_when_missing() {
        let dir = std::env::temp_dir().join(format!("thali-cfg-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("thali.toml");
        let _ = std::fs::remove_file(&path);
        let cfg = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.discovery_port, default_discovery_port());
        std::fs::remove_dir_all(&dir).ok();
    }
}
