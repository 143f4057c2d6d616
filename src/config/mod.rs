use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LabError, Result};
use crate::models::Ipv4Cidr;

pub const DEFAULT_FRR_IMAGE: &str = "quay.io/frrouting/frr:9.1.0";

/// Config holds all generator configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub labs_dir: PathBuf,
    pub mgmt_supernet: String,
    pub mgmt_prefix_len: u8,
    pub fabric_supernet: String,
    pub link_prefix_len: u8,
    pub mgmt_ip_offset: u32,
    pub spine_asn_base: u32,
    pub leaf_asn_base: u32,
    pub frr_image: String,
    pub compose_command: String,
    pub release_on_down: bool,
    pub scan_docker_networks: bool,
    pub scan_host_interfaces: bool,
    pub pool_lock_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            labs_dir: PathBuf::from("labs"),
            mgmt_supernet: "172.31.0.0/16".to_string(),
            mgmt_prefix_len: 24,
            fabric_supernet: "10.254.0.0/16".to_string(),
            link_prefix_len: 30,
            mgmt_ip_offset: 11,
            spine_asn_base: 65000,
            leaf_asn_base: 65100,
            frr_image: DEFAULT_FRR_IMAGE.to_string(),
            compose_command: "docker compose".to_string(),
            release_on_down: true,
            scan_docker_networks: true,
            scan_host_interfaces: true,
            pool_lock_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        let d = Self::default();
        Self {
            labs_dir: PathBuf::from(get_env("LABS_DIR", "labs")),
            mgmt_supernet: get_env("MGMT_SUPERNET", &d.mgmt_supernet),
            mgmt_prefix_len: get_parsed("MGMT_PREFIX_LEN", d.mgmt_prefix_len),
            fabric_supernet: get_env("FABRIC_SUPERNET", &d.fabric_supernet),
            link_prefix_len: get_parsed("LINK_PREFIX_LEN", d.link_prefix_len),
            mgmt_ip_offset: get_parsed("MGMT_IP_OFFSET", d.mgmt_ip_offset),
            spine_asn_base: get_parsed("SPINE_ASN_BASE", d.spine_asn_base),
            leaf_asn_base: get_parsed("LEAF_ASN_BASE", d.leaf_asn_base),
            frr_image: get_env("FRR_IMAGE", DEFAULT_FRR_IMAGE),
            compose_command: get_env("COMPOSE_COMMAND", &d.compose_command),
            release_on_down: get_bool("RELEASE_ON_DOWN", d.release_on_down),
            scan_docker_networks: get_bool("SCAN_DOCKER_NETWORKS", d.scan_docker_networks),
            scan_host_interfaces: get_bool("SCAN_HOST_INTERFACES", d.scan_host_interfaces),
            pool_lock_timeout_secs: get_parsed("POOL_LOCK_TIMEOUT_SECS", d.pool_lock_timeout_secs),
        }
    }

    pub fn mgmt_pool(&self) -> Result<Ipv4Cidr> {
        parse_supernet("MGMT_SUPERNET", &self.mgmt_supernet, self.mgmt_prefix_len)
    }

    pub fn fabric_pool(&self) -> Result<Ipv4Cidr> {
        parse_supernet("FABRIC_SUPERNET", &self.fabric_supernet, self.link_prefix_len)
    }

    /// Directory holding the shared address pool ledger and its lock file
    pub fn pool_dir(&self) -> PathBuf {
        self.labs_dir.join(".ipam")
    }

    pub fn lab_dir(&self, lab: &str) -> PathBuf {
        self.labs_dir.join(lab)
    }

    pub fn pool_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_lock_timeout_secs)
    }

    /// Split the compose command ("docker compose") into program and leading args
    pub fn compose_argv(&self) -> Result<Vec<String>> {
        let argv: Vec<String> = self
            .compose_command
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if argv.is_empty() {
            return Err(LabError::InvalidConfig("COMPOSE_COMMAND is empty".to_string()));
        }
        Ok(argv)
    }
}

fn parse_supernet(key: &str, value: &str, carve_len: u8) -> Result<Ipv4Cidr> {
    let supernet: Ipv4Cidr = value
        .parse()
        .map_err(|e: String| LabError::invalid_subnet(value, format!("{}: {}", key, e)))?;
    if carve_len > 31 || carve_len < supernet.prefix_len() {
        return Err(LabError::InvalidConfig(format!(
            "cannot carve /{} blocks out of {} {}",
            carve_len, key, supernet
        )));
    }
    Ok(supernet)
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Numeric setting; a value that does not parse is reported and replaced by the default
fn get_parsed<T: FromStr + Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => parse_or_default(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or_default<T: FromStr + Display>(key: &str, raw: &str, default: T) -> T {
    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value, using {}", key, raw, default);
            default
        }
    }
}

fn get_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => parse_bool(&raw).unwrap_or_else(|| {
            tracing::warn!("Ignoring {}={:?}: expected true or false, using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
