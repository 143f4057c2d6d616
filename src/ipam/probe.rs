use std::collections::HashMap;

use anyhow::Context;
use bollard::network::ListNetworksOptions;

use crate::config::Config;
use crate::models::Ipv4Cidr;

use super::InUse;

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// IPv4 subnets of docker networks, skipping those owned by compose project `lab`
pub async fn docker_subnets(lab: &str) -> anyhow::Result<Vec<InUse>> {
    let docker = bollard::Docker::connect_with_socket_defaults()
        .context("failed to connect to docker socket")?;
    let networks = docker
        .list_networks(None::<ListNetworksOptions<String>>)
        .await
        .context("failed to list docker networks")?;

    let mut found = Vec::new();
    for net in networks {
        let labels: HashMap<String, String> = net.labels.unwrap_or_default();
        if labels.get(COMPOSE_PROJECT_LABEL).map(String::as_str) == Some(lab) {
            continue;
        }
        let name = net.name.unwrap_or_default();
        let configs = net.ipam.and_then(|i| i.config).unwrap_or_default();
        for subnet in configs.into_iter().filter_map(|c| c.subnet) {
            // IPv6 subnets fail to parse and are skipped
            if let Ok(cidr) = subnet.parse::<Ipv4Cidr>() {
                found.push(InUse::new(cidr, format!("docker network {}", name)));
            }
        }
    }
    Ok(found)
}

/// IPv4 subnets configured on non-loopback host interfaces
pub fn host_interface_subnets() -> anyhow::Result<Vec<InUse>> {
    let ifaces = if_addrs::get_if_addrs().context("failed to enumerate host interfaces")?;
    let mut found = Vec::new();
    for iface in ifaces {
        if iface.is_loopback() {
            continue;
        }
        if let if_addrs::IfAddr::V4(v4) = &iface.addr {
            let prefix_len = u32::from(v4.netmask).count_ones() as u8;
            if let Ok(cidr) = Ipv4Cidr::new(v4.ip, prefix_len) {
                found.push(InUse::new(cidr, format!("host interface {}", iface.name)));
            }
        }
    }
    Ok(found)
}

/// Run every probe enabled in `cfg`, logging (not propagating) failures.
pub async fn discover(cfg: &Config, lab: &str) -> Vec<InUse> {
    let mut found = Vec::new();

    if cfg.scan_docker_networks {
        match docker_subnets(lab).await {
            Ok(subnets) => {
                tracing::debug!("Docker probe found {} subnets", subnets.len());
                found.extend(subnets);
            }
            Err(e) => tracing::warn!("Skipping docker network probe: {:#}", e),
        }
    }

    if cfg.scan_host_interfaces {
        match host_interface_subnets() {
            Ok(subnets) => {
                tracing::debug!("Interface probe found {} subnets", subnets.len());
                found.extend(subnets);
            }
            Err(e) => tracing::warn!("Skipping host interface probe: {:#}", e),
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_probes_find_nothing() {
        let cfg = Config {
            scan_docker_networks: false,
            scan_host_interfaces: false,
            ..Config::default()
        };
        assert!(discover(&cfg, "lab1").await.is_empty());
    }

    #[test]
    fn test_host_probe_skips_loopback() {
        // interface enumeration may be unavailable in sandboxes
        if let Ok(found) = host_interface_subnets() {
            assert!(found.iter().all(|u| !u.subnet.contains("127.0.0.1".parse().unwrap())));
        }
    }
}
