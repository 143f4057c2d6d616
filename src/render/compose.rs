use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{AddressPlan, LinkKind, ResolvedNode, Topology};

pub const LAB_LABEL: &str = "labforge.lab";
pub const ROLE_LABEL: &str = "labforge.role";

const ENTRYPOINT_SCRIPT: &str = "mkdir -p /var/run/frr\n\
chown -R frr:frr /etc/frr /var/run/frr || true\n\
/usr/lib/frr/docker-start\n\
tail -f /dev/null\n";

#[derive(Debug, Serialize, Deserialize)]
pub struct ComposeFile {
    pub name: String,
    pub services: BTreeMap<String, ComposeService>,
    pub networks: BTreeMap<String, ComposeNetwork>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub privileged: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub entrypoint: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub sysctls: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub networks: BTreeMap<String, NetworkAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub ipv4_address: String,
    pub interface_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComposeNetwork {
    pub driver: String,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub internal: bool,
    pub ipam: ComposeIpam,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComposeIpam {
    pub config: Vec<IpamPool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IpamPool {
    pub subnet: String,
}

impl ComposeFile {
    /// One service per node, one bridge network per link
    pub fn build(topology: &Topology, plan: &AddressPlan, nodes: &[ResolvedNode], image: &str) -> Self {
        let lab = &topology.lab.name;

        let mut services = BTreeMap::new();
        for resolved in nodes {
            let node = &resolved.node;
            let environment = BTreeMap::from([
                ("NODE_NAME".to_string(), node.name.clone()),
                ("NODE_ROLE".to_string(), node.role.to_string()),
                ("NODE_ASN".to_string(), node.asn.to_string()),
                ("NODE_MGMT_IP".to_string(), resolved.mgmt_address.to_string()),
            ]);
            let labels = BTreeMap::from([
                (LAB_LABEL.to_string(), lab.clone()),
                (ROLE_LABEL.to_string(), node.role.to_string()),
            ]);
            let networks = resolved
                .interfaces
                .iter()
                .map(|iface| {
                    (
                        iface.link.clone(),
                        NetworkAttachment {
                            ipv4_address: iface.address.to_string(),
                            interface_name: iface.name.clone(),
                        },
                    )
                })
                .collect();

            services.insert(
                node.name.clone(),
                ComposeService {
                    image: image.to_string(),
                    container_name: Some(format!("{}-{}", lab, node.name)),
                    hostname: Some(node.name.clone()),
                    privileged: true,
                    entrypoint: vec![
                        "/bin/sh".to_string(),
                        "-lc".to_string(),
                        ENTRYPOINT_SCRIPT.to_string(),
                    ],
                    sysctls: BTreeMap::from([("net.ipv4.ip_forward".to_string(), "1".to_string())]),
                    volumes: vec![format!("./frr/{}:/etc/frr", node.name)],
                    environment,
                    labels,
                    networks,
                },
            );
        }

        let mut networks = BTreeMap::new();
        for (link, addressing) in topology.links.iter().zip(&plan.links) {
            networks.insert(
                link.name.clone(),
                ComposeNetwork {
                    driver: "bridge".to_string(),
                    internal: link.kind == LinkKind::Fabric,
                    ipam: ComposeIpam {
                        config: vec![IpamPool {
                            subnet: addressing.subnet.to_string(),
                        }],
                    },
                    labels: BTreeMap::from([(LAB_LABEL.to_string(), lab.clone())]),
                },
            );
        }

        Self {
            name: lab.clone(),
            services,
            networks,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
