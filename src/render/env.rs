use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{LabError, Result};
use crate::models::{AddressPlan, LinkKind, Topology};
use crate::utils::env_key;

pub const ENV_FILE: &str = ".env";
pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const FRR_DIR: &str = "./frr";

/// Render the `.env` companion file. Key order is fixed so output is stable.
pub fn render_env(topology: &Topology, plan: &AddressPlan) -> String {
    let lab = &topology.lab;
    let mut lines = vec![
        format!("COMPOSE_PROJECT_NAME={}", lab.name),
        format!("LAB_NAME={}", lab.name),
        format!("COMPOSE_FILE={}", COMPOSE_FILE),
        format!("FRR_DIR={}", FRR_DIR),
        format!("SPINE_COUNT={}", lab.spine_count),
        format!("LEAF_COUNT={}", lab.leaf_count),
        format!("MGMT_SUBNET={}", plan.management().subnet),
    ];

    for (link, addressing) in topology.links.iter().zip(&plan.links) {
        if link.kind == LinkKind::Fabric {
            lines.push(format!("LINK_{}_SUBNET={}", env_key(&link.name), addressing.subnet));
        }
    }

    let mgmt = plan.management();
    for (idx, node) in topology.nodes.iter().enumerate() {
        let key = env_key(&node.name);
        lines.push(format!("{}_IP={}", key, mgmt.addresses[idx]));
        lines.push(format!("{}_ASN={}", key, node.asn));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Values read back from a published lab's `.env`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabEnv {
    vars: BTreeMap<String, String>,
}

impl LabEnv {
    pub fn read(path: &Path) -> Result<Self> {
        let iter = dotenvy::from_path_iter(path).map_err(|e| env_error(path, e))?;
        let mut vars = BTreeMap::new();
        for item in iter {
            let (k, v) = item.map_err(|e| env_error(path, e))?;
            vars.insert(k, v);
        }
        Ok(Self { vars })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| LabError::Serialization(format!("{} missing from {}", key, ENV_FILE)))
    }

    pub fn project_name(&self) -> Result<&str> {
        self.require("COMPOSE_PROJECT_NAME")
    }

    pub fn compose_file(&self) -> &str {
        self.get("COMPOSE_FILE").unwrap_or(COMPOSE_FILE)
    }

    pub fn spine_count(&self) -> u32 {
        self.get("SPINE_COUNT").and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn leaf_count(&self) -> u32 {
        self.get("LEAF_COUNT").and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn mgmt_subnet(&self) -> &str {
        self.get("MGMT_SUBNET").unwrap_or("")
    }
}

fn env_error(path: &Path, e: dotenvy::Error) -> LabError {
    match e {
        dotenvy::Error::Io(io) => LabError::Io(io),
        other => LabError::Serialization(format!("{}: {}", path.display(), other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipam::AddressPlanner;
    use crate::models::LabSpec;
    use crate::topology::TopologyBuilder;

    fn rendered() -> String {
        let topology = TopologyBuilder::new(65000, 65100)
            .build(&LabSpec::new("lab1", 1, 2).unwrap())
            .unwrap();
        let plan = AddressPlanner::new(
            "172.31.0.0/16".parse().unwrap(),
            24,
            "10.254.0.0/16".parse().unwrap(),
            30,
            11,
        )
        .unwrap()
        .plan(&topology, &[], None)
        .unwrap();
        render_env(&topology, &plan)
    }

    #[test]
    fn test_render_env() {
        let expected = "\
COMPOSE_PROJECT_NAME=lab1
LAB_NAME=lab1
COMPOSE_FILE=docker-compose.yml
FRR_DIR=./frr
SPINE_COUNT=1
LEAF_COUNT=2
MGMT_SUBNET=172.31.0.0/24
LINK_SPINE1_LEAF1_SUBNET=10.254.0.0/30
LINK_SPINE1_LEAF2_SUBNET=10.254.0.4/30
SPINE1_IP=172.31.0.11
SPINE1_ASN=65001
LEAF1_IP=172.31.0.12
LEAF1_ASN=65101
LEAF2_IP=172.31.0.13
LEAF2_ASN=65102
";
        assert_eq!(rendered(), expected);
    }

    #[test]
    fn test_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ENV_FILE);
        std::fs::write(&path, rendered()).unwrap();

        let env = LabEnv::read(&path).unwrap();
        assert_eq!(env.project_name().unwrap(), "lab1");
        assert_eq!(env.compose_file(), "docker-compose.yml");
        assert_eq!((env.spine_count(), env.leaf_count()), (1, 2));
        assert_eq!(env.mgmt_subnet(), "172.31.0.0/24");
        assert_eq!(env.get("LEAF2_ASN"), Some("65102"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LabEnv::read(&dir.path().join(ENV_FILE)).unwrap_err();
        assert!(matches!(err, LabError::Io(_)));
    }
}
