use crate::config::Config;
use crate::error::{LabError, Result};
use crate::models::*;

/// Highest usable 32-bit ASN (4294967295 is reserved)
const MAX_ASN: u64 = 4_294_967_294;

/// Size limits checked before anything is allocated
pub const MAX_NODES: u64 = 4096;
pub const MAX_FABRIC_LINKS: u64 = 1 << 16;

pub const MANAGEMENT_LINK: &str = "mgmt";

/// Expands a lab spec into a spine-leaf (Clos) graph with deterministic
/// naming and ASN assignment
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    spine_asn_base: u32,
    leaf_asn_base: u32,
}

impl TopologyBuilder {
    pub fn new(spine_asn_base: u32, leaf_asn_base: u32) -> Self {
        Self {
            spine_asn_base,
            leaf_asn_base,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.spine_asn_base, cfg.leaf_asn_base)
    }

    /// Build the full bipartite mesh: one fabric link per (spine, leaf) pair
    /// plus one management link spanning every node.
    pub fn build(&self, spec: &LabSpec) -> Result<Topology> {
        if spec.spine_count < 1 {
            return Err(LabError::invalid_shape(&spec.name, "spine_count must be at least 1"));
        }
        if spec.leaf_count < 1 {
            return Err(LabError::invalid_shape(&spec.name, "leaf_count must be at least 1"));
        }
        check_size(spec)?;
        self.check_asn_ranges(spec)?;

        let mut nodes = Vec::with_capacity(spec.node_count() as usize);
        for i in 1..=spec.spine_count {
            nodes.push(Node {
                role: Role::Spine,
                index: i,
                name: format!("spine{}", i),
                asn: self.spine_asn_base + i,
            });
        }
        for i in 1..=spec.leaf_count {
            nodes.push(Node {
                role: Role::Leaf,
                index: i,
                name: format!("leaf{}", i),
                asn: self.leaf_asn_base + i,
            });
        }

        let spines: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].role == Role::Spine).collect();
        let leaves: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].role == Role::Leaf).collect();

        let mut links = Vec::with_capacity(spines.len() * leaves.len() + 1);
        links.push(Link {
            name: MANAGEMENT_LINK.to_string(),
            kind: LinkKind::Management,
            participants: (0..nodes.len()).collect(),
        });
        for &s in &spines {
            for &l in &leaves {
                links.push(Link {
                    name: format!("{}-{}", nodes[s].name, nodes[l].name),
                    kind: LinkKind::Fabric,
                    participants: vec![s, l],
                });
            }
        }

        tracing::debug!(
            "Built topology for {}: {} nodes, {} links",
            spec.name,
            nodes.len(),
            links.len()
        );

        Ok(Topology {
            lab: spec.clone(),
            nodes,
            links,
        })
    }

    fn check_asn_ranges(&self, spec: &LabSpec) -> Result<()> {
        let spine = (
            self.spine_asn_base as u64 + 1,
            self.spine_asn_base as u64 + spec.spine_count as u64,
        );
        let leaf = (
            self.leaf_asn_base as u64 + 1,
            self.leaf_asn_base as u64 + spec.leaf_count as u64,
        );
        if spine.1 > MAX_ASN || leaf.1 > MAX_ASN {
            return Err(LabError::invalid_shape(
                &spec.name,
                "ASN range runs past 4294967294",
            ));
        }
        if spine.0 <= leaf.1 && leaf.0 <= spine.1 {
            return Err(LabError::invalid_shape(
                &spec.name,
                format!(
                    "spine ASNs {}-{} overlap leaf ASNs {}-{}",
                    spine.0, spine.1, leaf.0, leaf.1
                ),
            ));
        }
        Ok(())
    }
}

fn check_size(spec: &LabSpec) -> Result<()> {
    if spec.node_count() > MAX_NODES {
        return Err(LabError::invalid_shape(
            &spec.name,
            format!("{} nodes exceed the limit of {}", spec.node_count(), MAX_NODES),
        ));
    }
    if spec.fabric_link_count() > MAX_FABRIC_LINKS {
        return Err(LabError::invalid_shape(
            &spec.name,
            format!(
                "{} fabric links exceed the limit of {}",
                spec.fabric_link_count(),
                MAX_FABRIC_LINKS
            ),
        ));
    }
    Ok(())
}

/// Join a topology with its address plan: interfaces in link order
/// (eth0 = management) and one eBGP neighbor per fabric link.
pub fn resolve(topology: &Topology, plan: &AddressPlan) -> Vec<ResolvedNode> {
    topology
        .nodes
        .iter()
        .enumerate()
        .map(|(idx, node)| {
            let mut interfaces = Vec::new();
            let mut neighbors = Vec::new();
            let mut mgmt_address = None;

            for (link, addressing) in topology.links.iter().zip(&plan.links) {
                let Some(pos) = link.participants.iter().position(|&p| p == idx) else {
                    continue;
                };
                let address = addressing.addresses[pos];
                let peer = match link.kind {
                    LinkKind::Management => {
                        mgmt_address = Some(address);
                        Peer::Management
                    }
                    LinkKind::Fabric => {
                        let other = link.participants.iter().position(|&p| p != idx).unwrap_or(pos);
                        let peer_node = &topology.nodes[link.participants[other]];
                        neighbors.push(Neighbor {
                            name: peer_node.name.clone(),
                            address: addressing.addresses[other],
                            asn: peer_node.asn,
                        });
                        Peer::Node(peer_node.name.clone())
                    }
                };
                interfaces.push(Interface {
                    name: format!("eth{}", interfaces.len()),
                    link: link.name.clone(),
                    peer,
                    subnet: addressing.subnet,
                    address,
                });
            }

            ResolvedNode {
                node: node.clone(),
                mgmt_address: mgmt_address.unwrap_or(std::net::Ipv4Addr::UNSPECIFIED),
                interfaces,
                neighbors,
            }
        })
        .collect()
}
