use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use super::{Ipv4Cidr, LabSpec};

/// Clos topology role. Spines sort before leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Spine,
    Leaf,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Spine => "spine",
            Role::Leaf => "leaf",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single routable node in the fabric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub role: Role,
    /// 1-based within the role
    pub index: u32,
    pub name: String,
    pub asn: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Management,
    Fabric,
}

/// A network segment joining a fixed, ordered set of nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub kind: LinkKind,
    /// Indices into `Topology::nodes`
    pub participants: Vec<usize>,
}

/// Logical Clos graph for one lab: nodes in (role, index) order, management link first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub lab: LabSpec,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

impl Topology {
    pub fn management_link(&self) -> &Link {
        &self.links[0]
    }

    pub fn fabric_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|l| l.kind == LinkKind::Fabric)
    }
}

/// The other end of an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Peer {
    Management,
    Node(String),
}

/// One attachment point of a node, with its resolved address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    /// Container interface name: eth0 for management, eth1.. for fabric links
    pub name: String,
    /// Name of the link (and compose network) this interface attaches to
    pub link: String,
    pub peer: Peer,
    pub subnet: Ipv4Cidr,
    pub address: Ipv4Addr,
}

/// A BGP neighbor reachable over a fabric link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbor {
    pub name: String,
    pub address: Ipv4Addr,
    pub asn: u32,
}

/// A node together with everything resolved from the address plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    pub node: Node,
    pub mgmt_address: Ipv4Addr,
    pub interfaces: Vec<Interface>,
    pub neighbors: Vec<Neighbor>,
}
