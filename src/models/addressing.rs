use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Ipv4Cidr;

/// Subnet and per-participant addresses for one link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkAddressing {
    pub link: String,
    pub subnet: Ipv4Cidr,
    /// Aligned with `Link::participants`
    pub addresses: Vec<Ipv4Addr>,
}

/// Address plan for one lab, aligned with `Topology::links`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressPlan {
    pub links: Vec<LinkAddressing>,
}

impl AddressPlan {
    pub fn management(&self) -> &LinkAddressing {
        &self.links[0]
    }

    pub fn subnets(&self) -> impl Iterator<Item = (&str, Ipv4Cidr)> {
        self.links.iter().map(|l| (l.link.as_str(), l.subnet))
    }
}

/// One subnet reservation in the shared address pool ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub lab: String,
    /// Link / compose network name within the lab
    pub network: String,
    pub subnet: Ipv4Cidr,
    pub allocated_at: DateTime<Utc>,
}
