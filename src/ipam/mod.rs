mod ledger;
mod planner;
pub mod probe;

pub use ledger::AddressPool;
pub use planner::AddressPlanner;

use crate::models::{Allocation, Ipv4Cidr};

/// A subnet the planner must avoid, with a human-readable owner for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InUse {
    pub subnet: Ipv4Cidr,
    pub owner: String,
}

impl InUse {
    pub fn new(subnet: Ipv4Cidr, owner: impl Into<String>) -> Self {
        Self {
            subnet,
            owner: owner.into(),
        }
    }
}

impl From<&Allocation> for InUse {
    fn from(a: &Allocation) -> Self {
        Self::new(a.subnet, format!("lab {} network {}", a.lab, a.network))
    }
}
