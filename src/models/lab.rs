use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};
use crate::utils;

/// LabSpec identifies one lab instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabSpec {
    pub name: String,
    pub spine_count: u32,
    pub leaf_count: u32,
}

impl LabSpec {
    /// Create a lab spec, rejecting malformed names. Counts are checked by the topology builder.
    pub fn new(name: impl Into<String>, spine_count: u32, leaf_count: u32) -> Result<Self> {
        let name = name.into();
        if !utils::is_valid_lab_name(&name) {
            return Err(LabError::InvalidLabName(name));
        }
        Ok(Self {
            name,
            spine_count,
            leaf_count,
        })
    }

    pub fn node_count(&self) -> u64 {
        self.spine_count as u64 + self.leaf_count as u64
    }

    pub fn fabric_link_count(&self) -> u64 {
        self.spine_count as u64 * self.leaf_count as u64
    }
}

/// Summary of a published lab, read back from its `.env` file
#[derive(Debug, Clone, Serialize)]
pub struct LabSummary {
    pub name: String,
    pub path: String,
    pub spine_count: u32,
    pub leaf_count: u32,
    pub mgmt_subnet: String,
}
