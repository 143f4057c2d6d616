use crate::config::Config;
use crate::error::{LabError, Result};
use crate::models::*;
use crate::utils;

use super::InUse;

/// Carves management and fabric subnets for a lab out of two supernets.
/// Allocation is lowest-free-block-first, so an unchanged pool always yields
/// the same plan.
#[derive(Debug, Clone)]
pub struct AddressPlanner {
    mgmt_pool: Ipv4Cidr,
    mgmt_prefix_len: u8,
    fabric_pool: Ipv4Cidr,
    link_prefix_len: u8,
    mgmt_ip_offset: u32,
}

impl AddressPlanner {
    pub fn new(
        mgmt_pool: Ipv4Cidr,
        mgmt_prefix_len: u8,
        fabric_pool: Ipv4Cidr,
        link_prefix_len: u8,
        mgmt_ip_offset: u32,
    ) -> Result<Self> {
        if mgmt_ip_offset < 2 {
            // .1 is the bridge gateway
            return Err(LabError::InvalidConfig(format!(
                "MGMT_IP_OFFSET must be at least 2, got {}",
                mgmt_ip_offset
            )));
        }
        if link_prefix_len > 31 || link_prefix_len < fabric_pool.prefix_len() {
            return Err(LabError::InvalidConfig(format!(
                "cannot carve /{} links out of {}",
                link_prefix_len, fabric_pool
            )));
        }
        if mgmt_prefix_len > 30 || mgmt_prefix_len < mgmt_pool.prefix_len() {
            return Err(LabError::InvalidConfig(format!(
                "cannot carve /{} management subnets out of {}",
                mgmt_prefix_len, mgmt_pool
            )));
        }
        if mgmt_pool.overlaps(&fabric_pool) {
            return Err(LabError::InvalidConfig(format!(
                "management supernet {} overlaps fabric supernet {}",
                mgmt_pool, fabric_pool
            )));
        }
        Ok(Self {
            mgmt_pool,
            mgmt_prefix_len,
            fabric_pool,
            link_prefix_len,
            mgmt_ip_offset,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let planner = Self::new(
            cfg.mgmt_pool()?,
            cfg.mgmt_prefix_len,
            cfg.fabric_pool()?,
            cfg.link_prefix_len,
            cfg.mgmt_ip_offset,
        )?;
        if planner.links_use_gateway_address() {
            tracing::warn!(
                "/{} fabric links place an endpoint on the docker bridge gateway address; \
                 set LINK_PREFIX_LEN=29 for labs that run under docker compose",
                planner.link_prefix_len
            );
        }
        Ok(planner)
    }

    /// True when a link endpoint lands on the address docker reserves for
    /// the bridge gateway (the first host of the subnet).
    pub fn links_use_gateway_address(&self) -> bool {
        self.link_endpoint_offset() <= 1
    }

    /// Reject a lab whose nodes cannot all be addressed on its management
    /// subnet, before the topology is built.
    pub fn check_capacity(&self, spec: &LabSpec, mgmt_override: Option<Ipv4Cidr>) -> Result<()> {
        let (size, label) = match mgmt_override {
            Some(subnet) => (subnet.size(), subnet.to_string()),
            None => (
                utils::block_size(self.mgmt_prefix_len),
                format!("a /{}", self.mgmt_prefix_len),
            ),
        };
        self.ensure_mgmt_fits(&spec.name, &label, size, spec.node_count())
    }

    fn ensure_mgmt_fits(&self, lab: &str, label: &str, size: u64, node_count: u64) -> Result<()> {
        // last usable host is broadcast - 1
        let capacity = size.saturating_sub(1).saturating_sub(self.mgmt_ip_offset as u64);
        if node_count > capacity {
            return Err(LabError::invalid_shape(
                lab,
                format!(
                    "management subnet {} holds at most {} nodes from offset {}, topology has {}",
                    label, capacity, self.mgmt_ip_offset, node_count
                ),
            ));
        }
        Ok(())
    }

    /// Carve `count` blocks of `/prefix_len` out of `supernet`, disjoint from
    /// `in_use` and from each other. Nothing is kept on failure.
    pub fn allocate(
        lab: &str,
        supernet: Ipv4Cidr,
        prefix_len: u8,
        count: usize,
        in_use: &[InUse],
    ) -> Result<Vec<Ipv4Cidr>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let (parent_net, parent_bcast) = supernet.range();
        let mut taken: Vec<(u32, u32)> = in_use.iter().map(|u| u.subnet.range()).collect();
        let mut out = Vec::with_capacity(count);

        for _ in 0..count {
            match utils::next_available_prefix(parent_net, parent_bcast, prefix_len, &taken) {
                Some((net, bcast)) => {
                    taken.push((net, bcast));
                    out.push(Ipv4Cidr::from_network_int(net, prefix_len));
                }
                None => {
                    let before: Vec<(u32, u32)> = in_use.iter().map(|u| u.subnet.range()).collect();
                    let available =
                        utils::count_available_prefixes(parent_net, parent_bcast, prefix_len, &before);
                    return Err(LabError::AddressSpaceExhausted {
                        lab: lab.to_string(),
                        prefix_len,
                        supernet: supernet.to_string(),
                        requested: count,
                        available,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Produce the address plan for a topology, aligned with `topology.links`.
    pub fn plan(
        &self,
        topology: &Topology,
        in_use: &[InUse],
        mgmt_override: Option<Ipv4Cidr>,
    ) -> Result<AddressPlan> {
        let lab = topology.lab.name.as_str();

        // ── Management subnet ────────────────────────────────────
        let mgmt = match mgmt_override {
            Some(subnet) => {
                if let Some(conflict) = in_use.iter().find(|u| u.subnet.overlaps(&subnet)) {
                    return Err(LabError::SubnetInUse {
                        lab: lab.to_string(),
                        subnet: subnet.to_string(),
                        conflict: conflict.subnet.to_string(),
                        owner: conflict.owner.clone(),
                    });
                }
                subnet
            }
            None => Self::allocate(lab, self.mgmt_pool, self.mgmt_prefix_len, 1, in_use)?[0],
        };

        self.ensure_mgmt_fits(lab, &mgmt.to_string(), mgmt.size(), topology.nodes.len() as u64)?;
        let mgmt_addresses = topology
            .management_link()
            .participants
            .iter()
            .map(|&idx| mgmt.nth(self.mgmt_ip_offset + idx as u32))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| LabError::invalid_shape(lab, "management address out of range"))?;

        // ── Fabric links ─────────────────────────────────────────
        let fabric_count = topology.fabric_links().count();
        let mut taken = in_use.to_vec();
        taken.push(InUse::new(mgmt, format!("lab {} network mgmt", lab)));
        let link_subnets = Self::allocate(lab, self.fabric_pool, self.link_prefix_len, fabric_count, &taken)?;

        let first = self.link_endpoint_offset();
        let mut links = Vec::with_capacity(topology.links.len());
        links.push(LinkAddressing {
            link: topology.management_link().name.clone(),
            subnet: mgmt,
            addresses: mgmt_addresses,
        });
        for (link, subnet) in topology.fabric_links().zip(link_subnets) {
            let addresses = (0..link.participants.len() as u32)
                .map(|i| subnet.nth(first + i))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    LabError::InvalidConfig(format!(
                        "/{} links are too small for {} endpoints",
                        self.link_prefix_len,
                        link.participants.len()
                    ))
                })?;
            links.push(LinkAddressing {
                link: link.name.clone(),
                subnet,
                addresses,
            });
        }

        tracing::debug!(
            "Planned {}: mgmt {}, {} fabric /{} subnets",
            lab,
            mgmt,
            fabric_count,
            self.link_prefix_len
        );
        Ok(AddressPlan { links })
    }

    /// Offset of the first endpoint inside a link subnet. /31 uses both
    /// addresses, /30 its two hosts; larger blocks leave +1 to the bridge gateway.
    fn link_endpoint_offset(&self) -> u32 {
        match self.link_prefix_len {
            31 => 0,
            30 => 1,
            _ => 2,
        }
    }
}
