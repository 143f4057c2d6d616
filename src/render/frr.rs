use serde::Serialize;
use tera::{Context, Tera};

use crate::error::Result;
use crate::models::{Peer, ResolvedNode};

pub const DAEMONS: &str = "zebra=yes\nbgpd=yes\nstaticd=yes\nmgmtd=yes\n";

pub const VTYSH_CONF: &str = "service integrated-vtysh-config\n";

const FRR_CONF_TEMPLATE: &str = r#"frr defaults traditional
hostname {{ hostname }}
service integrated-vtysh-config
!
{%- for iface in interfaces %}
interface {{ iface.name }}
 description {{ iface.description }}
 ip address {{ iface.address }}
!
{%- endfor %}
router bgp {{ asn }}
 bgp router-id {{ router_id }}
 no bgp ebgp-requires-policy
{%- for n in neighbors %}
 neighbor {{ n.address }} remote-as {{ n.asn }}
 neighbor {{ n.address }} description {{ n.description }}
{%- endfor %}
 !
 address-family ipv4 unicast
  redistribute connected
{%- for n in neighbors %}
  neighbor {{ n.address }} activate
{%- endfor %}
 exit-address-family
!
line vty
!
"#;

/// Router configuration for one node, ready for formatting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterConfig {
    pub hostname: String,
    pub asn: u32,
    pub router_id: String,
    pub interfaces: Vec<InterfaceConfig>,
    pub neighbors: Vec<NeighborConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub description: String,
    /// Address in CIDR form, e.g. 10.254.0.1/30
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborConfig {
    pub address: String,
    pub asn: u32,
    pub description: String,
}

impl RouterConfig {
    pub fn from_node(resolved: &ResolvedNode) -> Self {
        let interfaces = resolved
            .interfaces
            .iter()
            .map(|iface| InterfaceConfig {
                name: iface.name.clone(),
                description: match &iface.peer {
                    Peer::Management => "management".to_string(),
                    Peer::Node(peer) => format!("to-{}", peer),
                },
                address: format!("{}/{}", iface.address, iface.subnet.prefix_len()),
            })
            .collect();
        let neighbors = resolved
            .neighbors
            .iter()
            .map(|n| NeighborConfig {
                address: n.address.to_string(),
                asn: n.asn,
                description: n.name.clone(),
            })
            .collect();

        Self {
            hostname: resolved.node.name.clone(),
            asn: resolved.node.asn,
            router_id: resolved.mgmt_address.to_string(),
            interfaces,
            neighbors,
        }
    }
}

/// Formats `RouterConfig` values into `frr.conf` text
pub struct FrrRenderer {
    tera: Tera,
}

impl FrrRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template("frr.conf", FRR_CONF_TEMPLATE)?;
        Ok(Self { tera })
    }

    pub fn render(&self, config: &RouterConfig) -> Result<String> {
        let context = Context::from_serialize(config)?;
        let mut out = self.tera.render("frr.conf", &context)?;
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }
}
