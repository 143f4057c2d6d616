use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils;

/// An IPv4 CIDR block. The network address is always aligned to the prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    network: u32,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Build a block from any address inside it; host bits are masked off.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, String> {
        if prefix_len > 32 {
            return Err(format!("prefix length {} is larger than 32", prefix_len));
        }
        Ok(Self {
            network: u32::from(addr) & utils::prefix_mask(prefix_len),
            prefix_len,
        })
    }

    pub(crate) fn from_network_int(network: u32, prefix_len: u8) -> Self {
        Self {
            network: network & utils::prefix_mask(prefix_len),
            prefix_len,
        }
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Inclusive (network_int, broadcast_int) range
    pub fn range(&self) -> (u32, u32) {
        (self.network, self.network | !utils::prefix_mask(self.prefix_len))
    }

    pub fn size(&self) -> u64 {
        utils::block_size(self.prefix_len)
    }

    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        utils::ranges_overlap(self.range(), other.range())
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let ip = u32::from(addr);
        let (start, end) = self.range();
        start <= ip && ip <= end
    }

    /// The address `offset` positions after the network address, if it is inside the block
    pub fn nth(&self, offset: u32) -> Option<Ipv4Addr> {
        if (offset as u64) < self.size() {
            Some(Ipv4Addr::from(self.network + offset))
        } else {
            None
        }
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", utils::format_cidr(self.network, self.prefix_len))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (network, _, prefix_len) = utils::parse_cidr(s)?;
        Ok(Self { network, prefix_len })
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}
