use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex_lite::Regex;

/// Netmask for a prefix length, as a host-order integer
pub fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len as u32)
    }
}

/// Number of addresses in a block of the given prefix length
pub fn block_size(prefix_len: u8) -> u64 {
    1u64 << (32 - prefix_len as u32)
}

/// Parse a CIDR string into (network_int, broadcast_int, prefix_len).
/// Host bits are masked off, so "10.0.0.7/24" parses as 10.0.0.0/24.
pub fn parse_cidr(cidr: &str) -> Result<(u32, u32, u8), String> {
    let cidr = cidr.trim();
    let (addr, len) = cidr
        .split_once('/')
        .ok_or_else(|| format!("missing prefix length in {:?}", cidr))?;
    let ip: Ipv4Addr = addr
        .parse()
        .map_err(|_| format!("invalid IPv4 address {:?}", addr))?;
    let prefix_len: u8 = len
        .parse()
        .map_err(|_| format!("invalid prefix length {:?}", len))?;
    if prefix_len > 32 {
        return Err(format!("prefix length {} is larger than 32", prefix_len));
    }
    let mask = prefix_mask(prefix_len);
    let network = u32::from(ip) & mask;
    Ok((network, network | !mask, prefix_len))
}

/// Format a network integer and prefix length as "a.b.c.d/len"
pub fn format_cidr(network: u32, prefix_len: u8) -> String {
    format!("{}/{}", Ipv4Addr::from(network), prefix_len)
}

/// True if the two inclusive [start, end] ranges share at least one address
pub fn ranges_overlap(a: (u32, u32), b: (u32, u32)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

fn align_up(value: u64, size: u64) -> u64 {
    value.div_ceil(size) * size
}

/// Find the lowest /desired_len block inside [parent_net, parent_bcast] that does not
/// intersect any allocated range. Blocks are aligned to their own size.
/// Returns (network, broadcast) of the block, or None if the parent is full.
pub fn next_available_prefix(
    parent_net: u32,
    parent_bcast: u32,
    desired_len: u8,
    allocated: &[(u32, u32)],
) -> Option<(u32, u32)> {
    let size = block_size(desired_len);
    let end = parent_bcast as u64;
    let mut candidate = align_up(parent_net as u64, size);

    while candidate + size - 1 <= end {
        let cand_end = candidate + size - 1;
        let blocking = allocated
            .iter()
            .filter(|(s, e)| (*s as u64) <= cand_end && (*e as u64) >= candidate)
            .map(|(_, e)| *e as u64)
            .max();
        match blocking {
            Some(e) => candidate = align_up(e + 1, size),
            None => return Some((candidate as u32, cand_end as u32)),
        }
    }
    None
}

/// Count the free /desired_len blocks inside [parent_net, parent_bcast]
pub fn count_available_prefixes(
    parent_net: u32,
    parent_bcast: u32,
    desired_len: u8,
    allocated: &[(u32, u32)],
) -> usize {
    let size = block_size(desired_len);
    let end = parent_bcast as u64;
    let mut candidate = align_up(parent_net as u64, size);
    let mut free = 0;

    while candidate + size - 1 <= end {
        let cand_end = candidate + size - 1;
        let blocking = allocated
            .iter()
            .filter(|(s, e)| (*s as u64) <= cand_end && (*e as u64) >= candidate)
            .map(|(_, e)| *e as u64)
            .max();
        match blocking {
            Some(e) => candidate = align_up(e + 1, size),
            None => {
                free += 1;
                candidate += size;
            }
        }
    }
    free
}

/// Validate a lab name.
/// Lab names become compose project names and container prefixes, so only
/// lowercase alphanumerics, '-' and '_' are allowed.
pub fn is_valid_lab_name(name: &str) -> bool {
    lab_name_regex().is_some_and(|re| re.is_match(name))
}

fn lab_name_regex() -> Option<&'static Regex> {
    static LAB_NAME_RE: OnceLock<Option<Regex>> = OnceLock::new();
    LAB_NAME_RE
        .get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,31}$").ok())
        .as_ref()
}

/// Turn a node or link name into an environment variable stem ("spine1-leaf2" -> "SPINE1_LEAF2")
pub fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> u32 {
        u32::from(s.parse::<Ipv4Addr>().unwrap())
    }

    #[test]
    fn test_parse_cidr() {
        assert_eq!(
            parse_cidr("172.31.1.0/24").unwrap(),
            (ip("172.31.1.0"), ip("172.31.1.255"), 24)
        );
        assert_eq!(
            parse_cidr("10.0.0.7/30").unwrap(),
            (ip("10.0.0.4"), ip("10.0.0.7"), 30)
        );
        assert_eq!(parse_cidr("0.0.0.0/0").unwrap(), (0, u32::MAX, 0));
        assert!(parse_cidr("10.0.0.0").is_err());
        assert!(parse_cidr("10.0.0/24").is_err());
        assert!(parse_cidr("10.0.0.0/33").is_err());
        assert!(parse_cidr("10.0.0.0/x").is_err());
    }

    #[test]
    fn test_format_cidr() {
        assert_eq!(format_cidr(ip("10.254.0.4"), 30), "10.254.0.4/30");
    }

    #[test]
    fn test_ranges_overlap() {
        assert!(ranges_overlap((10, 20), (20, 30)));
        assert!(ranges_overlap((10, 20), (0, 100)));
        assert!(!ranges_overlap((10, 20), (21, 30)));
    }

    #[test]
    fn test_next_available_prefix_empty_parent() {
        let (net, bcast, _) = parse_cidr("10.254.0.0/16").unwrap();
        let got = next_available_prefix(net, bcast, 30, &[]);
        assert_eq!(got, Some((ip("10.254.0.0"), ip("10.254.0.3"))));
    }

    #[test]
    fn test_next_available_prefix_skips_allocated() {
        let (net, bcast, _) = parse_cidr("10.254.0.0/16").unwrap();
        let allocated = vec![
            (ip("10.254.0.0"), ip("10.254.0.3")),
            (ip("10.254.0.4"), ip("10.254.0.7")),
        ];
        let got = next_available_prefix(net, bcast, 30, &allocated);
        assert_eq!(got, Some((ip("10.254.0.8"), ip("10.254.0.11"))));
    }

    #[test]
    fn test_next_available_prefix_realigns_after_larger_block() {
        let (net, bcast, _) = parse_cidr("172.31.0.0/16").unwrap();
        // a stray /30 inside the first /24 disqualifies the whole /24
        let allocated = vec![(ip("172.31.0.8"), ip("172.31.0.11"))];
        let got = next_available_prefix(net, bcast, 24, &allocated);
        assert_eq!(got, Some((ip("172.31.1.0"), ip("172.31.1.255"))));
    }

    #[test]
    fn test_next_available_prefix_full_parent() {
        let (net, bcast, _) = parse_cidr("10.0.0.0/29").unwrap();
        let allocated = vec![(ip("10.0.0.0"), ip("10.0.0.3")), (ip("10.0.0.4"), ip("10.0.0.7"))];
        assert_eq!(next_available_prefix(net, bcast, 30, &allocated), None);
        // a block larger than the parent never fits
        assert_eq!(next_available_prefix(net, bcast, 24, &[]), None);
    }

    #[test]
    fn test_count_available_prefixes() {
        let (net, bcast, _) = parse_cidr("10.0.0.0/28").unwrap();
        assert_eq!(count_available_prefixes(net, bcast, 30, &[]), 4);
        let allocated = vec![(ip("10.0.0.4"), ip("10.0.0.7"))];
        assert_eq!(count_available_prefixes(net, bcast, 30, &allocated), 3);
        let covering = vec![(ip("10.0.0.0"), ip("10.0.0.255"))];
        assert_eq!(count_available_prefixes(net, bcast, 30, &covering), 0);
    }

    #[test]
    fn test_is_valid_lab_name() {
        assert!(is_valid_lab_name("lab1"));
        assert!(is_valid_lab_name("dc1-fabric_a"));
        assert!(!is_valid_lab_name(""));
        assert!(!is_valid_lab_name("Lab1"));
        assert!(!is_valid_lab_name("-lab"));
        assert!(!is_valid_lab_name("lab 1"));
        assert!(!is_valid_lab_name("../etc"));
        assert!(!is_valid_lab_name(&"a".repeat(33)));
    }

    #[test]
    fn test_lab_name_regex_is_compiled_once() {
        let first = lab_name_regex().unwrap();
        let second = lab_name_regex().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("spine1-leaf2"), "SPINE1_LEAF2");
        assert_eq!(env_key("leaf10"), "LEAF10");
    }
}
