use std::net::IpAddr;
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

/// Parse a CIDR string leniently: host bits are truncated to the canonical
/// network address, and a bare address is treated as a host network.
/// e.g. "10.0.0.1/24" -> 10.0.0.0/24, "10.0.0.1" -> 10.0.0.1/32
pub fn parse_cidr(s: &str) -> Result<IpNet, String> {
    if let Ok(net) = IpNet::from_str(s.trim()) {
        return Ok(net.trunc());
    }
    match IpAddr::from_str(s.trim()) {
        Ok(IpAddr::V4(addr)) => Ok(IpNet::V4(
            Ipv4Net::new(addr, 32).map_err(|e| e.to_string())?,
        )),
        Ok(IpAddr::V6(addr)) => Ok(IpNet::V6(
            Ipv6Net::new(addr, 128).map_err(|e| e.to_string())?,
        )),
        Err(_) => Err(format!("Invalid CIDR format '{}'", s)),
    }
}

/// Canonical string form used for storage and the (vrf_id, cidr) unique key
pub fn canonical(net: &IpNet) -> String {
    net.trunc().to_string()
}

pub fn ip_version(net: &IpNet) -> u8 {
    match net {
        IpNet::V4(_) => 4,
        IpNet::V6(_) => 6,
    }
}

/// Number of address bits for the network's family (32 or 128)
pub fn max_prefix_len(net: &IpNet) -> u8 {
    match net {
        IpNet::V4(_) => 32,
        IpNet::V6(_) => 128,
    }
}

pub fn same_family(a: &IpNet, b: &IpNet) -> bool {
    matches!(
        (a, b),
        (IpNet::V4(_), IpNet::V4(_)) | (IpNet::V6(_), IpNet::V6(_))
    )
}

/// True if `child` is strictly contained in `parent` (same family, proper subset)
pub fn is_strict_subnet(child: &IpNet, parent: &IpNet) -> bool {
    same_family(child, parent) && child != parent && parent.contains(child)
}

/// True if the two networks share any address. Cross-family networks never overlap.
pub fn overlaps(a: &IpNet, b: &IpNet) -> bool {
    same_family(a, b) && (a.contains(b) || b.contains(a))
}

/// Fixed-width lowercase hex rendering of the network address: 8 digits for
/// IPv4, 32 for IPv6. Lexicographic order on keys of the same family equals
/// numeric address order, so SQL `ORDER BY network_key` walks the address space.
pub fn network_key(net: &IpNet) -> String {
    match net {
        IpNet::V4(v4) => format!("{:08x}", u32::from(v4.network())),
        IpNet::V6(v6) => format!("{:032x}", u128::from(v6.network())),
    }
}

/// Dashed CIDR form for identifier derivation. IPv4 replaces dots and the
/// slash with hyphens; IPv6 is fully expanded first so compressed and
/// uncompressed spellings of one network yield one identifier.
/// e.g. "10.0.0.0/16" -> "10-0-0-0-16", "2001:db8::/64" ->
/// "2001-0db8-0000-0000-0000-0000-0000-0000-64"
pub fn cidr_for_id(net: &IpNet) -> String {
    match net.trunc() {
        IpNet::V4(v4) => format!("{}", v4).replace('/', "-").replace('.', "-"),
        IpNet::V6(v6) => {
            let segments = v6.network().segments();
            let expanded: Vec<String> =
                segments.iter().map(|s| format!("{:04x}", s)).collect();
            format!("{}-{}", expanded.join("-"), v6.prefix_len())
        }
    }
}

/// Lazy enumeration of all /new_len subnets inside `parent`, in ascending
/// address order. Nothing is materialized up front, so IPv6 parents with an
/// astronomically large subnet count iterate in constant memory.
pub struct SubnetIter {
    v4: bool,
    current: u128,
    step: u128,
    remaining: u128,
    new_len: u8,
}

impl SubnetIter {
    pub fn new(parent: &IpNet, new_len: u8) -> Result<Self, String> {
        let bits = max_prefix_len(parent);
        if new_len < parent.prefix_len() {
            return Err(format!(
                "Subnet size /{} is larger than parent {}",
                new_len, parent
            ));
        }
        if new_len > bits {
            return Err(format!(
                "Subnet size /{} exceeds the {}-bit address space",
                new_len, bits
            ));
        }
        let diff = new_len - parent.prefix_len();
        let remaining = if diff >= 128 { u128::MAX } else { 1u128 << diff };
        let step = 1u128
            .checked_shl((bits - new_len) as u32)
            .unwrap_or(0);
        let current = match parent {
            IpNet::V4(v4) => u32::from(v4.network()) as u128,
            IpNet::V6(v6) => u128::from(v6.network()),
        };
        Ok(Self {
            v4: matches!(parent, IpNet::V4(_)),
            current,
            step,
            remaining,
            new_len,
        })
    }
}

impl Iterator for SubnetIter {
    type Item = IpNet;

    fn next(&mut self) -> Option<IpNet> {
        if self.remaining == 0 {
            return None;
        }
        let net = if self.v4 {
            let addr = std::net::Ipv4Addr::from(self.current as u32);
            IpNet::V4(Ipv4Net::new(addr, self.new_len).ok()?)
        } else {
            let addr = std::net::Ipv6Addr::from(self.current);
            IpNet::V6(Ipv6Net::new(addr, self.new_len).ok()?)
        };
        self.remaining -= 1;
        self.current = self.current.wrapping_add(self.step);
        Some(net)
    }
}
