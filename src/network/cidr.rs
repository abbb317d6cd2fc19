//! IPv4 CIDR arithmetic for subnet allocation

use std::net::Ipv4Addr;

use crate::{Error, Result};

/// Smallest subnet the provider accepts
const MAX_SUBNET_PREFIX: u8 = 28;

/// Largest address space the provider accepts for a VPC
const MIN_VPC_PREFIX: u8 = 16;

/// An IPv4 network in CIDR notation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Parse `a.b.c.d/p`; host bits must be zero and the prefix must fit a VPC
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::validation(format!("CIDR '{s}' is missing a prefix length")))?;
        let network: Ipv4Addr = addr
            .parse()
            .map_err(|e| Error::validation(format!("CIDR '{s}' has an invalid address: {e}")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| Error::validation(format!("CIDR '{s}' has an invalid prefix: {e}")))?;
        if !(MIN_VPC_PREFIX..=MAX_SUBNET_PREFIX).contains(&prefix) {
            return Err(Error::validation(format!(
                "CIDR '{s}' prefix must be between /{MIN_VPC_PREFIX} and /{MAX_SUBNET_PREFIX}"
            )));
        }
        let cidr = Self { network, prefix };
        if u32::from(network) & !cidr.mask() != 0 {
            return Err(Error::validation(format!(
                "CIDR '{s}' has host bits set; did you mean {}?",
                Self {
                    network: Ipv4Addr::from(u32::from(network) & cidr.mask()),
                    prefix
                }
            )));
        }
        Ok(cidr)
    }

    /// Network address
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        }
    }

    fn size(&self) -> u64 {
        1u64 << (32 - self.prefix)
    }

    /// Whether `other` lies entirely inside this network
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.prefix >= self.prefix && u32::from(other.network) & self.mask() == u32::from(self.network)
    }

    /// Whether the two networks share any address
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Split into `count` equal, consecutive subnets of the smallest prefix
    /// that fits them all
    pub fn subdivide(&self, count: usize) -> Result<Vec<Ipv4Cidr>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let bits = count.next_power_of_two().trailing_zeros() as u8;
        let prefix = self.prefix + bits;
        if prefix > MAX_SUBNET_PREFIX {
            return Err(Error::validation(format!(
                "address space {self} is too small for {count} subnets (would need /{prefix}, max /{MAX_SUBNET_PREFIX})"
            )));
        }
        let step = 1u64 << (32 - prefix);
        let base = u64::from(u32::from(self.network));
        debug_assert!(step * count as u64 <= self.size());
        Ok((0..count as u64)
            .map(|i| Ipv4Cidr {
                network: Ipv4Addr::from((base + i * step) as u32),
                prefix,
            })
            .collect())
    }
}

impl std::fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl std::str::FromStr for Ipv4Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_and_displays() {
        let cidr = Ipv4Cidr::parse("10.0.0.0/16").unwrap();
        assert_eq!(cidr.prefix(), 16);
        assert_eq!(cidr.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(cidr.to_string(), "10.0.0.0/16");
    }

    #[rstest]
    #[case::no_prefix("10.0.0.0", "missing a prefix")]
    #[case::bad_address("10.0.0.300/16", "invalid address")]
    #[case::prefix_too_wide("10.0.0.0/8", "prefix must be between")]
    #[case::prefix_too_narrow("10.0.0.0/30", "prefix must be between")]
    #[case::host_bits("10.0.1.0/16", "did you mean 10.0.0.0/16")]
    fn rejects_malformed(#[case] input: &str, #[case] needle: &str) {
        let err = Ipv4Cidr::parse(input).unwrap_err();
        assert!(err.to_string().contains(needle), "{err}");
    }

    #[test]
    fn subdivides_into_power_of_two_blocks() {
        let cidr = Ipv4Cidr::parse("10.0.0.0/16").unwrap();
        let subnets = cidr.subdivide(4).unwrap();
        let names: Vec<String> = subnets.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
    }

    #[test]
    fn odd_counts_round_up_prefix() {
        let cidr = Ipv4Cidr::parse("172.16.0.0/20").unwrap();
        let subnets = cidr.subdivide(6).unwrap();
        assert_eq!(subnets.len(), 6);
        assert!(subnets.iter().all(|s| s.prefix() == 23));
        assert!(subnets.iter().all(|s| cidr.contains(s)));
    }

    #[test]
    fn overlap_detection() {
        let a = Ipv4Cidr::parse("10.0.0.0/17").unwrap();
        let b = Ipv4Cidr::parse("10.0.64.0/18").unwrap();
        let c = Ipv4Cidr::parse("10.0.128.0/17").unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
