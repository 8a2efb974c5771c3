use crate::error::{ConfigError, ParseError};
use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// An IPv4 address block with its base normalized to the network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressBlock {
    net: Ipv4Net,
}

/// A parsed line of an address-block list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    V4(AddressBlock),
    /// IPv6 is recognized but never sampled.
    V6(String),
}

/// How many addresses a single block may contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleCap {
    Limited(NonZeroUsize),
    /// Force-all mode: every host of every block.
    Unlimited,
}

impl SampleCap {
    pub fn limited(cap: usize) -> Result<Self, ConfigError> {
        NonZeroUsize::new(cap)
            .map(SampleCap::Limited)
            .ok_or(ConfigError::ZeroCap)
    }

    /// Unlimited when `force_all` is set, otherwise `cap`.
    pub fn from_flags(cap: usize, force_all: bool) -> Result<Self, ConfigError> {
        if force_all {
            Ok(SampleCap::Unlimited)
        } else {
            Self::limited(cap)
        }
    }
}

impl fmt::Display for SampleCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleCap::Limited(n) => write!(f, "{n} per block"),
            SampleCap::Unlimited => f.write_str("all hosts"),
        }
    }
}

/// Parse one declaration, recognizing IPv6 so callers can skip it.
pub fn parse_declaration(s: &str) -> Result<Declaration, ParseError> {
    let s = s.trim();
    if s.contains(':') {
        return Ok(Declaration::V6(s.to_string()));
    }
    s.parse().map(Declaration::V4)
}

impl FromStr for AddressBlock {
    type Err = ParseError;

    /// Accepts `a.b.c.d/len` or a bare `a.b.c.d` (a /32).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        let (addr, prefix_len) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, parse_prefix(prefix)?),
            None => (s, 32),
        };
        let base: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidAddress(addr.trim().to_string()))?;
        let net = Ipv4Net::new(base, prefix_len)
            .map_err(|_| ParseError::PrefixOutOfRange(prefix_len.into()))?
            .trunc();
        Ok(Self { net })
    }
}

fn parse_prefix(s: &str) -> Result<u8, ParseError> {
    let s = s.trim();
    let val: i64 = s
        .parse()
        .map_err(|_| ParseError::InvalidPrefix(s.to_string()))?;
    if !(0..=32).contains(&val) {
        return Err(ParseError::PrefixOutOfRange(val));
    }
    Ok(val as u8)
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}

impl AddressBlock {
    pub fn network(&self) -> Ipv4Addr {
        self.net.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// `2^(32 - prefix_len)`; a /0 holds 2^32 addresses so this is a u64.
    pub fn host_count(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len()))
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.net.contains(&ip)
    }

    /// Every usable host in ascending order, lazily.
    ///
    /// Blocks wider than /31 skip their network and broadcast addresses.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let start = u64::from(u32::from(self.network()));
        let count = self.host_count();
        let (first, last) = if self.prefix_len() < 31 {
            (1, count - 2)
        } else {
            (0, count - 1)
        };
        (first..=last).map(move |offset| Ipv4Addr::from((start + offset) as u32))
    }

    /// Expand the block into at most `cap` concrete addresses.
    ///
    /// Blocks that fit under the cap are enumerated exactly. Larger blocks are
    /// sampled with a fixed stride plus a small deterministic jitter, in O(cap)
    /// time regardless of block size. Samples from adjacent strides may
    /// coincide and are kept.
    pub fn expand(&self, cap: SampleCap) -> Vec<Ipv4Addr> {
        let host_count = self.host_count();
        match cap {
            SampleCap::Limited(cap) if host_count > cap.get() as u64 => {
                self.strided_sample(cap.get())
            }
            _ => self.hosts().collect(),
        }
    }

    fn strided_sample(&self, cap: usize) -> Vec<Ipv4Addr> {
        let host_count = self.host_count();
        let base = u64::from(u32::from(self.network()));
        let step = host_count / cap as u64;

        (0..cap as u64)
            .map(|i| {
                let mut offset = i * step;
                if i > 0 && step > 4 {
                    offset += i % 4;
                }
                if host_count > 2 {
                    offset = offset.clamp(1, host_count - 2);
                }
                Ipv4Addr::from((base + offset) as u32)
            })
            .collect()
    }
}

/// Expand every block with the same cap, preserving block order.
pub fn expand_all(blocks: &[AddressBlock], cap: SampleCap) -> Vec<Ipv4Addr> {
    blocks.iter().flat_map(|b| b.expand(cap)).collect()
}
