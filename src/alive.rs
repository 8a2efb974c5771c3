use crate::types::ProbeOutcome;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Edge addresses that answered during a discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliveSet {
    addrs: HashSet<Ipv4Addr>,
}

impl AliveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep every outcome with a successful transport and a status code.
    pub fn from_outcomes(outcomes: &[ProbeOutcome]) -> Self {
        outcomes
            .iter()
            .filter(|o| o.is_alive())
            .map(|o| o.ip)
            .collect()
    }

    pub fn insert(&mut self, ip: Ipv4Addr) -> bool {
        self.addrs.insert(ip)
    }

    pub fn contains(&self, ip: &Ipv4Addr) -> bool {
        self.addrs.contains(ip)
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Ascending numeric order, for files and probe lists.
    pub fn to_sorted_vec(&self) -> Vec<Ipv4Addr> {
        let mut v: Vec<Ipv4Addr> = self.addrs.iter().copied().collect();
        v.sort_unstable();
        v
    }
}

impl FromIterator<Ipv4Addr> for AliveSet {
    fn from_iter<I: IntoIterator<Item = Ipv4Addr>>(iter: I) -> Self {
        Self {
            addrs: iter.into_iter().collect(),
        }
    }
}
