use ::time::{format_description::well_known, OffsetDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Result of probing one edge address.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ip: Ipv4Addr,
    /// 0 when no response was received.
    pub status_code: u16,
    pub success: bool,
    /// Present iff the transport failed.
    pub error: Option<String>,
    /// Verbatim cache-status header value (HIT, MISS, EXPIRED, DYNAMIC, ...).
    pub cache_status: String,
    pub ray_id: String,
    /// Edge location code parsed from the ray id suffix.
    pub pop: String,
    pub country: String,
    pub latency_ms: u64,
    pub timestamp: String,
}

impl ProbeOutcome {
    /// Outcome for a probe whose transport failed.
    pub fn failed(ip: Ipv4Addr, error: String, latency_ms: u64, timestamp: String) -> Self {
        Self {
            ip,
            status_code: 0,
            success: false,
            error: Some(error),
            cache_status: String::new(),
            ray_id: String::new(),
            pop: String::new(),
            country: String::new(),
            latency_ms,
            timestamp,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    pub fn verdict(&self) -> Verdict {
        if self.has_error() {
            Verdict::Error
        } else if self.cache_status == "HIT" {
            Verdict::Hit
        } else {
            Verdict::Miss
        }
    }

    /// Responsive edge node: a status line came back, whatever the cache said.
    pub fn is_alive(&self) -> bool {
        self.success && self.status_code > 0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Hit,
    Miss,
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Hit => "HIT",
            Verdict::Miss => "MISS",
            Verdict::Error => "ERROR",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(outcome: &ProbeOutcome) -> Verdict {
    outcome.verdict()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl Counts {
    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Hit => self.hits += 1,
            Verdict::Miss => self.misses += 1,
            Verdict::Error => self.errors += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.hits + self.misses + self.errors
    }
}

/// Aggregated batch results.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ProbeOutcome>,
    pub counts: Counts,
    /// Set when the batch was cancelled before every target was probed.
    #[serde(default)]
    pub cancelled: bool,
}

impl BatchReport {
    pub fn summarize(outcomes: Vec<ProbeOutcome>) -> Self {
        let mut counts = Counts::default();
        for o in &outcomes {
            counts.record(o.verdict());
        }
        Self {
            outcomes,
            counts,
            cancelled: false,
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn hit_percent(&self) -> f64 {
        self.percent(self.counts.hits)
    }

    pub fn miss_percent(&self) -> f64 {
        self.percent(self.counts.misses)
    }

    pub fn error_percent(&self) -> f64 {
        self.percent(self.counts.errors)
    }

    fn percent(&self, n: u64) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            n as f64 * 100.0 / self.outcomes.len() as f64
        }
    }
}

pub fn summarize(outcomes: Vec<ProbeOutcome>) -> BatchReport {
    BatchReport::summarize(outcomes)
}

/// RFC 3339 UTC timestamp.
pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
