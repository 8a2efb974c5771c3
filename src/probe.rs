use crate::error::{ConfigError, ProbeError};
use crate::target::ProbeTarget;
use crate::types::{now_rfc3339, ProbeOutcome};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HOST};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

pub const CACHE_STATUS_HEADER: &str = "cf-cache-status";
pub const RAY_HEADER: &str = "cf-ray";
pub const COUNTRY_HEADER: &str = "cf-ipcountry";

/// Something that can turn a target into an outcome. Never fails: transport
/// errors are carried inside the outcome.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome;
}

/// Single HEAD request against one edge address.
///
/// - The URL carries the raw address; the tracked domain only appears in the
///   `Host` header.
/// - Certificate and hostname checks are disabled since the peer is a raw
///   address.
/// - Redirects are not followed and the whole exchange is bounded by
///   `timeout`.
#[derive(Clone)]
pub struct EdgeProbe {
    client: Client,
    timeout: Duration,
}

impl EdgeProbe {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .redirect(Policy::none())
            .no_proxy()
            .timeout(timeout)
            .user_agent(default_user_agent())
            .build()
            .map_err(ConfigError::Client)?;
        Ok(Self { client, timeout })
    }

    pub async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        let start = Instant::now();
        let res = self
            .client
            .head(target.url())
            .header(HOST, target.host_header())
            .send()
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match res {
            Ok(response) => {
                let head = EdgeSignals::from_headers(response.headers());
                let status_code = response.status().as_u16();
                trace!(ip = %target.ip, status = status_code, cache = %head.cache_status, "probe ok");
                head.into_outcome(target, status_code, latency_ms)
            }
            Err(e) => {
                let e = ProbeError::from_reqwest(e, self.timeout);
                trace!(ip = %target.ip, error = %e, "probe failed");
                ProbeOutcome::failed(target.ip, e.to_string(), latency_ms, now_rfc3339())
            }
        }
    }
}

#[async_trait]
impl Prober for EdgeProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        EdgeProbe::probe(self, target).await
    }
}

pub fn default_user_agent() -> String {
    format!("cfpinner-rs/{}", env!("CARGO_PKG_VERSION"))
}

/// Cache and routing signals taken from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeSignals {
    pub cache_status: String,
    pub ray_id: String,
    pub pop: String,
    pub country: String,
}

impl EdgeSignals {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let ray_id = header_value(headers, RAY_HEADER);
        Self {
            cache_status: header_value(headers, CACHE_STATUS_HEADER),
            pop: pop_from_ray(&ray_id),
            ray_id,
            country: header_value(headers, COUNTRY_HEADER),
        }
    }

    fn into_outcome(self, target: &ProbeTarget, status_code: u16, latency_ms: u64) -> ProbeOutcome {
        ProbeOutcome {
            ip: target.ip,
            status_code,
            success: true,
            error: None,
            cache_status: self.cache_status,
            ray_id: self.ray_id,
            pop: self.pop,
            country: self.country,
            latency_ms,
            timestamp: now_rfc3339(),
        }
    }
}

/// Trimmed header value, empty when absent or not valid text.
fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

/// Edge location code: the three characters after the last `-` of a ray id,
/// e.g. `8428f15b8a9c1234-SJC` -> `SJC`. Empty when fewer than three follow.
pub fn pop_from_ray(ray: &str) -> String {
    match ray.rsplit_once('-') {
        Some((_, suffix)) if suffix.chars().count() >= 3 => suffix.chars().take(3).collect(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn reads_cloudflare_signals() {
        let signals = EdgeSignals::from_headers(&headers(&[
            ("content-type", "image/png"),
            ("cf-cache-status", "HIT "),
            ("cf-ray", "8428f15b8a9c1234-SJC"),
            ("cf-ipcountry", " US"),
        ]));
        assert_eq!(signals.cache_status, "HIT");
        assert_eq!(signals.ray_id, "8428f15b8a9c1234-SJC");
        assert_eq!(signals.pop, "SJC");
        assert_eq!(signals.country, "US");
    }

    #[test]
    fn missing_headers_are_empty() {
        let signals = EdgeSignals::from_headers(&headers(&[("server", "cloudflare")]));
        assert_eq!(signals, EdgeSignals::default());
    }

    #[test]
    fn pop_needs_three_trailing_chars() {
        assert_eq!(pop_from_ray("8428f15b8a9c1234-SJC"), "SJC");
        assert_eq!(pop_from_ray("8428f15b8a9c1234-LHRX"), "LHR");
        assert_eq!(pop_from_ray("8428f15b8a9c1234-SJ"), "");
        assert_eq!(pop_from_ray("8428f15b8a9c1234"), "");
        assert_eq!(pop_from_ray(""), "");
    }
}
