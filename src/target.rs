use crate::error::ConfigError;
use http::Uri;
use std::net::Ipv4Addr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// A request URL with its host slot left open for an edge address.
///
/// Derived from the tracked URL: scheme, port and path are kept, the host
/// becomes the virtual host presented to every edge node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTemplate {
    scheme: Scheme,
    port: u16,
    explicit_port: bool,
    path: Arc<str>,
    domain: Arc<str>,
}

impl TargetTemplate {
    /// Parse a tracked URL. A missing scheme means `https://`.
    ///
    /// `domain` overrides the virtual host taken from the URL.
    pub fn parse(url: &str, domain: Option<&str>) -> Result<Self, ConfigError> {
        let raw = url.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let uri: Uri = with_scheme
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
        let scheme = match uri.scheme_str() {
            Some("http") => Scheme::Http,
            Some("https") => Scheme::Https,
            _ => return Err(invalid("unsupported scheme")),
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?;
        let domain = match domain.map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => host.to_string(),
        };
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|p| !p.is_empty())
            .unwrap_or("/");

        Ok(Self {
            scheme,
            port: uri.port_u16().unwrap_or(scheme.default_port()),
            explicit_port: uri.port_u16().is_some(),
            path: Arc::from(path),
            domain: Arc::from(domain.as_str()),
        })
    }

    /// Template for a discovery pass: the edge root on `domain` over HTTPS.
    pub fn root(domain: &str) -> Result<Self, ConfigError> {
        Self::parse(&format!("https://{}/", domain.trim()), None)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn target_for(&self, ip: Ipv4Addr) -> ProbeTarget {
        ProbeTarget {
            ip,
            template: self.clone(),
        }
    }

    pub fn targets(&self, ips: &[Ipv4Addr]) -> Vec<ProbeTarget> {
        ips.iter().map(|&ip| self.target_for(ip)).collect()
    }
}

/// One concrete probe: an edge address plus the shared request template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub ip: Ipv4Addr,
    template: TargetTemplate,
}

impl ProbeTarget {
    pub fn domain(&self) -> &str {
        self.template.domain()
    }

    /// The tracked URL with its host replaced by the edge address.
    pub fn url(&self) -> String {
        let t = &self.template;
        if t.explicit_port {
            format!("{}://{}:{}{}", t.scheme.as_str(), self.ip, t.port, t.path)
        } else {
            format!("{}://{}{}", t.scheme.as_str(), self.ip, t.path)
        }
    }

    /// `Host` header value: the virtual host, with the port when the
    /// template named one.
    pub fn host_header(&self) -> String {
        if self.template.explicit_port {
            format!("{}:{}", self.domain(), self.template.port)
        } else {
            self.domain().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_replaced_and_path_kept() {
        let t = TargetTemplate::parse("https://img.example.com/a/b.png?v=2", None).unwrap();
        let target = t.target_for(Ipv4Addr::new(104, 16, 0, 1));
        assert_eq!(target.url(), "https://104.16.0.1/a/b.png?v=2");
        assert_eq!(target.domain(), "img.example.com");
        assert_eq!(target.host_header(), "img.example.com");
    }

    #[test]
    fn missing_scheme_defaults_to_https() {
        let t = TargetTemplate::parse("example.com/x.png", None).unwrap();
        assert_eq!(t.scheme(), Scheme::Https);
        assert_eq!(t.path(), "/x.png");
    }

    #[test]
    fn explicit_port_and_domain_override() {
        let t = TargetTemplate::parse("http://example.com:8080", Some("cdn.example.net")).unwrap();
        let target = t.target_for(Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(target.url(), "http://127.0.0.1:8080/");
        assert_eq!(target.host_header(), "cdn.example.net:8080");
    }

    #[test]
    fn rejects_garbage() {
        assert!(TargetTemplate::parse("ftp://example.com/", None).is_err());
        assert!(TargetTemplate::parse("https://", None).is_err());
    }
}
