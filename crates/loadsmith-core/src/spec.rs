//! Test input: what to load, how hard, and for how long

use crate::error::TemplateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// HTTP method issued by the plan's single sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
        HttpMethod::Head,
        HttpMethod::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TemplateError::InvalidSpec(format!("unsupported HTTP method '{s}'")))
    }
}

/// Sampler protocol, recovered from the scheme stripped off the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A target split into its plan-relevant parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub protocol: Protocol,
    pub domain: String,
    pub port: Option<u16>,
    pub path: String,
}

impl Target {
    /// Normalize a user-supplied target.
    ///
    /// Strips any `scheme://` prefix (remembering http/https), one trailing
    /// `/`, and splits off the embedded path, which is carried separately.
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut rest = raw.trim();
        let mut protocol = Protocol::default();

        if let Some((scheme, after)) = rest.split_once("://") {
            protocol = match scheme.to_ascii_lowercase().as_str() {
                "http" => Protocol::Http,
                "https" => Protocol::Https,
                other => {
                    return Err(TemplateError::InvalidSpec(format!(
                        "unsupported scheme '{other}'"
                    )))
                }
            };
            rest = after;
        }
        rest = rest.strip_suffix('/').unwrap_or(rest);

        let split_at = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, path) = rest.split_at(split_at);
        let path = match path {
            "" => "/".to_string(),
            p if p.starts_with('/') => p.to_string(),
            p => format!("/{p}"),
        };

        let (domain, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().ok().filter(|p| *p > 0).ok_or_else(|| {
                    TemplateError::InvalidSpec(format!("invalid port '{port}' in '{raw}'"))
                })?;
                (host, Some(port))
            }
            None => (authority, None),
        };

        let target = Target {
            protocol,
            domain: domain.to_ascii_lowercase(),
            port,
            path,
        };
        validate_domain(&target.domain)?;
        Ok(target)
    }
}

fn validate_domain(domain: &str) -> Result<(), TemplateError> {
    if domain.is_empty() {
        return Err(TemplateError::InvalidSpec("target domain is empty".into()));
    }
    if domain.contains('/') {
        return Err(TemplateError::InvalidSpec(format!(
            "domain '{domain}' is not normalized"
        )));
    }
    if !domain.starts_with(|c: char| c.is_ascii_alphanumeric()) || domain.contains("..") {
        return Err(TemplateError::InvalidSpec(format!(
            "domain '{domain}' is not a host name"
        )));
    }
    if let Some(bad) = domain
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
    {
        return Err(TemplateError::InvalidSpec(format!(
            "domain '{domain}' contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// Immutable description of one load test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub threads: u32,
    /// `None` defers to the configured default ramp-up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_up_secs: Option<u32>,
    pub duration_secs: u32,
    #[serde(default)]
    pub method: HttpMethod,
}

impl TestSpec {
    /// Build a spec from a raw target such as `https://example.com/api/`.
    ///
    /// Only the target is checked here; load-profile bounds are enforced by
    /// [`TestSpec::validate`] when the plan is rendered.
    pub fn new(
        target: &str,
        threads: u32,
        duration_secs: u32,
        method: HttpMethod,
    ) -> Result<Self, TemplateError> {
        let target = Target::parse(target)?;
        Ok(Self {
            domain: target.domain,
            path: target.path,
            protocol: target.protocol,
            port: target.port,
            threads,
            ramp_up_secs: None,
            duration_secs,
            method,
        })
    }

    pub fn with_ramp_up(mut self, secs: u32) -> Self {
        self.ramp_up_secs = Some(secs);
        self
    }

    /// Ramp-up in effect, given the configured default
    pub fn effective_ramp_up(&self, default_secs: u32) -> u32 {
        self.ramp_up_secs.unwrap_or(default_secs)
    }

    /// Seconds the engine is scheduled to run. Ramp-up is additive.
    pub fn scheduled_secs(&self, default_ramp_up: u32) -> u64 {
        u64::from(self.effective_ramp_up(default_ramp_up)) + u64::from(self.duration_secs)
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.threads < 1 {
            return Err(TemplateError::InvalidSpec(
                "thread count must be at least 1".into(),
            ));
        }
        if self.duration_secs < 1 {
            return Err(TemplateError::InvalidSpec(
                "duration must be at least 1 second".into(),
            ));
        }
        validate_domain(&self.domain)?;
        if !self.path.starts_with('/') {
            return Err(TemplateError::InvalidSpec(format!(
                "request path '{}' must start with '/'",
                self.path
            )));
        }
        if self.path.contains("{{")
            || self.path.contains("}}")
            || self.path.contains(char::is_control)
        {
            return Err(TemplateError::InvalidSpec(format!(
                "request path {:?} contains reserved characters",
                self.path
            )));
        }
        Ok(())
    }

    pub fn target_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}{}", self.protocol, self.domain, port, self.path),
            None => format!("{}://{}{}", self.protocol, self.domain, self.path),
        }
    }
}
