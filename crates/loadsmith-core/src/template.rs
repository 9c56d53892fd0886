//! Plan Template Engine
//!
//! Renders a [`TestSpec`] into a JMeter plan by substituting named
//! `{{placeholder}}` points in a hand-validated skeleton. Nothing else in the
//! skeleton is interpreted, so a valid skeleton plus valid input always
//! yields a valid plan.
//!
//! Rendering is pure: the document is returned in memory and persisting it
//! is the caller's job.

use crate::error::TemplateError;
use crate::identity::RunIdentity;
use crate::spec::TestSpec;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::debug;

/// Built-in single-request HTTP plan
pub const DEFAULT_SKELETON: &str = include_str!("../templates/http_plan.jmx");

/// Opening delimiter of a substitution point
pub const PLACEHOLDER_OPEN: &str = "{{";

/// Substitution points every skeleton must contain
pub const REQUIRED_PLACEHOLDERS: [&str; 9] = [
    "run_id", "threads", "ramp_up", "duration", "protocol", "domain", "port", "path", "method",
];

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// A rendered plan, bound to the run it was rendered for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanDocument {
    identity: RunIdentity,
    content: String,
}

impl PlanDocument {
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.content.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.content
    }
}

/// Text that appears in a plan rendered for `identity` and in no plan
/// rendered for any other identity
pub fn run_marker(identity: &RunIdentity) -> String {
    format!(">loadsmith-run:{}<", xml_escape(identity.as_str()))
}

#[derive(Debug, Clone)]
pub struct PlanTemplate {
    skeleton: Cow<'static, str>,
    default_ramp_up_secs: u32,
}

impl Default for PlanTemplate {
    fn default() -> Self {
        Self {
            skeleton: Cow::Borrowed(DEFAULT_SKELETON),
            default_ramp_up_secs: 0,
        }
    }
}

impl PlanTemplate {
    pub fn new(skeleton: impl Into<String>) -> Self {
        Self {
            skeleton: Cow::Owned(skeleton.into()),
            default_ramp_up_secs: 0,
        }
    }

    /// Ramp-up used for specs that do not set their own
    pub fn with_default_ramp_up(mut self, secs: u32) -> Self {
        self.default_ramp_up_secs = secs;
        self
    }

    pub fn skeleton(&self) -> &str {
        &self.skeleton
    }

    /// Check the skeleton carries every required substitution point
    pub fn check_skeleton(&self) -> Result<(), TemplateError> {
        let present: Vec<&str> = placeholder_regex()
            .captures_iter(&self.skeleton)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        for name in REQUIRED_PLACEHOLDERS {
            if !present.contains(&name) {
                return Err(TemplateError::MissingPlaceholder(name));
            }
        }
        Ok(())
    }

    pub fn render(
        &self,
        spec: &TestSpec,
        identity: &RunIdentity,
    ) -> Result<PlanDocument, TemplateError> {
        spec.validate()?;
        self.check_skeleton()?;

        let ramp_up = spec.effective_ramp_up(self.default_ramp_up_secs);
        let scheduled = spec.scheduled_secs(self.default_ramp_up_secs);

        let lookup = |name: &str| -> Option<String> {
            let value = match name {
                "run_id" => xml_escape(identity.as_str()),
                "threads" => spec.threads.to_string(),
                "ramp_up" => ramp_up.to_string(),
                "duration" => scheduled.to_string(),
                "protocol" => spec.protocol.as_str().to_string(),
                "domain" => xml_escape(&spec.domain),
                "port" => spec.port.map(|p| p.to_string()).unwrap_or_default(),
                "path" => xml_escape(&spec.path),
                "method" => spec.method.as_str().to_string(),
                _ => return None,
            };
            Some(value)
        };

        let content = placeholder_regex()
            .replace_all(&self.skeleton, |caps: &Captures<'_>| {
                lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned();

        if let Some(pos) = content.find(PLACEHOLDER_OPEN) {
            let leftover = placeholder_regex()
                .captures(&content[pos..])
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| content[pos..].chars().take(32).collect());
            return Err(TemplateError::UnresolvedPlaceholder(leftover));
        }

        debug!(
            run_id = %identity,
            threads = spec.threads,
            ramp_up,
            duration = scheduled,
            bytes = content.len(),
            "Rendered plan"
        );

        Ok(PlanDocument {
            identity: identity.clone(),
            content,
        })
    }
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
