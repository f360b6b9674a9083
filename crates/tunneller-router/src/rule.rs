//! Routing rule values
//!
//! Rules are immutable once created. Patterns come in two forms:
//! - exact: `/admin` matches only `/admin`
//! - wildcard: `/api/*` matches `/api` and anything under `/api/`,
//!   but not `/apistore`

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Specificity of an exact pattern. Always outranks wildcards.
const EXACT_SPECIFICITY: u32 = 10_000;

/// Base specificity of a wildcard pattern; longer prefixes rank higher.
const WILDCARD_SPECIFICITY_BASE: u32 = 1_000;

/// Errors raised when constructing a rule from untrusted input
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("Path pattern must not be empty")]
    EmptyPattern,

    #[error("Target host must not be empty")]
    EmptyHost,

    #[error("Target port must be in 1..=65535")]
    InvalidPort,
}

fn default_priority() -> i32 {
    100
}

/// A single path-based forwarding rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    /// Exact path (`/admin`) or wildcard pattern (`/api/*`)
    pub path_pattern: String,
    /// Backend host (DNS name or IP literal)
    pub target_host: String,
    /// Backend port
    pub target_port: u16,
    /// Free-form label shown in listings
    #[serde(default)]
    pub description: String,
    /// Remove the matched prefix before forwarding
    #[serde(default)]
    pub strip_prefix: bool,
    /// Lower numbers are checked first
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Replace `Host:` with the target host and add `X-Forwarded-Host:`
    #[serde(default)]
    pub forward_host: bool,
    /// Dial the backend over TLS (certificate verification disabled)
    #[serde(default)]
    pub use_ssl: bool,
}

impl RoutingRule {
    /// Create a rule with the default priority and all toggles off
    pub fn new(
        path_pattern: impl Into<String>,
        target_host: impl Into<String>,
        target_port: u16,
        description: impl Into<String>,
    ) -> Result<Self, RouteError> {
        Self::builder(path_pattern, target_host, target_port)
            .description(description)
            .build()
    }

    /// Start building a rule
    pub fn builder(
        path_pattern: impl Into<String>,
        target_host: impl Into<String>,
        target_port: u16,
    ) -> RuleBuilder {
        RuleBuilder {
            path_pattern: path_pattern.into(),
            target_host: target_host.into(),
            target_port,
            description: String::new(),
            strip_prefix: false,
            priority: default_priority(),
            forward_host: false,
            use_ssl: false,
        }
    }

    /// Validate the rule's fields; used when rules arrive over the admin API
    pub fn validate(&self) -> Result<(), RouteError> {
        if self.path_pattern.is_empty() {
            return Err(RouteError::EmptyPattern);
        }
        if self.target_host.is_empty() {
            return Err(RouteError::EmptyHost);
        }
        if self.target_port == 0 {
            return Err(RouteError::InvalidPort);
        }
        Ok(())
    }

    /// Check whether this rule matches the given request path
    pub fn matches(&self, path: &str) -> bool {
        if self.path_pattern == path {
            return true;
        }

        if let Some(prefix) = self.wildcard_prefix() {
            // Strict prefix form: "/api/*" matches "/api" and "/api/x",
            // never "/apistore"
            return path == prefix || path.strip_prefix(prefix).is_some_and(|r| r.starts_with('/'));
        }

        false
    }

    /// Rewrite a matched path for forwarding when `strip_prefix` is set.
    ///
    /// Wildcard patterns strip the prefix; exact patterns rewrite to `/`.
    /// The result always starts with `/`.
    pub fn rewrite_path(&self, original: &str) -> String {
        if !self.strip_prefix {
            return original.to_string();
        }

        let stripped = match self.wildcard_prefix() {
            Some(prefix) => original.strip_prefix(prefix).unwrap_or(original),
            None => "/",
        };

        if stripped.starts_with('/') {
            stripped.to_string()
        } else {
            format!("/{stripped}")
        }
    }

    /// Ordering weight: exact > longer wildcard > shorter wildcard
    pub fn specificity(&self) -> u32 {
        if self.is_wildcard() {
            WILDCARD_SPECIFICITY_BASE + self.path_pattern.len() as u32
        } else {
            EXACT_SPECIFICITY
        }
    }

    /// Whether the pattern ends in `/*`
    pub fn is_wildcard(&self) -> bool {
        self.path_pattern.ends_with("/*")
    }

    fn wildcard_prefix(&self) -> Option<&str> {
        self.path_pattern.strip_suffix("/*")
    }
}

impl std::fmt::Display for RoutingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}:{} (priority={}{})",
            self.path_pattern,
            self.target_host,
            self.target_port,
            self.priority,
            if self.strip_prefix { ", strip prefix" } else { "" }
        )
    }
}

/// Builder for [`RoutingRule`]
#[derive(Debug)]
pub struct RuleBuilder {
    path_pattern: String,
    target_host: String,
    target_port: u16,
    description: String,
    strip_prefix: bool,
    priority: i32,
    forward_host: bool,
    use_ssl: bool,
}

impl RuleBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn strip_prefix(mut self, strip: bool) -> Self {
        self.strip_prefix = strip;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn forward_host(mut self, forward: bool) -> Self {
        self.forward_host = forward;
        self
    }

    pub fn use_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn build(self) -> Result<RoutingRule, RouteError> {
        // Patterns are normalized to begin with "/"
        let path_pattern = if self.path_pattern.starts_with('/') {
            self.path_pattern
        } else {
            format!("/{}", self.path_pattern)
        };

        let rule = RoutingRule {
            path_pattern,
            target_host: self.target_host,
            target_port: self.target_port,
            description: self.description,
            strip_prefix: self.strip_prefix,
            priority: self.priority,
            forward_host: self.forward_host,
            use_ssl: self.use_ssl,
        };
        rule.validate()?;
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str) -> RoutingRule {
        RoutingRule::builder(pattern, "localhost", 8080).build().unwrap()
    }

    #[test]
    fn test_exact_match() {
        let r = rule("/admin");
        assert!(r.matches("/admin"));
        assert!(!r.matches("/admin/"));
        assert!(!r.matches("/administrator"));
    }

    #[test]
    fn test_wildcard_match_strict_prefix() {
        let r = rule("/api/*");
        assert!(r.matches("/api"));
        assert!(r.matches("/api/x"));
        assert!(r.matches("/api/users/123"));
        assert!(!r.matches("/apistore"));
        assert!(!r.matches("/ap"));
    }

    #[test]
    fn test_catch_all_wildcard() {
        let r = rule("/*");
        assert!(r.matches("/"));
        assert!(r.matches("/anything"));
        assert!(r.matches("/a/b/c"));
    }

    #[test]
    fn test_rewrite_path_wildcard() {
        let r = RoutingRule::builder("/api/*", "localhost", 8080)
            .strip_prefix(true)
            .build()
            .unwrap();
        assert_eq!(r.rewrite_path("/api/x/y"), "/x/y");
        assert_eq!(r.rewrite_path("/api"), "/");
    }

    #[test]
    fn test_rewrite_path_exact() {
        let r = RoutingRule::builder("/exact", "localhost", 8080)
            .strip_prefix(true)
            .build()
            .unwrap();
        assert_eq!(r.rewrite_path("/exact"), "/");
    }

    #[test]
    fn test_rewrite_path_disabled() {
        let r = rule("/api/*");
        assert_eq!(r.rewrite_path("/api/x"), "/api/x");
    }

    #[test]
    fn test_specificity_ordering() {
        assert!(rule("/admin").specificity() > rule("/api/users/*").specificity());
        assert!(rule("/api/users/*").specificity() > rule("/api/*").specificity());
        assert!(rule("/api/*").specificity() > rule("/*").specificity());
    }

    #[test]
    fn test_pattern_normalized_to_leading_slash() {
        let r = rule("api/*");
        assert_eq!(r.path_pattern, "/api/*");
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            RoutingRule::builder("/x", "", 80).build().unwrap_err(),
            RouteError::EmptyHost
        );
        assert_eq!(
            RoutingRule::builder("/x", "h", 0).build().unwrap_err(),
            RouteError::InvalidPort
        );
    }

    #[test]
    fn test_serde_defaults() {
        let json = r#"{"pathPattern":"/api/*","targetHost":"h1","targetPort":8081}"#;
        let r: RoutingRule = serde_json::from_str(json).unwrap();
        assert_eq!(r.priority, 100);
        assert!(!r.strip_prefix);
        assert!(!r.use_ssl);
    }

    #[test]
    fn test_serde_priority_zero_preserved() {
        let json = r#"{"pathPattern":"/a","targetHost":"h","targetPort":1,"priority":0}"#;
        let r: RoutingRule = serde_json::from_str(json).unwrap();
        assert_eq!(r.priority, 0);
    }
}
