//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the upstream URL can be used as a forwarding origin
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("upstream url {url:?} is invalid: {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("upstream url scheme {0:?} is not supported (use http or https)")]
    UnsupportedScheme(String),

    #[error("upstream url must not carry a {0}; the inbound path and query are forwarded unchanged")]
    UpstreamNotOrigin(&'static str),

    #[error("logging level must not be empty")]
    EmptyLogLevel,
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.upstream.url) {
        Ok(url) => check_upstream(&url, &mut errors),
        Err(e) => errors.push(ValidationError::InvalidUpstreamUrl {
            url: config.upstream.url.clone(),
            reason: e.to_string(),
        }),
    }

    if config.logging.level.trim().is_empty() {
        errors.push(ValidationError::EmptyLogLevel);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_upstream(url: &Url, errors: &mut Vec<ValidationError>) {
    if !matches!(url.scheme(), "http" | "https") {
        errors.push(ValidationError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none() {
        errors.push(ValidationError::InvalidUpstreamUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    if url.path() != "/" && !url.path().is_empty() {
        errors.push(ValidationError::UpstreamNotOrigin("path"));
    }
    if url.query().is_some() {
        errors.push(ValidationError::UpstreamNotOrigin("query"));
    }
    if url.fragment().is_some() {
        errors.push(ValidationError::UpstreamNotOrigin("fragment"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_upstream(url: &str) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.upstream.url = url.to_string();
        config
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn accepts_origin_with_port_and_trailing_slash() {
        assert!(validate_config(&with_upstream("http://127.0.0.1:8080/")).is_ok());
    }

    #[test]
    fn rejects_unparseable_url() {
        let errors = validate_config(&with_upstream("not a url")).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidUpstreamUrl { .. }));
    }

    #[test]
    fn collects_every_error() {
        let mut config = with_upstream("ftp://example.com/base?x=1");
        config.logging.level = " ".into();

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::UnsupportedScheme("ftp".into())));
        assert!(errors.contains(&ValidationError::UpstreamNotOrigin("path")));
        assert!(errors.contains(&ValidationError::UpstreamNotOrigin("query")));
        assert!(errors.contains(&ValidationError::EmptyLogLevel));
    }
}
