//! Startup validation of endpoint targets and timing settings.

use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::types::{CheckType, Endpoint};

/// Longest accepted interval or timeout, in seconds (about 136 years)
pub const MAX_INTERVAL_SECS: f64 = u32::MAX as f64;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("'addresses' must be an object with server names as keys and addresses as values")]
    MissingAddresses,
    #[error("'{0}' must be a positive number")]
    NonPositive(&'static str),
    #[error("'{0}' is too large")]
    TooLarge(&'static str),
    #[error("endpoint '{0}' has an empty address")]
    EmptyAddress(String),
    #[error("endpoint '{0}': address must not start with '-'")]
    OptionLikeAddress(String),
    #[error("endpoint '{0}': port 0 is not valid")]
    ZeroPort(String),
    #[error("endpoint '{0}': TCP checks need a port")]
    MissingPort(String),
    #[error("endpoint '{name}': invalid URL: {reason}")]
    InvalidUrl { name: String, reason: String },
}

/// Turn a seconds value into a positive `Duration`
pub fn validate_interval(field: &'static str, seconds: f64) -> Result<Duration, ValidationError> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(ValidationError::NonPositive(field));
    }

    if seconds > MAX_INTERVAL_SECS {
        return Err(ValidationError::TooLarge(field));
    }

    Duration::try_from_secs_f64(seconds).map_err(|_| ValidationError::TooLarge(field))
}

/// Validate an endpoint for its check type
pub fn validate_endpoint(endpoint: &Endpoint) -> Result<(), ValidationError> {
    if endpoint.address.trim().is_empty() {
        return Err(ValidationError::EmptyAddress(endpoint.name.clone()));
    }

    // Would be read as an option by the ping program
    if endpoint.address.trim_start().starts_with('-') {
        return Err(ValidationError::OptionLikeAddress(endpoint.name.clone()));
    }

    if endpoint.port == Some(0) {
        return Err(ValidationError::ZeroPort(endpoint.name.clone()));
    }

    match endpoint.check_type {
        CheckType::Ping => Ok(()),
        CheckType::Tcp if endpoint.port.is_none() => {
            Err(ValidationError::MissingPort(endpoint.name.clone()))
        }
        CheckType::Tcp => Ok(()),
        CheckType::Http => validate_http_target(endpoint),
    }
}

fn validate_http_target(endpoint: &Endpoint) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidUrl { name: endpoint.name.clone(), reason };

    let url = Url::parse(&endpoint.http_target()).map_err(|e| invalid(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    }

    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }

    Ok(())
}
