use crate::utils::error::{FetchError, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

static PREFIX_RE: OnceLock<Regex> = OnceLock::new();

/// Output prefixes end up in filenames; anything outside [A-Za-z0-9]+
/// is rejected before the pipeline starts.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let re = PREFIX_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9]+$").expect("static regex"));
    if re.is_match(prefix) {
        Ok(())
    } else {
        Err(FetchError::InvalidPrefix {
            prefix: prefix.to_string(),
        })
    }
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(FetchError::Config {
            field: field_name.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(FetchError::Config {
                field: field_name.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(FetchError::Config {
            field: field_name.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_date_order(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        return Err(FetchError::Config {
            field: "start_date/end_date".to_string(),
            reason: format!("start date {} is after end date {}", start, end),
        });
    }
    Ok(())
}

pub fn validate_positive(field_name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(FetchError::Config {
            field: field_name.to_string(),
            reason: "Value must be at least 1".to_string(),
        });
    }
    Ok(())
}

pub fn validate_buffer(value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(FetchError::Config {
            field: "buffer".to_string(),
            reason: format!("buffer distance must be a non-negative number, got {}", value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(FetchError::Config {
            field: field_name.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}
