//! Paymail address handling: sanitation, validation and conversion of
//! third-party wallet handles into paymail form.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::PaymailError;

/// Handles starting with this prefix belong to HandCash.
pub const HANDCASH_PREFIX: &str = "$";
/// Handles starting with this prefix (and short) belong to RelayX.
pub const RELAYX_PREFIX: &str = "1";
/// RelayX handles are shorter than any legacy address.
pub const HANDLE_MAX_LENGTH: usize = 25;

const HANDCASH_DOMAIN: &str = "handcash.io";
const RELAYX_DOMAIN: &str = "relayx.io";

fn alias_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_.+\-]+$").expect("static regex"))
}

fn domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([a-z0-9\-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9\-]*[a-z0-9])?)+$")
            .expect("static regex")
    })
}

/// A paymail split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedPaymail {
    /// Part before the `@`.
    pub alias: String,
    /// Part after the `@`.
    pub domain: String,
    /// `alias@domain`.
    pub address: String,
}

/// Convert a third-party wallet handle into a paymail.
///
/// `$alias` becomes `alias@handcash.io`; a `1`-prefixed handle shorter than
/// a legacy address becomes `alias@relayx.io`. Anything else is returned
/// unchanged.
pub fn convert_handle(handle: &str) -> String {
    let handle = handle.trim();
    if let Some(alias) = handle.strip_prefix(HANDCASH_PREFIX) {
        return format!("{}@{}", alias.to_lowercase(), HANDCASH_DOMAIN);
    }
    if handle.starts_with(RELAYX_PREFIX) && handle.len() < HANDLE_MAX_LENGTH && !handle.contains('@') {
        return format!("{}@{}", &handle[1..].to_lowercase(), RELAYX_DOMAIN);
    }
    handle.to_string()
}

/// Trim, lowercase and strip a `mailto:` prefix, then split on `@`.
///
/// No validation beyond the presence of exactly one `@` is done here; use
/// [`validate_paymail`] for that.
pub fn sanitize_paymail(paymail: &str) -> Result<SanitizedPaymail, PaymailError> {
    let cleaned = paymail.trim().to_lowercase();
    let cleaned = cleaned.strip_prefix("mailto:").unwrap_or(&cleaned);

    let mut parts = cleaned.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(alias), Some(domain), None) => Ok(SanitizedPaymail {
            alias: alias.to_string(),
            domain: domain.to_string(),
            address: format!("{alias}@{domain}"),
        }),
        _ => Err(PaymailError::InvalidPaymail(paymail.to_string())),
    }
}

/// Sanitize and validate a paymail address.
pub fn validate_paymail(paymail: &str) -> Result<SanitizedPaymail, PaymailError> {
    let sanitized = sanitize_paymail(paymail)?;
    if !alias_regex().is_match(&sanitized.alias) {
        return Err(PaymailError::InvalidPaymail(format!(
            "{paymail}: invalid alias"
        )));
    }
    if !domain_regex().is_match(&sanitized.domain) {
        return Err(PaymailError::InvalidPaymail(format!(
            "{paymail}: invalid domain"
        )));
    }
    Ok(sanitized)
}

/// Expand a capability URL template for `alias@domain`.
pub(crate) fn expand_template(template: &str, alias: &str, domain: &str) -> String {
    template
        .replace("{alias}", alias)
        .replace("{domain.tld}", domain)
}
