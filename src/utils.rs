// ABOUTME: Identifier validation/quoting, URL sanitizing and connection retry helpers
// ABOUTME: Every identifier interpolated into generated SQL passes through here

use anyhow::Result;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// Maximum identifier length accepted (PostgreSQL's limit).
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a table or column name before it is interpolated into SQL.
///
/// Accepts ASCII letters, digits and underscores, not starting with a digit,
/// up to 63 characters. Identifiers are quoted as well, so this is a second
/// gate rather than the only one.
///
/// # Examples
///
/// ```
/// # use revsync::utils::validate_identifier;
/// assert!(validate_identifier("note").is_ok());
/// assert!(validate_identifier("note_uuid").is_ok());
/// assert!(validate_identifier("123note").is_err());
/// assert!(validate_identifier("note\"; DROP TABLE sync; --").is_err());
/// ```
pub fn validate_identifier(identifier: &str) -> SyncResult<()> {
    if identifier.trim().is_empty() {
        return Err(SyncError::validation(
            "identifier cannot be empty or whitespace-only",
        ));
    }

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(SyncError::validation(format!(
            "identifier '{}' exceeds maximum length of {} characters (got {})",
            sanitize_identifier(identifier),
            MAX_IDENTIFIER_LEN,
            identifier.len()
        )));
    }

    let mut chars = identifier.chars();
    if let Some(first) = chars.next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(SyncError::validation(format!(
                "identifier '{}' must start with a letter or underscore",
                sanitize_identifier(identifier)
            )));
        }
    }

    for (i, c) in identifier.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(SyncError::validation(format!(
                "identifier '{}' contains invalid character '{}' at position {}",
                sanitize_identifier(identifier),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            )));
        }
    }

    Ok(())
}

/// Strip control characters and cap length so an identifier is safe to log.
///
/// ```
/// # use revsync::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// assert_eq!(sanitize_identifier(&"a".repeat(200)).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote an identifier with double quotes, doubling embedded quotes.
///
/// Both SQLite and PostgreSQL accept this form.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Mask the password of a connection URL before it is logged.
///
/// Values that do not parse as URLs (e.g. plain SQLite paths) are returned as-is.
pub fn sanitize_url(url: &str) -> String {
    if let Ok(mut parsed) = url::Url::parse(url) {
        if parsed.password().is_some() {
            let _ = parsed.set_password(Some("***"));
        }
        parsed.to_string()
    } else {
        url.to_string()
    }
}

/// Retry an async operation with exponential backoff.
///
/// Used for connection setup only; sync sessions themselves are never retried.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                last_error = Some(e);

                if attempt < max_retries {
                    tracing::warn!(
                        "Operation failed (attempt {}/{}), retrying in {:?}...",
                        attempt + 1,
                        max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed after retries")))
}
