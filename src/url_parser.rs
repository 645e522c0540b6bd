//! Parsing of user-supplied item IDs, OneDrive URLs and pasted redirect URLs.

use std::sync::LazyLock;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use url::Url;

use crate::auth::AuthRedirect;
use crate::error::{DriveError, Result};

/// Characters escaped inside a single URL path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// OneDrive / SharePoint web URLs carrying the item in an `id` or `resid` parameter.
static ONEDRIVE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:onedrive\.live\.com|1drv\.ms|[\w-]+(?:-my)?\.sharepoint\.com)/.*?[?&](?:id|resid)=([^&#]+)",
    )
    .expect("Invalid OneDrive URL regex")
});

/// `code=` parameter inside a pasted query string.
static CODE_PARAM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[?&])code=([^&#\s]+)").expect("Invalid code regex"));

/// Valid Graph drive item ID (personal IDs look like `ABC123!105`).
static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9!_.-]+$").expect("Invalid ID regex"));

/// Extract a drive item ID from a OneDrive URL or validate a raw ID.
///
/// Supports the following formats:
/// - `https://onedrive.live.com/?id=<ID>&cid=<CID>`
/// - `https://onedrive.live.com/redir?resid=<ID>`
/// - Raw ID string
///
/// # Examples
///
/// ```
/// use graph_drive::url_parser::extract_item_id;
///
/// let id = extract_item_id("https://onedrive.live.com/?id=ABC123%21105&cid=ABC123").unwrap();
/// assert_eq!(id, "ABC123!105");
///
/// let id = extract_item_id("01BYE5RZ6QN3ZWBTURFFA").unwrap();
/// assert_eq!(id, "01BYE5RZ6QN3ZWBTURFFA");
/// ```
pub fn extract_item_id(url_or_id: &str) -> Result<String> {
    let trimmed = url_or_id.trim();

    if let Some(captures) = ONEDRIVE_URL_REGEX.captures(trimmed) {
        if let Some(id) = captures.get(1) {
            let decoded = percent_decode_str(id.as_str()).decode_utf8_lossy();
            if ID_REGEX.is_match(&decoded) {
                return Ok(decoded.into_owned());
            }
        }
    }

    if ID_REGEX.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }

    Err(DriveError::InvalidUrlOrId(url_or_id.to_string()))
}

/// Extract an authorization code from what the user pasted after signing in.
///
/// Accepts the bare code, the full redirect URL, or just its query string.
/// A redirect carrying `error=` is reported as an authentication failure.
pub fn extract_auth_code(input: &str) -> Result<String> {
    parse_pasted_redirect(input).map(|redirect| redirect.code)
}

/// Like [`extract_auth_code`], but also keeps the `state` parameter when the
/// user pasted a redirect URL or query string. A bare code has no state.
pub fn parse_pasted_redirect(input: &str) -> Result<AuthRedirect> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DriveError::AuthError(
            "no authorization code was provided".to_string(),
        ));
    }

    if trimmed.contains("://") {
        let url = Url::parse(trimmed)?;
        return redirect_from_query(&url);
    }

    if trimmed.contains("error=") || CODE_PARAM_REGEX.is_match(trimmed) {
        let url = Url::parse(&format!("http://localhost/?{}", trimmed.trim_start_matches('?')))?;
        return redirect_from_query(&url);
    }

    if trimmed.chars().any(char::is_whitespace) {
        return Err(DriveError::AuthError(format!(
            "not an authorization code: {}",
            trimmed
        )));
    }

    Ok(AuthRedirect {
        code: trimmed.to_string(),
        state: None,
    })
}

/// Read `code` and `state` (or `error`/`error_description`) from a redirect URL.
pub(crate) fn redirect_from_query(url: &Url) -> Result<AuthRedirect> {
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };

    if let Some(error) = param("error") {
        let description = param("error_description").unwrap_or_default();
        return Err(DriveError::AuthError(format!("{}: {}", error, description)));
    }

    let code = param("code")
        .filter(|code| !code.is_empty())
        .ok_or_else(|| DriveError::AuthError("redirect URL carries no `code`".to_string()))?;

    Ok(AuthRedirect {
        code,
        state: param("state"),
    })
}

/// Percent-encode one path segment.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Normalize a drive path (`/Documents/Germany/`) into encoded segments.
/// Returns an empty string for the root.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}
