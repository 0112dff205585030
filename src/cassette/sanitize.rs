//! Redaction of sensitive headers, query parameters, and body fields before
//! an interaction is persisted.
//!
//! Redacted values are replaced with [`REDACTED`], never removed, so that a
//! later match on header or field presence still succeeds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::format::{header_value, Headers, HttpRequest, HttpResponse, Interaction};
use crate::error::EngineError;

/// Placeholder written in place of every redacted value.
pub const REDACTED: &str = "[REDACTED]";

/// Names of the values to redact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeRules {
    /// Header names, compared case-insensitively.
    pub headers: Vec<String>,
    /// Query-parameter names in the request URI.
    pub query_params: Vec<String>,
    /// Dotted paths into JSON bodies (`auth.token`). Arrays apply the rest
    /// of the path to every element.
    pub body_fields: Vec<String>,
}

impl SanitizeRules {
    /// Rules covering the credentials used by the bundled client adapters.
    #[must_use]
    pub fn recommended() -> Self {
        Self {
            headers: ["authorization", "x-api-key", "api-key", "cookie", "set-cookie"]
                .map(String::from)
                .to_vec(),
            query_params: ["api_key", "key", "token"].map(String::from).to_vec(),
            body_fields: ["api_key", "access_token", "refresh_token", "id_token"]
                .map(String::from)
                .to_vec(),
        }
    }

    /// Returns `true` if no rule is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.query_params.is_empty() && self.body_fields.is_empty()
    }

    fn body_leaf_names(&self) -> impl Iterator<Item = &str> {
        self.body_fields.iter().filter_map(|path| path.rsplit('.').next())
    }
}

/// Returns a copy of `interaction` with every configured field redacted on
/// both the request and the response side.
///
/// # Errors
///
/// Returns [`EngineError::SanitizationIncomplete`] when a body cannot be
/// decoded but textually mentions a configured field.
pub fn sanitize(
    interaction: &Interaction,
    rules: &SanitizeRules,
) -> Result<Interaction, EngineError> {
    let request = sanitize_request(&interaction.request(), rules)?;
    let content_type = header_value(&interaction.response_headers, "content-type");
    let response = HttpResponse {
        status: interaction.response_status,
        headers: redact_headers(&interaction.response_headers, rules),
        body: redact_body(&interaction.response_body, content_type, rules, "response")?,
    };
    Ok(Interaction::from_exchange(interaction.client_kind, request, response))
}

/// Redacts only the request side. Replay applies this to the live request so
/// it compares equal to the sanitized recording.
///
/// # Errors
///
/// Returns [`EngineError::SanitizationIncomplete`] under the same conditions
/// as [`sanitize`].
pub fn sanitize_request(
    request: &HttpRequest,
    rules: &SanitizeRules,
) -> Result<HttpRequest, EngineError> {
    let content_type = header_value(&request.headers, "content-type");
    Ok(HttpRequest {
        method: request.method.clone(),
        uri: redact_query(&request.uri, &rules.query_params),
        headers: redact_headers(&request.headers, rules),
        body: redact_body(&request.body, content_type, rules, "request")?,
    })
}

fn redact_headers(headers: &Headers, rules: &SanitizeRules) -> Headers {
    headers
        .iter()
        .map(|(name, value)| {
            if rules.headers.iter().any(|rule| rule.eq_ignore_ascii_case(name)) {
                (name.clone(), REDACTED.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

fn redact_query(uri: &str, names: &[String]) -> String {
    let Some((base, query)) = uri.split_once('?') else {
        return uri.to_string();
    };
    let (query, fragment) = match query.split_once('#') {
        Some((q, f)) => (q, Some(f)),
        None => (query, None),
    };
    let mut out = format!("{base}?{}", redact_pairs(query, names));
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Redacts `name=value` pairs joined by `&`.
fn redact_pairs<S: AsRef<str>>(encoded: &str, names: &[S]) -> String {
    encoded
        .split('&')
        .map(|pair| {
            let name = pair.split_once('=').map_or(pair, |(n, _)| n);
            if names.iter().any(|rule| rule.as_ref() == name) {
                format!("{name}={REDACTED}")
            } else {
                pair.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn redact_body(
    body: &str,
    content_type: Option<&str>,
    rules: &SanitizeRules,
    side: &str,
) -> Result<String, EngineError> {
    if body.is_empty() || rules.body_fields.is_empty() {
        return Ok(body.to_string());
    }

    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        let mut changed = false;
        for path in &rules.body_fields {
            let segments: Vec<&str> = path.split('.').collect();
            changed |= redact_path(&mut value, &segments);
        }
        // A configured name at any other depth is redacted too.
        let leaves: Vec<&str> = rules.body_leaf_names().collect();
        changed |= redact_keys(&mut value, &leaves);
        if !changed {
            return Ok(body.to_string());
        }
        return serde_json::to_string(&value)
            .map_err(|e| EngineError::SanitizationIncomplete(format!("{side} body: {e}")));
    }

    let media_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if media_type == "application/x-www-form-urlencoded" {
        let leaves: Vec<&str> = rules.body_leaf_names().collect();
        return Ok(redact_pairs(body, leaves.as_slice()));
    }

    // Declared JSON that does not parse is replaced wholesale.
    if media_type.ends_with("json") {
        return Ok(format!("[REDACTED:{media_type}]"));
    }

    if let Some(leaf) = rules.body_leaf_names().find(|leaf| body.contains(leaf)) {
        let described = if media_type.is_empty() {
            "unknown content type"
        } else {
            media_type.as_str()
        };
        return Err(EngineError::SanitizationIncomplete(format!(
            "{side} body ({described}) mentions `{leaf}` but is not a decodable encoding"
        )));
    }

    Ok(body.to_string())
}

fn redact_path(value: &mut Value, segments: &[&str]) -> bool {
    match value {
        Value::Array(items) => {
            items.iter_mut().fold(false, |acc, item| redact_path(item, segments) | acc)
        }
        Value::Object(map) => {
            let Some((first, rest)) = segments.split_first() else {
                return false;
            };
            match map.get_mut(*first) {
                Some(child) if rest.is_empty() => {
                    *child = Value::String(REDACTED.to_string());
                    true
                }
                Some(child) => redact_path(child, rest),
                None => false,
            }
        }
        _ => false,
    }
}

/// Redacts every object member named in `leaves`, wherever it appears.
fn redact_keys(value: &mut Value, leaves: &[&str]) -> bool {
    match value {
        Value::Array(items) => {
            items.iter_mut().fold(false, |acc, item| redact_keys(item, leaves) | acc)
        }
        Value::Object(map) => map.iter_mut().fold(false, |acc, (key, child)| {
            if !leaves.contains(&key.as_str()) {
                return redact_keys(child, leaves) | acc;
            }
            if child.as_str() == Some(REDACTED) {
                return acc;
            }
            *child = Value::String(REDACTED.to_string());
            true
        }),
        _ => false,
    }
}
