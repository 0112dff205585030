//! Decides whether a live request corresponds to a recorded interaction.
//!
//! Matching is order-stable: the first interaction in the cassette that
//! satisfies every active criterion wins, even when later interactions
//! would also match. There is no partial credit.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::format::{header_value, HttpRequest, Interaction};
use crate::error::EngineError;

/// How one field of a live request is compared against a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Criterion {
    /// Values must be byte-for-byte equal (both absent counts as equal).
    Exact,
    /// Both sides must carry a non-empty value; content is not compared.
    Exists,
    /// Both sides must match the regular expression.
    Pattern(String),
    /// The field is not compared.
    Ignore,
}

impl TryFrom<String> for Criterion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "exact" => Ok(Self::Exact),
            "exists" => Ok(Self::Exists),
            "ignore" => Ok(Self::Ignore),
            other => other.strip_prefix("pattern:").map_or_else(
                || {
                    Err(format!(
                        "unknown match criterion `{other}` (expected exact, exists, ignore, \
                         or pattern:<regex>)"
                    ))
                },
                |pattern| Ok(Self::Pattern(pattern.to_string())),
            ),
        }
    }
}

impl From<Criterion> for String {
    fn from(value: Criterion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => f.write_str("exact"),
            Self::Exists => f.write_str("exists"),
            Self::Ignore => f.write_str("ignore"),
            Self::Pattern(p) => write!(f, "pattern:{p}"),
        }
    }
}

/// Which request fields take part in matching, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchCriteria {
    /// HTTP method criterion.
    pub method: Criterion,
    /// Request URI criterion.
    pub uri: Criterion,
    /// Query parameters dropped from both URIs before comparison.
    pub ignore_query_params: Vec<String>,
    /// Per-header criteria keyed by header name. Headers not listed are
    /// not compared.
    pub headers: BTreeMap<String, Criterion>,
    /// Request body criterion.
    pub body: Criterion,
}

impl Default for MatchCriteria {
    fn default() -> Self {
        Self {
            method: Criterion::Exact,
            uri: Criterion::Exact,
            ignore_query_params: Vec::new(),
            headers: BTreeMap::new(),
            body: Criterion::Exact,
        }
    }
}

/// Result of a lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum MatchOutcome<'a> {
    /// The first satisfying interaction and its position in the cassette.
    Matched {
        /// Index within the candidate list.
        index: usize,
        /// The stored interaction.
        interaction: &'a Interaction,
    },
    /// No interaction satisfied every criterion.
    NoMatch,
}

enum Compiled {
    Exact,
    Exists,
    Pattern(Regex),
    Ignore,
}

impl Compiled {
    fn new(criterion: &Criterion, field: &str) -> Result<Self, EngineError> {
        Ok(match criterion {
            Criterion::Exact => Self::Exact,
            Criterion::Exists => Self::Exists,
            Criterion::Ignore => Self::Ignore,
            Criterion::Pattern(p) => Self::Pattern(Regex::new(p).map_err(|e| {
                EngineError::Config(format!("invalid match pattern for {field}: {e}"))
            })?),
        })
    }

    fn accepts(&self, live: Option<&str>, stored: Option<&str>) -> bool {
        let present = |v: Option<&str>| v.is_some_and(|s| !s.is_empty());
        match self {
            Self::Exact => live == stored,
            Self::Exists => present(live) && present(stored),
            Self::Pattern(re) => {
                live.is_some_and(|v| re.is_match(v)) && stored.is_some_and(|v| re.is_match(v))
            }
            Self::Ignore => true,
        }
    }
}

/// Compiled form of [`MatchCriteria`].
pub struct Matcher {
    method: Compiled,
    uri: Compiled,
    ignore_query_params: Vec<String>,
    headers: Vec<(String, Compiled)>,
    body: Compiled,
}

impl Matcher {
    /// Compiles the criteria, validating every pattern up front.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if a pattern is not a valid regex.
    pub fn new(criteria: &MatchCriteria) -> Result<Self, EngineError> {
        let headers = criteria
            .headers
            .iter()
            .map(|(name, c)| Ok((name.clone(), Compiled::new(c, &format!("header {name}"))?)))
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(Self {
            method: Compiled::new(&criteria.method, "method")?,
            uri: Compiled::new(&criteria.uri, "uri")?,
            ignore_query_params: criteria.ignore_query_params.clone(),
            headers,
            body: Compiled::new(&criteria.body, "body")?,
        })
    }

    /// Finds the first candidate satisfying every active criterion.
    #[must_use]
    pub fn find<'a>(&self, live: &HttpRequest, candidates: &'a [Interaction]) -> MatchOutcome<'a> {
        let live_uri = strip_query_params(&live.uri, &self.ignore_query_params);
        for (index, candidate) in candidates.iter().enumerate() {
            if self.satisfies(live, &live_uri, candidate) {
                debug!(index, method = %live.method, uri = %live.uri, "matched interaction");
                return MatchOutcome::Matched { index, interaction: candidate };
            }
        }
        debug!(method = %live.method, uri = %live.uri, candidates = candidates.len(), "no match");
        MatchOutcome::NoMatch
    }

    fn satisfies(&self, live: &HttpRequest, live_uri: &str, stored: &Interaction) -> bool {
        if !self.method.accepts(Some(live.method.as_str()), Some(stored.method.as_str())) {
            return false;
        }
        let stored_uri = strip_query_params(&stored.uri, &self.ignore_query_params);
        if !self.uri.accepts(Some(live_uri), Some(stored_uri.as_str())) {
            return false;
        }
        let headers_ok = self.headers.iter().all(|(name, rule)| {
            rule.accepts(
                header_value(&live.headers, name),
                header_value(&stored.request_headers, name),
            )
        });
        headers_ok
            && self.body.accepts(Some(live.body.as_str()), Some(stored.request_body.as_str()))
    }
}

/// Convenience wrapper compiling `criteria` and running one lookup.
///
/// # Errors
///
/// Returns [`EngineError::Config`] if a pattern is not a valid regex.
pub fn find_match<'a>(
    live: &HttpRequest,
    candidates: &'a [Interaction],
    criteria: &MatchCriteria,
) -> Result<MatchOutcome<'a>, EngineError> {
    Ok(Matcher::new(criteria)?.find(live, candidates))
}

fn strip_query_params(uri: &str, names: &[String]) -> String {
    if names.is_empty() {
        return uri.to_string();
    }
    let Some((base, query)) = uri.split_once('?') else {
        return uri.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(n, _)| n);
            !names.iter().any(|n| n == name)
        })
        .collect();
    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{}", kept.join("&"))
    }
}
