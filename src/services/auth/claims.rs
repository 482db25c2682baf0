//! Claim normalization.
//!
//! Tokens from different issuers disagree on claim shapes: timestamps show up
//! as numbers or one-element arrays, scopes as space-delimited strings or
//! arrays of such strings. Everything downstream (principal conversion,
//! authority derivation) reads the canonical shapes produced here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub const ISSUED_AT: &str = "iat";
pub const EXPIRES_AT: &str = "exp";
pub const SCOPE_CLAIMS: [&str; 2] = ["scope", "scp"];

/// A single claim after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    Instant(DateTime<Utc>),
    List(Vec<String>),
    Value(Value),
}

impl Claim {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Claim::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Claim::Instant(at) => Some(*at),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Claim::List(items) => Some(items),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("claim '{0}' must contain only strings")]
    NonStringScope(&'static str),
}

/// Claims of one decoded token, in canonical shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedClaims {
    claims: BTreeMap<String, Claim>,
}

impl NormalizedClaims {
    pub fn get(&self, name: &str) -> Option<&Claim> {
        self.claims.get(name)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.get("iss").and_then(Claim::as_str)
    }

    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(Claim::as_str)
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.get(ISSUED_AT).and_then(Claim::as_instant)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.get(EXPIRES_AT).and_then(Claim::as_instant)
    }

    /// Tokens of `scope` followed by `scp`, order and duplicates kept.
    pub fn scopes(&self) -> Vec<&str> {
        SCOPE_CLAIMS
            .iter()
            .filter_map(|name| self.get(name).and_then(Claim::as_list))
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// Reshape a raw claim object into [`NormalizedClaims`].
pub fn normalize(raw: Map<String, Value>) -> Result<NormalizedClaims, NormalizeError> {
    let mut claims = BTreeMap::new();

    for (name, value) in raw {
        let claim = match name.as_str() {
            ISSUED_AT | EXPIRES_AT => normalize_timestamp(value),
            "scope" => normalize_scope("scope", value)?,
            "scp" => normalize_scope("scp", value)?,
            _ => Claim::Value(value),
        };
        claims.insert(name, claim);
    }

    Ok(NormalizedClaims { claims })
}

/// Seconds since epoch, or a one-element collection of them, becomes an
/// instant. Anything else (including multi-element collections) is kept as is.
pub fn normalize_timestamp(value: Value) -> Claim {
    let seconds = match &value {
        Value::Number(n) => n.as_i64(),
        Value::Array(items) if items.len() == 1 => items[0].as_i64(),
        _ => None,
    };

    match seconds.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)) {
        Some(at) => Claim::Instant(at),
        None => Claim::Value(value),
    }
}

/// Split a scope claim on whitespace into an ordered list. Arrays are split
/// element by element and flattened.
pub fn normalize_scope(name: &'static str, value: Value) -> Result<Claim, NormalizeError> {
    match value {
        Value::String(s) => Ok(Claim::List(split_whitespace(&s))),
        Value::Array(items) => {
            let mut scopes = Vec::new();
            for item in items {
                let Value::String(s) = item else {
                    return Err(NormalizeError::NonStringScope(name));
                };
                scopes.extend(split_whitespace(&s));
            }
            Ok(Claim::List(scopes))
        }
        other => Ok(Claim::Value(other)),
    }
}

fn split_whitespace(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}
