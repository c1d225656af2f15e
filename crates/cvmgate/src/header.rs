use crate::error::TokenError;
use miniserde::json::{Object, Value};

/// JWS protected header
///
/// Keeps every header parameter so callers can report the full header, and
/// exposes the ones the verifier needs.
#[derive(Debug, Clone)]
pub struct TokenHeader {
    fields: Object,
}

impl TokenHeader {
    /// Parse a header JSON object; `alg` must be a string
    pub(crate) fn from_json(json: &str) -> Result<Self, TokenError> {
        let fields: Object = miniserde::json::from_str(json)
            .map_err(|e| TokenError::Malformed(format!("header is not a JSON object: {e}")))?;

        match fields.get("alg") {
            Some(Value::String(_)) => {}
            _ => return Err(TokenError::Malformed("header missing 'alg'".into())),
        }
        if let Some(kid) = fields.get("kid") {
            if !matches!(kid, Value::String(_) | Value::Null) {
                return Err(TokenError::Malformed("header 'kid' must be a string".into()));
            }
        }

        Ok(Self { fields })
    }

    /// Signing algorithm (`alg`)
    pub fn algorithm(&self) -> &str {
        self.string("alg").unwrap_or_default()
    }

    /// Key ID (`kid`) used to select the signing key
    pub fn key_id(&self) -> Option<&str> {
        self.string("kid")
    }

    /// Token type (`typ`)
    pub fn token_type(&self) -> Option<&str> {
        self.string("typ")
    }

    /// Any header parameter by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn as_object(&self) -> &Object {
        &self.fields
    }

    pub fn to_json(&self) -> String {
        miniserde::json::to_string(&self.fields)
    }

    fn string(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}
