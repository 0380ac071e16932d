//! Identifier token validation

use parkgate_config::TokenRules;
use parkgate_util::IdentifierToken;
use thiserror::Error;

/// Why a raw scanner token was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("empty token")]
    Empty,

    #[error("token length {len} below minimum {min}")]
    TooShort { len: usize, min: usize },

    #[error("token length {len} above maximum {max}")]
    TooLong { len: usize, max: usize },

    #[error("invalid character {ch:?} at position {position}")]
    InvalidChar { ch: char, position: usize },
}

/// Turns raw scanner text into a normalized identifier token.
///
/// Never touches storage: matching a token to an open session happens inside
/// the store's atomic close.
#[derive(Debug, Clone, Copy)]
pub struct SessionMatcher {
    rules: TokenRules,
}

impl SessionMatcher {
    pub fn new(rules: TokenRules) -> Self {
        Self { rules }
    }

    /// Trim and upper-case without checking
    pub fn normalize(raw: &str) -> String {
        raw.trim().to_ascii_uppercase()
    }

    pub fn validate(&self, raw: &str) -> Result<IdentifierToken, FormatError> {
        let token = Self::normalize(raw);
        if token.is_empty() {
            return Err(FormatError::Empty);
        }

        if let Some((position, ch)) = token
            .chars()
            .enumerate()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
        {
            return Err(FormatError::InvalidChar { ch, position });
        }

        let len = token.len();
        if len < self.rules.min_len {
            return Err(FormatError::TooShort {
                len,
                min: self.rules.min_len,
            });
        }
        if len > self.rules.max_len {
            return Err(FormatError::TooLong {
                len,
                max: self.rules.max_len,
            });
        }

        Ok(IdentifierToken::new(token))
    }
}

impl Default for SessionMatcher {
    fn default() -> Self {
        Self::new(TokenRules::default())
    }
}
