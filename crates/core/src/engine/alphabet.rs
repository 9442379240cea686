//! Ordered, deduplicated symbol set used as the digit set for index decoding.

use serde::{Deserialize, Serialize};

use super::EngineError;

const DEFAULT_SYMBOLS: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

/// An ordered list of single-character symbols.
///
/// Serialized as a list of one-character strings, which is the shape task
/// messages carry on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Alphabet {
    symbols: Vec<char>,
}

impl Alphabet {
    /// Build an alphabet from one-character strings.
    pub fn new<I, S>(symbols: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut chars = Vec::new();
        for symbol in symbols {
            let symbol = symbol.as_ref();
            let mut it = symbol.chars();
            let c = match (it.next(), it.next()) {
                (Some(c), None) => c,
                _ => return Err(EngineError::InvalidSymbol(symbol.to_string())),
            };
            if chars.contains(&c) {
                return Err(EngineError::DuplicateSymbol(symbol.to_string()));
            }
            chars.push(c);
        }

        if chars.is_empty() {
            return Err(EngineError::EmptyAlphabet);
        }

        Ok(Self { symbols: chars })
    }

    /// Build an alphabet from the characters of a string, in order.
    pub fn from_chars(symbols: &str) -> Result<Self, EngineError> {
        Self::new(symbols.chars().map(String::from))
    }

    /// Number of symbols (the radix `k`).
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbol for a digit value. Panics if `digit >= len()`.
    pub fn symbol(&self, digit: usize) -> char {
        self.symbols[digit]
    }

    /// Digit value of a symbol.
    pub fn position(&self, c: char) -> Option<usize> {
        self.symbols.iter().position(|&s| s == c)
    }

    /// Symbols as a compact string.
    pub fn as_string(&self) -> String {
        self.symbols.iter().collect()
    }
}

impl Default for Alphabet {
    /// Lowercase latin letters followed by decimal digits (36 symbols).
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.chars().collect(),
        }
    }
}

impl TryFrom<Vec<String>> for Alphabet {
    type Error = EngineError;

    fn try_from(symbols: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(symbols)
    }
}

impl From<Alphabet> for Vec<String> {
    fn from(alphabet: Alphabet) -> Self {
        alphabet.symbols.iter().map(|c| c.to_string()).collect()
    }
}
