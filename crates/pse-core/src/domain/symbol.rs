use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 15;

/// Normalized PSE stock symbol. Ordering is lexicographic on the normalized form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a symbol to uppercase.
    ///
    /// Listed boards use letters and digits with `.` or `-` suffixes (`2GO`, `BRN.P`).
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_uppercase();
        match normalized.chars().count() {
            0 => return Err(ValidationError::EmptySymbol),
            len if len > MAX_SYMBOL_LEN => {
                return Err(ValidationError::SymbolTooLong {
                    len,
                    max: MAX_SYMBOL_LEN,
                })
            }
            _ => {}
        }

        for (index, ch) in normalized.chars().enumerate() {
            let allowed = ch.is_ascii_alphanumeric() || (index > 0 && matches!(ch, '.' | '-'));
            if allowed {
                continue;
            }
            return Err(if index == 0 {
                ValidationError::SymbolInvalidStart { ch }
            } else {
                ValidationError::SymbolInvalidChar { ch, index }
            });
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_pse_tickers() {
        assert_eq!(Symbol::parse(" jfc ").expect("symbol").as_str(), "JFC");
        assert_eq!(Symbol::parse("brn.p").expect("symbol").as_str(), "BRN.P");
    }

    #[test]
    fn accepts_digit_start_but_not_punctuation_start() {
        assert_eq!(Symbol::parse("2go").expect("symbol").as_str(), "2GO");
        let err = Symbol::parse(".PR").expect_err("must fail");
        assert!(matches!(err, ValidationError::SymbolInvalidStart { ch: '.' }));
    }

    #[test]
    fn rejects_invalid_chars() {
        let err = Symbol::parse("AC EN").expect_err("must fail");
        assert_eq!(err, ValidationError::SymbolInvalidChar { ch: ' ', index: 2 });
    }

    #[test]
    fn orders_lexicographically() {
        let mut symbols = vec![
            Symbol::parse("SM").expect("symbol"),
            Symbol::parse("ALI").expect("symbol"),
            Symbol::parse("BDO").expect("symbol"),
        ];
        symbols.sort();
        let ordered: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
        assert_eq!(ordered, ["ALI", "BDO", "SM"]);
    }
}
