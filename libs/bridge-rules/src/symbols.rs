//! Positional symbols for status addresses
//!
//! The n-th declared address is referenced in formulas by the n-th symbol of
//! the sequence `a, b, ..., z, aa, ab, ..., zz, aaa, ...` (bijective base 26).
//! Symbols are limited to three letters, which caps a table at 18 278 addresses.

use crate::error::{EvaluationError, Result};
use std::collections::HashMap;

/// Number of distinct symbols of one to three letters
pub const MAX_SYMBOLS: usize = 26 + 26 * 26 + 26 * 26 * 26;

const MAX_SYMBOL_LEN: usize = 3;

/// Symbol for a zero-based address position
pub fn symbol_for_index(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        n -= 1;
        letters.push(b'a' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Zero-based position of a symbol, `None` for anything that is not a
/// one to three letter lowercase symbol
pub fn index_for_symbol(symbol: &str) -> Option<usize> {
    if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
        return None;
    }
    let mut acc = 0usize;
    for byte in symbol.bytes() {
        if !byte.is_ascii_lowercase() {
            return None;
        }
        acc = acc * 26 + usize::from(byte - b'a') + 1;
    }
    Some(acc - 1)
}

/// Ordered address list with its positional symbols
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    addresses: Vec<String>,
    positions: HashMap<String, usize>,
}

impl SymbolTable {
    /// Build from addresses in declaration order
    pub fn new<I, S>(addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addresses: Vec<String> = addresses.into_iter().map(Into::into).collect();
        if addresses.len() > MAX_SYMBOLS {
            return Err(EvaluationError::TooManyAddresses {
                count: addresses.len(),
                limit: MAX_SYMBOLS,
            });
        }

        let mut positions = HashMap::with_capacity(addresses.len());
        for (index, address) in addresses.iter().enumerate() {
            if positions.insert(address.clone(), index).is_some() {
                return Err(EvaluationError::DuplicateAddress(address.clone()));
            }
        }

        Ok(Self {
            addresses,
            positions,
        })
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Addresses in declaration order (the order bits must be read in)
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn position(&self, address: &str) -> Option<usize> {
        self.positions.get(address).copied()
    }

    pub fn symbol(&self, address: &str) -> Option<String> {
        self.position(address).map(symbol_for_index)
    }

    pub fn address(&self, symbol: &str) -> Option<&str> {
        index_for_symbol(symbol)
            .and_then(|index| self.addresses.get(index))
            .map(String::as_str)
    }

    /// Replace every `{ADDRESS}` placeholder with the address' symbol
    ///
    /// `"{M0}.{Y4}.(/{M3})"` with addresses `[M0, Y4, M3]` becomes `"a.b.(/c)"`.
    pub fn expand(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| EvaluationError::syntax(template, "unclosed '{' placeholder"))?;
            let address = after[..close].trim();
            let symbol = self
                .symbol(address)
                .ok_or_else(|| EvaluationError::UnknownAddress(address.to_string()))?;
            out.push_str(&symbol);
            rest = &after[close + 1..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_single_letter_symbols() {
        assert_eq!(symbol_for_index(0), "a");
        assert_eq!(symbol_for_index(1), "b");
        assert_eq!(symbol_for_index(25), "z");
    }

    #[test]
    fn test_overflow_continues_with_two_letters() {
        assert_eq!(symbol_for_index(26), "aa");
        assert_eq!(symbol_for_index(27), "ab");
        assert_eq!(symbol_for_index(51), "az");
        assert_eq!(symbol_for_index(52), "ba");
        assert_eq!(symbol_for_index(701), "zz");
        assert_eq!(symbol_for_index(702), "aaa");
        assert_eq!(symbol_for_index(MAX_SYMBOLS - 1), "zzz");
    }

    #[test]
    fn test_symbol_index_is_inverse() {
        for index in [0, 7, 25, 26, 100, 701, 702, 5000, MAX_SYMBOLS - 1] {
            assert_eq!(index_for_symbol(&symbol_for_index(index)), Some(index));
        }
    }

    #[test]
    fn test_invalid_symbols() {
        assert_eq!(index_for_symbol(""), None);
        assert_eq!(index_for_symbol("aaaa"), None);
        assert_eq!(index_for_symbol("A"), None);
        assert_eq!(index_for_symbol("a1"), None);
    }

    #[test]
    fn test_table_lookup_in_declaration_order() {
        let table = SymbolTable::new(["M1", "M0", "Y4", "M170", "M3", "TS4", "M799"]).unwrap();
        assert_eq!(table.symbol("M1").as_deref(), Some("a"));
        assert_eq!(table.symbol("M0").as_deref(), Some("b"));
        assert_eq!(table.symbol("M799").as_deref(), Some("g"));
        assert_eq!(table.address("c"), Some("Y4"));
        assert_eq!(table.symbol("X9"), None);
    }

    #[test]
    fn test_table_past_alphabet() {
        let addresses: Vec<String> = (0..30).map(|i| format!("M{}", i)).collect();
        let table = SymbolTable::new(addresses).unwrap();
        assert_eq!(table.symbol("M25").as_deref(), Some("z"));
        assert_eq!(table.symbol("M26").as_deref(), Some("aa"));
        assert_eq!(table.symbol("M29").as_deref(), Some("ad"));
        assert_eq!(table.address("ad"), Some("M29"));
    }

    #[test]
    fn test_table_limit() {
        let addresses: Vec<String> = (0..=MAX_SYMBOLS).map(|i| format!("D{}", i)).collect();
        assert_eq!(
            SymbolTable::new(addresses),
            Err(EvaluationError::TooManyAddresses {
                count: MAX_SYMBOLS + 1,
                limit: MAX_SYMBOLS
            })
        );
    }

    #[test]
    fn test_duplicate_address_rejected() {
        assert_eq!(
            SymbolTable::new(["M0", "M1", "M0"]),
            Err(EvaluationError::DuplicateAddress("M0".to_string()))
        );
    }

    #[test]
    fn test_expand_placeholders() {
        let table = SymbolTable::new(["M0", "Y4", "M3", "TS10"]).unwrap();
        assert_eq!(
            table.expand("{M0}.{Y4}.(/{M3}).(/{TS10})").unwrap(),
            "a.b.(/c).(/d)"
        );
        assert_eq!(table.expand("a | b").unwrap(), "a | b");
        assert_eq!(
            table.expand("{M9}"),
            Err(EvaluationError::UnknownAddress("M9".to_string()))
        );
        assert!(matches!(
            table.expand("{M0"),
            Err(EvaluationError::Syntax { .. })
        ));
    }
}
