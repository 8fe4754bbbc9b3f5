//! Synthetic-market symbol convention.
//!
//! Markets for synthetic or leveraged variants of an underlying carry a
//! single lowercase prefix letter (`k`, `t` or `m`) in front of the plain
//! symbol. Price lookups strip the prefix; metadata lookups expand a plain
//! symbol to every variant. Both directions live here so the convention has
//! exactly one home.

const SYNTHETIC_PREFIXES: [char; 3] = ['k', 't', 'm'];

/// Strips one leading synthetic prefix letter, if present.
pub fn strip_synthetic_prefix(symbol: &str) -> &str {
    let mut chars = symbol.chars();
    match chars.next() {
        Some(first) if SYNTHETIC_PREFIXES.contains(&first) && chars.next().is_some() => {
            &symbol[first.len_utf8()..]
        }
        _ => symbol,
    }
}

/// Expands a plain symbol to the four names a matching market may be seeded
/// under.
pub fn synthetic_variants(symbol: &str) -> [String; 4] {
    [
        symbol.to_string(),
        format!("k{}", symbol),
        format!("t{}", symbol),
        format!("m{}", symbol),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_prefixes() {
        assert_eq!(strip_synthetic_prefix("kBTC"), "BTC");
        assert_eq!(strip_synthetic_prefix("tETH"), "ETH");
        assert_eq!(strip_synthetic_prefix("mSOL"), "SOL");
    }

    #[test]
    fn leaves_plain_symbols_alone() {
        assert_eq!(strip_synthetic_prefix("BTC"), "BTC");
        assert_eq!(strip_synthetic_prefix("USDC"), "USDC");
        // A bare prefix letter is a symbol, not a prefix.
        assert_eq!(strip_synthetic_prefix("k"), "k");
        assert_eq!(strip_synthetic_prefix(""), "");
    }

    #[test]
    fn strips_only_one_letter() {
        assert_eq!(strip_synthetic_prefix("ktBTC"), "tBTC");
    }

    #[test]
    fn expands_all_variants() {
        let variants = synthetic_variants("BTC");
        assert_eq!(variants, ["BTC", "kBTC", "tBTC", "mBTC"]);
    }
}
