//! Address-format chain detection
//!
//! A chain hint always wins. Without one, the address shape narrows the
//! candidates: a 40-hex `0x` address is EVM but cannot name the subfamily, a
//! 64-hex `0x` address is Aptos or Sui, base58 of the right length is Solana,
//! and a `stark` prefix is Starknet. Ambiguity is an error the caller resolves
//! by passing `chain`.

use bugbot_core::models::Chain;
use bugbot_core::{Error, Result};

/// EVM subfamilies indistinguishable by address format.
const EVM_CANDIDATES: [Chain; 6] = [
    Chain::Ethereum,
    Chain::Bsc,
    Chain::Polygon,
    Chain::Arbitrum,
    Chain::Optimism,
    Chain::Avalanche,
];

/// Resolve the chain for an address, honoring an explicit hint.
pub fn detect_chain(address: &str, hint: Option<Chain>) -> Result<Chain> {
    if let Some(chain) = hint {
        return Ok(chain);
    }

    let address = address.trim();

    if let Some(hex) = address.strip_prefix("0x") {
        if hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidRequest(format!(
                "ambiguous_evm: address matches {}; pass chain to disambiguate",
                candidate_list(&EVM_CANDIDATES)
            )));
        }
        if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidRequest(
                "ambiguous address: matches aptos, sui; pass chain to disambiguate".to_string(),
            ));
        }
    }

    if address.starts_with("stark") {
        return Ok(Chain::Starknet);
    }

    if (32..=44).contains(&address.len()) && bs58::decode(address).into_vec().is_ok() {
        return Ok(Chain::Solana);
    }

    Err(Error::InvalidRequest(format!(
        "unrecognized address format '{}'",
        truncate(address)
    )))
}

fn candidate_list(chains: &[Chain]) -> String {
    chains
        .iter()
        .map(Chain::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncate(address: &str) -> String {
    if address.len() > 24 {
        format!("{}...", &address[..24])
    } else {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hint_always_wins() {
        let detected = detect_chain("0xdAC17F958D2ee523a2206206994597C13D831ec7", Some(Chain::Bsc));
        assert_eq!(detected.ok(), Some(Chain::Bsc));
    }

    #[test]
    fn bare_evm_addresses_are_ambiguous() {
        let err = detect_chain("0xdAC17F958D2ee523a2206206994597C13D831ec7", None).unwrap_err();
        assert!(err.to_string().contains("ambiguous_evm"));
    }

    #[test]
    fn sixty_four_hex_is_aptos_or_sui() {
        let addr = format!("0x{}", "a1".repeat(32));
        let err = detect_chain(&addr, None).unwrap_err();
        assert!(err.to_string().contains("aptos, sui"));
        assert_eq!(detect_chain(&addr, Some(Chain::Sui)).ok(), Some(Chain::Sui));
    }

    #[test]
    fn base58_detects_solana() {
        let detected = detect_chain("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA", None);
        assert_eq!(detected.ok(), Some(Chain::Solana));
    }

    #[test]
    fn stark_prefix_detects_starknet() {
        assert_eq!(detect_chain("stark1234abcd", None).ok(), Some(Chain::Starknet));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(detect_chain("definitely-not-an-address!", None).is_err());
    }
}
