//! SPL token mint layout (the slice of it reference data needs).

use crate::core::Pubkey;
use crate::error::Result;
use crate::solana::layout::Cursor;

pub const MINT_ACCOUNT_SIZE: usize = 82;

#[derive(Debug, Clone)]
pub struct MintAccount {
    pub mint_authority: Option<Pubkey>,
    pub supply: u64,
    pub decimals: u8,
    pub is_initialized: bool,
}

impl MintAccount {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        // COption<Pubkey>: 4-byte tag then the key bytes either way.
        let authority_tag = cursor.u32()?;
        let authority = cursor.pubkey()?;
        let supply = cursor.u64()?;
        let decimals = cursor.u8()?;
        let is_initialized = cursor.bool()?;

        Ok(Self {
            mint_authority: (authority_tag == 1).then_some(authority),
            supply,
            decimals,
            is_initialized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mint_decimals() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&[7u8; 32]);
        data.extend_from_slice(&1_000_000u64.to_le_bytes());
        data.push(6);
        data.push(1);
        data.extend_from_slice(&[0u8; 36]); // freeze authority

        let mint = MintAccount::parse(&data).unwrap();
        assert_eq!(mint.decimals, 6);
        assert!(mint.is_initialized);
        assert!(mint.mint_authority.is_some());
    }

    #[test]
    fn absent_authority_is_none() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&[0u8; 32]);
        data.extend_from_slice(&0u64.to_le_bytes());
        data.push(9);
        data.push(1);

        let mint = MintAccount::parse(&data).unwrap();
        assert!(mint.mint_authority.is_none());
        assert_eq!(mint.decimals, 9);
    }
}
