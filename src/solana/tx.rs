//! Wire-exact transaction assembly.
//!
//! The serialized form is byte-identical for identical inputs:
//! `compact-u16(n_sigs) || signatures || message`, where
//! `message = header || compact-u16 account keys || recent blockhash ||
//! compact-u16 instructions`. Accounts are laid out signing-writable,
//! signing-readonly, non-signing-writable, non-signing-readonly; the
//! builder performs no deduplication, so callers must not list a key
//! twice.

use crate::core::{Hash32, Keypair, Pubkey, Signature, SIGNATURE_LEN};
use crate::error::{Error, Result};

pub const MAX_TRANSACTION_SIZE: usize = 1232;
const COMPACT_U16_MAX: u16 = 0x3fff;

/// Encode a compact-u16 length prefix. One byte below 0x80, two bytes below
/// 0x4000; larger values are refused (three-byte form is never produced).
pub fn encode_compact_u16(value: u16, out: &mut Vec<u8>) -> Result<()> {
    if value < 0x80 {
        out.push(value as u8);
    } else if value <= COMPACT_U16_MAX {
        out.push(0x80 | (value & 0x7f) as u8);
        out.push(((value >> 7) & 0x7f) as u8);
    } else {
        return Err(Error::PreconditionFailed(format!(
            "compact-u16 value {} exceeds {}",
            value, COMPACT_U16_MAX
        )));
    }
    Ok(())
}

/// Decode a compact-u16, returning the value and consumed byte count.
pub fn decode_compact_u16(bytes: &[u8]) -> Result<(u16, usize)> {
    let first = *bytes
        .first()
        .ok_or_else(|| Error::Deserialize("empty compact-u16".into()))?;
    if first & 0x80 == 0 {
        return Ok((first as u16, 1));
    }
    let second = *bytes
        .get(1)
        .ok_or_else(|| Error::Deserialize("truncated compact-u16".into()))?;
    if second & 0x80 != 0 {
        return Err(Error::Deserialize(
            "three-byte compact-u16 is not supported".into(),
        ));
    }
    Ok((((second as u16) << 7) | (first & 0x7f) as u16, 2))
}

/// One instruction: program id index into the account vector, account
/// index array, and opaque data.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

impl Instruction {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.push(self.program_id_index);
        encode_compact_u16(self.account_indices.len() as u16, out)?;
        out.extend_from_slice(&self.account_indices);
        encode_compact_u16(self.data.len() as u16, out)?;
        out.extend_from_slice(&self.data);
        Ok(())
    }
}

/// Little-endian instruction-data writer.
#[derive(Debug, Default)]
pub struct InstructionData(Vec<u8>);

impl InstructionData {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.0.push(value);
        self
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn pubkey(mut self, key: &Pubkey) -> Self {
        self.0.extend_from_slice(key.as_bytes());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.0
    }
}

/// Build and sign a transaction. Signatures cover exactly the message
/// region; one signature per signing key, in account-vector order.
pub fn build_transaction(
    recent_blockhash: &Hash32,
    signing_writable: &[&Keypair],
    signing_readonly: &[&Keypair],
    writable: &[Pubkey],
    readonly: &[Pubkey],
    instructions: &[Instruction],
) -> Result<Vec<u8>> {
    let n_signers = signing_writable.len() + signing_readonly.len();
    let n_accounts = n_signers + writable.len() + readonly.len();
    if n_signers == 0 {
        return Err(Error::PreconditionFailed(
            "a transaction requires at least one signer".into(),
        ));
    }
    if n_accounts > u8::MAX as usize {
        return Err(Error::PreconditionFailed(format!(
            "too many accounts: {}",
            n_accounts
        )));
    }

    // Message: header, accounts, blockhash, instructions.
    let mut message = Vec::with_capacity(256);
    message.push(n_signers as u8);
    message.push(signing_readonly.len() as u8);
    message.push(readonly.len() as u8);

    encode_compact_u16(n_accounts as u16, &mut message)?;
    for keypair in signing_writable {
        message.extend_from_slice(keypair.pubkey().as_bytes());
    }
    for keypair in signing_readonly {
        message.extend_from_slice(keypair.pubkey().as_bytes());
    }
    for key in writable {
        message.extend_from_slice(key.as_bytes());
    }
    for key in readonly {
        message.extend_from_slice(key.as_bytes());
    }

    message.extend_from_slice(recent_blockhash.as_bytes());

    encode_compact_u16(instructions.len() as u16, &mut message)?;
    for instruction in instructions {
        instruction.encode(&mut message)?;
    }

    // Signatures over the message region.
    let mut transaction = Vec::with_capacity(message.len() + n_signers * SIGNATURE_LEN + 2);
    encode_compact_u16(n_signers as u16, &mut transaction)?;
    for keypair in signing_writable.iter().chain(signing_readonly.iter()) {
        transaction.extend_from_slice(&keypair.sign(&message).0);
    }
    transaction.extend_from_slice(&message);

    if transaction.len() > MAX_TRANSACTION_SIZE {
        return Err(Error::PreconditionFailed(format!(
            "serialized transaction is {} bytes, limit is {}",
            transaction.len(),
            MAX_TRANSACTION_SIZE
        )));
    }
    Ok(transaction)
}

/// Offset of the message region in a serialized transaction.
pub fn message_offset(transaction: &[u8]) -> Result<usize> {
    let (n_sigs, prefix) = decode_compact_u16(transaction)?;
    Ok(prefix + n_sigs as usize * SIGNATURE_LEN)
}

/// Extract the i-th signature of a serialized transaction.
pub fn signature_at(transaction: &[u8], index: usize) -> Result<Signature> {
    let (n_sigs, prefix) = decode_compact_u16(transaction)?;
    if index >= n_sigs as usize {
        return Err(Error::InvalidArgument(format!(
            "signature index {} out of {}",
            index, n_sigs
        )));
    }
    let start = prefix + index * SIGNATURE_LEN;
    let bytes: [u8; SIGNATURE_LEN] = transaction[start..start + SIGNATURE_LEN]
        .try_into()
        .map_err(|_| Error::Deserialize("truncated transaction".into()))?;
    Ok(Signature(bytes))
}

/// System-program instruction encoders used by account provisioning.
pub mod system_instruction {
    use super::{Instruction, InstructionData};
    use crate::core::Pubkey;

    /// `Transfer { lamports }`: funding account and recipient are both
    /// writable, funding account signs.
    pub fn transfer(
        program_id_index: u8,
        from_index: u8,
        to_index: u8,
        lamports: u64,
    ) -> Instruction {
        Instruction {
            program_id_index,
            account_indices: vec![from_index, to_index],
            data: InstructionData::new().u32(2).u64(lamports).build(),
        }
    }

    /// `CreateAccount { lamports, space, owner }`.
    pub fn create_account(
        program_id_index: u8,
        from_index: u8,
        new_account_index: u8,
        lamports: u64,
        space: u64,
        owner: &Pubkey,
    ) -> Instruction {
        Instruction {
            program_id_index,
            account_indices: vec![from_index, new_account_index],
            data: InstructionData::new()
                .u32(0)
                .u64(lamports)
                .u64(space)
                .pubkey(owner)
                .build(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Keypair;

    #[test]
    fn compact_u16_literal_encodings() {
        let cases: &[(u16, &[u8])] = &[
            (0, &[0x00]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (16383, &[0xff, 0x7f]),
        ];
        for (value, expected) in cases {
            let mut out = Vec::new();
            encode_compact_u16(*value, &mut out).unwrap();
            assert_eq!(out.as_slice(), *expected, "encoding of {}", value);
        }
    }

    #[test]
    fn compact_u16_round_trips() {
        for value in 0u16..0x4000 {
            let mut out = Vec::new();
            encode_compact_u16(value, &mut out).unwrap();
            let (decoded, consumed) = decode_compact_u16(&out).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, out.len());
        }
    }

    #[test]
    fn compact_u16_rejects_large_values() {
        let mut out = Vec::new();
        assert!(encode_compact_u16(0x4000, &mut out).is_err());
        assert!(encode_compact_u16(u16::MAX, &mut out).is_err());
    }

    fn sample_transaction(kp_a: &Keypair, kp_b: &Keypair) -> Vec<u8> {
        let blockhash = Hash32::new([7u8; 32]);
        let writable = [Hash32::new([1u8; 32])];
        let readonly = [Hash32::new([2u8; 32])];
        let transfer = system_instruction::transfer(3, 0, 2, 1_000_000);
        build_transaction(
            &blockhash,
            &[kp_a, kp_b],
            &[],
            &writable,
            &readonly,
            &[transfer],
        )
        .unwrap()
    }

    #[test]
    fn builds_are_deterministic() {
        let kp_a = Keypair::from_secret_bytes(&[11u8; 32]);
        let kp_b = Keypair::from_secret_bytes(&[22u8; 32]);
        let first = sample_transaction(&kp_a, &kp_b);
        let second = sample_transaction(&kp_a, &kp_b);
        assert_eq!(first, second);
    }

    #[test]
    fn signatures_verify_over_message_region() {
        let kp_a = Keypair::from_secret_bytes(&[11u8; 32]);
        let kp_b = Keypair::from_secret_bytes(&[22u8; 32]);
        let tx = sample_transaction(&kp_a, &kp_b);

        // Two signers: 1-byte count prefix + 2 * 64 signature bytes.
        let offset = message_offset(&tx).unwrap();
        assert_eq!(offset, 1 + 2 * SIGNATURE_LEN);

        let message = &tx[offset..];
        assert!(signature_at(&tx, 0).unwrap().verify(message, &kp_a.pubkey()));
        assert!(signature_at(&tx, 1).unwrap().verify(message, &kp_b.pubkey()));
        // Swapped keys must fail.
        assert!(!signature_at(&tx, 0).unwrap().verify(message, &kp_b.pubkey()));
    }

    #[test]
    fn message_layout_is_exact() {
        let kp = Keypair::from_secret_bytes(&[1u8; 32]);
        let blockhash = Hash32::new([9u8; 32]);
        let readonly = [Hash32::new([3u8; 32])];
        let instruction = Instruction {
            program_id_index: 1,
            account_indices: vec![0],
            data: vec![0xAA, 0xBB],
        };
        let tx = build_transaction(&blockhash, &[&kp], &[], &[], &readonly, &[instruction])
            .unwrap();

        let message = &tx[message_offset(&tx).unwrap()..];
        // Header: 1 signer, 0 readonly-signed, 1 readonly-unsigned.
        assert_eq!(&message[..3], &[1, 0, 1]);
        // Account count then keys: signer first, readonly last.
        assert_eq!(message[3], 2);
        assert_eq!(&message[4..36], kp.pubkey().as_bytes());
        assert_eq!(&message[36..68], readonly[0].as_bytes());
        // Blockhash follows the account vector.
        assert_eq!(&message[68..100], blockhash.as_bytes());
        // Instruction array: count, program index, indices, data.
        assert_eq!(
            &message[100..],
            &[1, 1, 1, 0, 2, 0xAA, 0xBB]
        );
    }

    #[test]
    fn system_instruction_encodings() {
        let transfer = system_instruction::transfer(3, 0, 2, 1_000_000);
        assert_eq!(transfer.account_indices, vec![0, 2]);
        assert_eq!(&transfer.data[..4], &2u32.to_le_bytes());
        assert_eq!(&transfer.data[4..], &1_000_000u64.to_le_bytes());

        let owner = Hash32::new([8u8; 32]);
        let create = system_instruction::create_account(3, 0, 1, 2_039_280, 165, &owner);
        assert_eq!(&create.data[..4], &0u32.to_le_bytes());
        assert_eq!(&create.data[4..12], &2_039_280u64.to_le_bytes());
        assert_eq!(&create.data[12..20], &165u64.to_le_bytes());
        assert_eq!(&create.data[20..], owner.as_bytes());
    }

    #[test]
    fn oversize_transaction_is_rejected() {
        let kp = Keypair::from_secret_bytes(&[5u8; 32]);
        let blockhash = Hash32::new([0u8; 32]);
        let instruction = Instruction {
            program_id_index: 0,
            account_indices: vec![0],
            data: vec![0u8; 1300],
        };
        let result = build_transaction(&blockhash, &[&kp], &[], &[], &[], &[instruction]);
        assert!(matches!(result, Err(Error::PreconditionFailed(_))));
    }

    #[test]
    fn unsigned_transaction_is_rejected() {
        let blockhash = Hash32::new([0u8; 32]);
        let result = build_transaction(&blockhash, &[], &[], &[], &[], &[]);
        assert!(matches!(result, Err(Error::PreconditionFailed(_))));
    }
}
