//! Margin-program instruction encoders.
//!
//! Instruction data is a little-endian u32 discriminator followed by the
//! operation's fields. Account index layouts mirror the program's expected
//! account lists; the order client assembles the matching account vectors.

use crate::solana::tx::{Instruction, InstructionData};
use crate::trading::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginInstruction {
    PlaceSpotOrder = 9,
    SettleFunds = 19,
    CancelSpotOrder = 20,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTradeBehavior {
    DecrementTake = 0,
}

fn side_code(side: Side) -> u32 {
    match side {
        Side::Bid => 0,
        Side::Ask => 1,
    }
}

fn order_type_code() -> u32 {
    // ImmediateOrCancel in the program's order-type enum.
    1
}

/// Place a spot order through the margin program.
#[allow(clippy::too_many_arguments)]
pub fn place_spot_order(
    program_id_index: u8,
    account_indices: Vec<u8>,
    side: Side,
    limit_price_lots: u64,
    max_base_lots: u64,
    max_quote_including_fees: u64,
    client_order_id: u64,
) -> Instruction {
    Instruction {
        program_id_index,
        account_indices,
        data: InstructionData::new()
            .u32(MarginInstruction::PlaceSpotOrder as u32)
            .u32(side_code(side))
            .u64(limit_price_lots)
            .u64(max_base_lots)
            .u64(max_quote_including_fees)
            .u32(SelfTradeBehavior::DecrementTake as u32)
            .u32(order_type_code())
            .u64(client_order_id)
            .u16(u16::MAX) // match-iteration limit
            .build(),
    }
}

/// Cancel a resting spot order by its 128-bit order id
/// (sequence number in the upper half, price lots in the lower).
pub fn cancel_spot_order(
    program_id_index: u8,
    account_indices: Vec<u8>,
    side: Side,
    sequence_number: u64,
    limit_price_lots: u64,
) -> Instruction {
    Instruction {
        program_id_index,
        account_indices,
        data: InstructionData::new()
            .u32(MarginInstruction::CancelSpotOrder as u32)
            .u32(side_code(side))
            .u64(sequence_number)
            .u64(limit_price_lots)
            .build(),
    }
}

/// Settle free funds from the dex open-orders account back to the margin
/// account's banks.
pub fn settle_funds(program_id_index: u8, account_indices: Vec<u8>) -> Instruction {
    Instruction {
        program_id_index,
        account_indices,
        data: InstructionData::new()
            .u32(MarginInstruction::SettleFunds as u32)
            .build(),
    }
}
