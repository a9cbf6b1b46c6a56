//! Instruction tag constants for the nft-loans program.
//!
//! The first byte of every instruction's data is one of these tags.
//! Clients and indexers decode against the same table, so a tag number
//! is never reordered, removed or reused. New instructions are appended.

pub const TAG_INITIALIZE: u8 = 0;
pub const TAG_CREATE_ORDER: u8 = 1;
pub const TAG_GIVE_LOAN: u8 = 2;
pub const TAG_PAYBACK: u8 = 3;
pub const TAG_CANCEL_ORDER: u8 = 4;
pub const TAG_LIQUIDATE: u8 = 5;
/// Move accrued protocol fees out of a market's settlement vault.
pub const TAG_SWEEP_FEES: u8 = 6;
