//! NFT Loans: single-file Solana program for NFT-collateralized lending.
//!
//! A borrower locks a unique asset (an SPL mint with supply 1) plus optional
//! extra reference-token collateral and asks for a fixed loan. A lender funds
//! it. The borrower then repays principal plus interest, with the protocol
//! fee carved out of the lender's interest. Once the period has elapsed
//! without repayment the lender takes the collateral instead.

#![deny(unsafe_code)]

use solana_program::declare_id;

declare_id!("NFTLoans11111111111111111111111111111111111");

/// Instruction tag constants, shared with off-chain callers.
#[path = "tags.rs"]
pub mod tags;

// 1. mod constants
pub mod constants {
    use core::mem::size_of;
    use crate::state::{Configuration, Order};

    pub const CONFIG_MAGIC: u64 = 0x4e46544c4f414e43; // "NFTLOANC"
    pub const ORDER_MAGIC: u64 = 0x4e46544c4f414e4f; // "NFTLOANO"
    pub const VERSION: u32 = 1;

    pub const CONFIG_LEN: usize = size_of::<Configuration>();
    pub const ORDER_LEN: usize = size_of::<Order>();
    const _: [(); 152] = [(); CONFIG_LEN];
    const _: [(); 232] = [(); ORDER_LEN];

    pub const CONFIG_SEED: &[u8] = b"config";
    pub const SETTLEMENT_VAULT_SEED: &[u8] = b"st_vault";
    pub const NFT_VAULT_SEED: &[u8] = b"nft_vault";

    pub const MAX_FEE_RATE_PERCENT: u8 = 100;
    pub const PERCENT_DENOMINATOR: u128 = 100;

    pub const CREATE_ORDER_DATA_LEN: usize = 32;
}

// 2. mod error
pub mod error {
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use solana_program::{
        decode_error::DecodeError,
        msg,
        program_error::{PrintProgramError, ProgramError},
    };
    use thiserror::Error;

    /// Custom program errors. The discriminant is the on-chain error code,
    /// so variants are only ever appended.
    #[derive(Clone, Copy, Debug, Eq, Error, FromPrimitive, PartialEq)]
    pub enum LoanError {
        #[error("Configuration already initialized")]
        AlreadyInitialized,
        #[error("Configuration not initialized")]
        NotInitialized,
        #[error("Fee rate must be between 0 and 100 percent")]
        InvalidFeeRate,
        #[error("Amount must be greater than zero")]
        AmountMustBeGreaterThanZero,
        #[error("Order not found")]
        OrderNotFound,
        #[error("Signer does not match the required authority")]
        AuthorityMismatch,
        #[error("Insufficient balance")]
        InsufficientBalance,
        #[error("Token account holds a different asset")]
        AssetMismatch,
        #[error("Account does not hold the collateral asset")]
        NotOwner,
        #[error("Arithmetic overflow")]
        ArithmeticOverflow,
        #[error("Arithmetic underflow")]
        ArithmeticUnderflow,
        #[error("Loan period has not elapsed")]
        LoanNotExpired,
        #[error("Order is not in the required state")]
        InvalidState,
        #[error("Vault still holds tokens")]
        VaultNotEmpty,
        #[error("Account address does not match its derived address")]
        InvalidAccountAddress,
        #[error("No valid bump seed for derived address")]
        AddressDerivationFailed,
        #[error("Account must be writable")]
        ExpectedWritable,
        #[error("Account is not a valid token account")]
        InvalidTokenAccount,
    }

    impl From<LoanError> for ProgramError {
        fn from(e: LoanError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    impl<T> DecodeError<T> for LoanError {
        fn type_of() -> &'static str {
            "LoanError"
        }
    }

    impl PrintProgramError for LoanError {
        fn print<E>(&self)
        where
            E: 'static + std::error::Error + DecodeError<E> + PrintProgramError + FromPrimitive,
        {
            msg!("Error: {}", self);
        }
    }
}

// 3. mod ix
pub mod ix {
    use arrayref::{array_ref, array_refs};
    use solana_program::{
        instruction::{AccountMeta, Instruction as SolInstruction},
        program_error::ProgramError,
        pubkey::Pubkey,
        system_program, sysvar,
    };
    use crate::{constants::CREATE_ORDER_DATA_LEN, pda, tags::*};

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Instruction {
        Initialize { fee_rate_percent: u8 },
        CreateOrder {
            request_amount: u64,
            interest: u64,
            period: u64,
            additional_collateral: u64,
        },
        GiveLoan { order_id: u64 },
        Payback { order_id: u64 },
        CancelOrder { order_id: u64 },
        Liquidate { order_id: u64 },
        SweepFees,
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, ProgramError> {
            let (&tag, mut rest) = input.split_first().ok_or(ProgramError::InvalidInstructionData)?;

            match tag {
                TAG_INITIALIZE => {
                    let fee_rate_percent = read_u8(&mut rest)?;
                    Ok(Instruction::Initialize { fee_rate_percent })
                }
                TAG_CREATE_ORDER => {
                    if rest.len() < CREATE_ORDER_DATA_LEN {
                        return Err(ProgramError::InvalidInstructionData);
                    }
                    let src = array_ref![rest, 0, CREATE_ORDER_DATA_LEN];
                    let (request_amount, interest, period, additional_collateral) =
                        array_refs![src, 8, 8, 8, 8];
                    Ok(Instruction::CreateOrder {
                        request_amount: u64::from_le_bytes(*request_amount),
                        interest: u64::from_le_bytes(*interest),
                        period: u64::from_le_bytes(*period),
                        additional_collateral: u64::from_le_bytes(*additional_collateral),
                    })
                }
                TAG_GIVE_LOAN => Ok(Instruction::GiveLoan { order_id: read_u64(&mut rest)? }),
                TAG_PAYBACK => Ok(Instruction::Payback { order_id: read_u64(&mut rest)? }),
                TAG_CANCEL_ORDER => Ok(Instruction::CancelOrder { order_id: read_u64(&mut rest)? }),
                TAG_LIQUIDATE => Ok(Instruction::Liquidate { order_id: read_u64(&mut rest)? }),
                TAG_SWEEP_FEES => Ok(Instruction::SweepFees),
                _ => Err(ProgramError::InvalidInstructionData),
            }
        }

        pub fn encode(&self) -> Vec<u8> {
            let mut buf = Vec::with_capacity(1 + CREATE_ORDER_DATA_LEN);
            match *self {
                Instruction::Initialize { fee_rate_percent } => {
                    buf.push(TAG_INITIALIZE);
                    buf.push(fee_rate_percent);
                }
                Instruction::CreateOrder { request_amount, interest, period, additional_collateral } => {
                    buf.push(TAG_CREATE_ORDER);
                    buf.extend_from_slice(&request_amount.to_le_bytes());
                    buf.extend_from_slice(&interest.to_le_bytes());
                    buf.extend_from_slice(&period.to_le_bytes());
                    buf.extend_from_slice(&additional_collateral.to_le_bytes());
                }
                Instruction::GiveLoan { order_id } => {
                    buf.push(TAG_GIVE_LOAN);
                    buf.extend_from_slice(&order_id.to_le_bytes());
                }
                Instruction::Payback { order_id } => {
                    buf.push(TAG_PAYBACK);
                    buf.extend_from_slice(&order_id.to_le_bytes());
                }
                Instruction::CancelOrder { order_id } => {
                    buf.push(TAG_CANCEL_ORDER);
                    buf.extend_from_slice(&order_id.to_le_bytes());
                }
                Instruction::Liquidate { order_id } => {
                    buf.push(TAG_LIQUIDATE);
                    buf.extend_from_slice(&order_id.to_le_bytes());
                }
                Instruction::SweepFees => buf.push(TAG_SWEEP_FEES),
            }
            buf
        }
    }

    fn read_u8(input: &mut &[u8]) -> Result<u8, ProgramError> {
        let (&val, rest) = input.split_first().ok_or(ProgramError::InvalidInstructionData)?;
        *input = rest;
        Ok(val)
    }

    fn read_u64(input: &mut &[u8]) -> Result<u64, ProgramError> {
        if input.len() < 8 { return Err(ProgramError::InvalidInstructionData); }
        let (bytes, rest) = input.split_at(8);
        *input = rest;
        Ok(u64::from_le_bytes(*array_ref![bytes, 0, 8]))
    }

    // --- Builders ---

    pub fn initialize(
        program_id: &Pubkey,
        admin: &Pubkey,
        reference_mint: &Pubkey,
        fee_rate_percent: u8,
    ) -> Result<SolInstruction, ProgramError> {
        let (configuration, _) = pda::configuration(program_id, reference_mint)?;
        let (settlement_vault, _) = pda::settlement_vault(program_id, reference_mint)?;
        Ok(SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*admin, true),
                AccountMeta::new(configuration, false),
                AccountMeta::new_readonly(*reference_mint, false),
                AccountMeta::new(settlement_vault, false),
                AccountMeta::new_readonly(spl_token::ID, false),
                AccountMeta::new_readonly(system_program::ID, false),
            ],
            data: Instruction::Initialize { fee_rate_percent }.encode(),
        })
    }

    /// `next_order_id` is the configuration's current counter; the order
    /// account is derived from it.
    #[allow(clippy::too_many_arguments)]
    pub fn create_order(
        program_id: &Pubkey,
        borrower: &Pubkey,
        reference_mint: &Pubkey,
        borrower_reference_account: &Pubkey,
        nft_mint: &Pubkey,
        borrower_nft_account: &Pubkey,
        next_order_id: u64,
        request_amount: u64,
        interest: u64,
        period: u64,
        additional_collateral: u64,
    ) -> Result<SolInstruction, ProgramError> {
        let (configuration, _) = pda::configuration(program_id, reference_mint)?;
        let (settlement_vault, _) = pda::settlement_vault(program_id, reference_mint)?;
        let (nft_vault, _) = pda::nft_vault(program_id, nft_mint)?;
        let (order, _) = pda::order(program_id, &configuration, next_order_id)?;
        Ok(SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*borrower, true),
                AccountMeta::new(configuration, false),
                AccountMeta::new_readonly(*reference_mint, false),
                AccountMeta::new(settlement_vault, false),
                AccountMeta::new(*borrower_reference_account, false),
                AccountMeta::new_readonly(*nft_mint, false),
                AccountMeta::new(*borrower_nft_account, false),
                AccountMeta::new(nft_vault, false),
                AccountMeta::new(order, false),
                AccountMeta::new_readonly(spl_token::ID, false),
                AccountMeta::new_readonly(system_program::ID, false),
                AccountMeta::new_readonly(sysvar::clock::ID, false),
            ],
            data: Instruction::CreateOrder { request_amount, interest, period, additional_collateral }.encode(),
        })
    }

    pub fn give_loan(
        program_id: &Pubkey,
        lender: &Pubkey,
        reference_mint: &Pubkey,
        order_id: u64,
        lender_reference_account: &Pubkey,
        borrower_reference_account: &Pubkey,
    ) -> Result<SolInstruction, ProgramError> {
        let (configuration, _) = pda::configuration(program_id, reference_mint)?;
        let (order, _) = pda::order(program_id, &configuration, order_id)?;
        Ok(SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new_readonly(*lender, true),
                AccountMeta::new_readonly(configuration, false),
                AccountMeta::new(order, false),
                AccountMeta::new(*lender_reference_account, false),
                AccountMeta::new(*borrower_reference_account, false),
                AccountMeta::new_readonly(spl_token::ID, false),
                AccountMeta::new_readonly(sysvar::clock::ID, false),
            ],
            data: Instruction::GiveLoan { order_id }.encode(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn payback(
        program_id: &Pubkey,
        borrower: &Pubkey,
        reference_mint: &Pubkey,
        nft_mint: &Pubkey,
        order_id: u64,
        borrower_reference_account: &Pubkey,
        lender_reference_account: &Pubkey,
        borrower_nft_account: &Pubkey,
    ) -> Result<SolInstruction, ProgramError> {
        let (configuration, _) = pda::configuration(program_id, reference_mint)?;
        let (settlement_vault, _) = pda::settlement_vault(program_id, reference_mint)?;
        let (nft_vault, _) = pda::nft_vault(program_id, nft_mint)?;
        let (order, _) = pda::order(program_id, &configuration, order_id)?;
        Ok(SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*borrower, true),
                AccountMeta::new(configuration, false),
                AccountMeta::new(order, false),
                AccountMeta::new(settlement_vault, false),
                AccountMeta::new(*borrower_reference_account, false),
                AccountMeta::new(*lender_reference_account, false),
                AccountMeta::new(nft_vault, false),
                AccountMeta::new(*borrower_nft_account, false),
                AccountMeta::new_readonly(spl_token::ID, false),
            ],
            data: Instruction::Payback { order_id }.encode(),
        })
    }

    pub fn cancel_order(
        program_id: &Pubkey,
        borrower: &Pubkey,
        reference_mint: &Pubkey,
        nft_mint: &Pubkey,
        order_id: u64,
        borrower_reference_account: &Pubkey,
        borrower_nft_account: &Pubkey,
    ) -> Result<SolInstruction, ProgramError> {
        let (configuration, _) = pda::configuration(program_id, reference_mint)?;
        let (settlement_vault, _) = pda::settlement_vault(program_id, reference_mint)?;
        let (nft_vault, _) = pda::nft_vault(program_id, nft_mint)?;
        let (order, _) = pda::order(program_id, &configuration, order_id)?;
        Ok(SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*borrower, true),
                AccountMeta::new(configuration, false),
                AccountMeta::new(order, false),
                AccountMeta::new(settlement_vault, false),
                AccountMeta::new(*borrower_reference_account, false),
                AccountMeta::new(nft_vault, false),
                AccountMeta::new(*borrower_nft_account, false),
                AccountMeta::new_readonly(spl_token::ID, false),
            ],
            data: Instruction::CancelOrder { order_id }.encode(),
        })
    }

    pub fn liquidate(
        program_id: &Pubkey,
        lender: &Pubkey,
        reference_mint: &Pubkey,
        nft_mint: &Pubkey,
        order_id: u64,
        lender_reference_account: &Pubkey,
        lender_nft_account: &Pubkey,
    ) -> Result<SolInstruction, ProgramError> {
        let (configuration, _) = pda::configuration(program_id, reference_mint)?;
        let (settlement_vault, _) = pda::settlement_vault(program_id, reference_mint)?;
        let (nft_vault, _) = pda::nft_vault(program_id, nft_mint)?;
        let (order, _) = pda::order(program_id, &configuration, order_id)?;
        Ok(SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*lender, true),
                AccountMeta::new(configuration, false),
                AccountMeta::new(order, false),
                AccountMeta::new(settlement_vault, false),
                AccountMeta::new(*lender_reference_account, false),
                AccountMeta::new(nft_vault, false),
                AccountMeta::new(*lender_nft_account, false),
                AccountMeta::new_readonly(spl_token::ID, false),
                AccountMeta::new_readonly(sysvar::clock::ID, false),
            ],
            data: Instruction::Liquidate { order_id }.encode(),
        })
    }

    pub fn sweep_fees(
        program_id: &Pubkey,
        admin: &Pubkey,
        reference_mint: &Pubkey,
        treasury: &Pubkey,
    ) -> Result<SolInstruction, ProgramError> {
        let (configuration, _) = pda::configuration(program_id, reference_mint)?;
        let (settlement_vault, _) = pda::settlement_vault(program_id, reference_mint)?;
        Ok(SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new_readonly(*admin, true),
                AccountMeta::new(configuration, false),
                AccountMeta::new(settlement_vault, false),
                AccountMeta::new(*treasury, false),
                AccountMeta::new_readonly(spl_token::ID, false),
            ],
            data: Instruction::SweepFees.encode(),
        })
    }
}

// 4. mod accounts
pub mod accounts {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey, system_program};
    use crate::error::LoanError;

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if accounts.len() < n {
            return Err(ProgramError::NotEnoughAccountKeys);
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_signer {
            return Err(LoanError::AuthorityMismatch.into());
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_writable {
            return Err(LoanError::ExpectedWritable.into());
        }
        Ok(())
    }

    pub fn expect_key(ai: &AccountInfo, expected: &Pubkey) -> Result<(), ProgramError> {
        if ai.key != expected {
            return Err(LoanError::InvalidAccountAddress.into());
        }
        Ok(())
    }

    pub fn expect_token_program(ai: &AccountInfo) -> Result<(), ProgramError> {
        if ai.key != &spl_token::ID {
            return Err(ProgramError::IncorrectProgramId);
        }
        Ok(())
    }

    pub fn expect_system_program(ai: &AccountInfo) -> Result<(), ProgramError> {
        if ai.key != &system_program::ID {
            return Err(ProgramError::IncorrectProgramId);
        }
        Ok(())
    }
}

// 5. mod pda
/// Program-derived addresses. Every account the program owns or signs for
/// is found from its seeds; no address is ever stored as a free choice.
pub mod pda {
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};
    use crate::{
        constants::{CONFIG_SEED, NFT_VAULT_SEED, SETTLEMENT_VAULT_SEED},
        error::LoanError,
    };

    pub fn derive(seeds: &[&[u8]], program_id: &Pubkey) -> Result<(Pubkey, u8), ProgramError> {
        Pubkey::try_find_program_address(seeds, program_id)
            .ok_or_else(|| LoanError::AddressDerivationFailed.into())
    }

    pub fn settlement_vault(program_id: &Pubkey, reference_mint: &Pubkey) -> Result<(Pubkey, u8), ProgramError> {
        derive(&[reference_mint.as_ref(), SETTLEMENT_VAULT_SEED], program_id)
    }

    pub fn configuration(program_id: &Pubkey, reference_mint: &Pubkey) -> Result<(Pubkey, u8), ProgramError> {
        derive(&[reference_mint.as_ref(), CONFIG_SEED], program_id)
    }

    /// The order id is seeded as decimal text.
    pub fn order(program_id: &Pubkey, configuration: &Pubkey, order_id: u64) -> Result<(Pubkey, u8), ProgramError> {
        let id = order_id.to_string();
        derive(&[id.as_bytes(), configuration.as_ref()], program_id)
    }

    pub fn nft_vault(program_id: &Pubkey, nft_mint: &Pubkey) -> Result<(Pubkey, u8), ProgramError> {
        derive(&[nft_mint.as_ref(), NFT_VAULT_SEED], program_id)
    }
}

// 6. mod state
pub mod state {
    use bytemuck::{Pod, Zeroable};
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::{
        constants::{CONFIG_LEN, CONFIG_MAGIC, ORDER_LEN, ORDER_MAGIC, VERSION},
        error::LoanError,
    };

    /// One per reference-token market.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct Configuration {
        pub magic: u64,
        pub version: u32,
        pub bump: u8,
        pub vault_bump: u8,
        pub fee_rate_percent: u8,
        pub _padding: [u8; 1],
        pub admin: [u8; 32],
        pub reference_mint: [u8; 32],
        pub reference_vault: [u8; 32],
        pub next_order_id: u64,
        /// Sum of `additional_collateral` over every live order.
        pub outstanding_additional_collateral: u64,
        /// Fees held in the settlement vault and not yet swept.
        pub accrued_fees: u64,
        pub _reserved: [u8; 16],
    }

    /// Live order states. A closed order has no record at all.
    #[repr(u8)]
    #[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
    pub enum OrderStatus {
        Open = 1,
        Active = 2,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct Order {
        pub magic: u64,
        pub version: u32,
        pub status: u8,
        pub bump: u8,
        pub nft_vault_bump: u8,
        pub _padding: [u8; 1],
        pub order_id: u64,
        pub configuration: [u8; 32],
        pub borrower: [u8; 32],
        /// Zero until funded.
        pub lender: [u8; 32],
        pub nft_mint: [u8; 32],
        pub nft_vault: [u8; 32],
        pub request_amount: u64,
        pub interest: u64,
        pub period: u64,
        pub additional_collateral: u64,
        pub created_at: i64,
        /// Zero until funded.
        pub loan_start_time: i64,
    }

    impl Configuration {
        pub fn admin(&self) -> Pubkey { Pubkey::new_from_array(self.admin) }
        pub fn reference_mint(&self) -> Pubkey { Pubkey::new_from_array(self.reference_mint) }
        pub fn reference_vault(&self) -> Pubkey { Pubkey::new_from_array(self.reference_vault) }
    }

    impl Order {
        #[allow(clippy::too_many_arguments)]
        pub fn open(
            order_id: u64,
            configuration: &Pubkey,
            borrower: &Pubkey,
            nft_mint: &Pubkey,
            nft_vault: &Pubkey,
            request_amount: u64,
            interest: u64,
            period: u64,
            additional_collateral: u64,
            created_at: i64,
            bump: u8,
            nft_vault_bump: u8,
        ) -> Self {
            Order {
                magic: ORDER_MAGIC,
                version: VERSION,
                status: OrderStatus::Open as u8,
                bump,
                nft_vault_bump,
                _padding: [0; 1],
                order_id,
                configuration: configuration.to_bytes(),
                borrower: borrower.to_bytes(),
                lender: [0; 32],
                nft_mint: nft_mint.to_bytes(),
                nft_vault: nft_vault.to_bytes(),
                request_amount,
                interest,
                period,
                additional_collateral,
                created_at,
                loan_start_time: 0,
            }
        }

        pub fn status(&self) -> Result<OrderStatus, ProgramError> {
            OrderStatus::from_u8(self.status).ok_or_else(|| LoanError::InvalidState.into())
        }

        pub fn expect_status(&self, expected: OrderStatus) -> Result<(), ProgramError> {
            if self.status()? != expected {
                return Err(LoanError::InvalidState.into());
            }
            Ok(())
        }

        /// Open -> Active. Lender and start time are written exactly once.
        pub fn activate(&mut self, lender: &Pubkey, now: i64) -> Result<(), ProgramError> {
            self.expect_status(OrderStatus::Open)?;
            self.lender = lender.to_bytes();
            self.loan_start_time = now;
            self.status = OrderStatus::Active as u8;
            Ok(())
        }

        pub fn borrower(&self) -> Pubkey { Pubkey::new_from_array(self.borrower) }
        pub fn nft_mint(&self) -> Pubkey { Pubkey::new_from_array(self.nft_mint) }
        pub fn nft_vault(&self) -> Pubkey { Pubkey::new_from_array(self.nft_vault) }
        pub fn configuration(&self) -> Pubkey { Pubkey::new_from_array(self.configuration) }

        pub fn lender(&self) -> Option<Pubkey> {
            match self.status() {
                Ok(OrderStatus::Active) => Some(Pubkey::new_from_array(self.lender)),
                _ => None,
            }
        }

        pub fn loan_start_time(&self) -> Option<i64> {
            match self.status() {
                Ok(OrderStatus::Active) => Some(self.loan_start_time),
                _ => None,
            }
        }

        /// Ledger time from which the lender may liquidate.
        pub fn expires_at(&self) -> Result<i64, ProgramError> {
            let start = self.loan_start_time().ok_or(LoanError::InvalidState)?;
            let period = i64::try_from(self.period).map_err(|_| LoanError::ArithmeticOverflow)?;
            start.checked_add(period).ok_or_else(|| LoanError::ArithmeticOverflow.into())
        }
    }

    pub fn read_config(data: &[u8]) -> Configuration {
        let mut c = Configuration::zeroed();
        let src = &data[..CONFIG_LEN];
        let dst = bytemuck::bytes_of_mut(&mut c);
        dst.copy_from_slice(src);
        c
    }

    pub fn write_config(data: &mut [u8], c: &Configuration) {
        let src = bytemuck::bytes_of(c);
        let dst = &mut data[..CONFIG_LEN];
        dst.copy_from_slice(src);
    }

    pub fn read_order(data: &[u8]) -> Order {
        let mut o = Order::zeroed();
        let src = &data[..ORDER_LEN];
        let dst = bytemuck::bytes_of_mut(&mut o);
        dst.copy_from_slice(src);
        o
    }

    pub fn write_order(data: &mut [u8], o: &Order) {
        let src = bytemuck::bytes_of(o);
        let dst = &mut data[..ORDER_LEN];
        dst.copy_from_slice(src);
    }

    pub fn load_config(ai: &AccountInfo, program_id: &Pubkey) -> Result<Configuration, ProgramError> {
        if ai.owner != program_id {
            return Err(LoanError::NotInitialized.into());
        }
        let data = ai.try_borrow_data()?;
        if data.len() < CONFIG_LEN {
            return Err(LoanError::NotInitialized.into());
        }
        let c = read_config(&data);
        if c.magic != CONFIG_MAGIC { return Err(LoanError::NotInitialized.into()); }
        if c.version != VERSION { return Err(ProgramError::InvalidAccountData); }
        Ok(c)
    }

    pub fn store_config(ai: &AccountInfo, c: &Configuration) -> Result<(), ProgramError> {
        let mut data = ai.try_borrow_mut_data()?;
        if data.len() < CONFIG_LEN {
            return Err(ProgramError::AccountDataTooSmall);
        }
        write_config(&mut data, c);
        Ok(())
    }

    /// Missing, closed and foreign accounts all read as `OrderNotFound`.
    pub fn load_order(ai: &AccountInfo, program_id: &Pubkey) -> Result<Order, ProgramError> {
        if ai.owner != program_id {
            return Err(LoanError::OrderNotFound.into());
        }
        let data = ai.try_borrow_data()?;
        if data.len() < ORDER_LEN {
            return Err(LoanError::OrderNotFound.into());
        }
        let o = read_order(&data);
        if o.magic != ORDER_MAGIC { return Err(LoanError::OrderNotFound.into()); }
        if o.version != VERSION { return Err(ProgramError::InvalidAccountData); }
        Ok(o)
    }

    pub fn store_order(ai: &AccountInfo, o: &Order) -> Result<(), ProgramError> {
        let mut data = ai.try_borrow_mut_data()?;
        if data.len() < ORDER_LEN {
            return Err(ProgramError::AccountDataTooSmall);
        }
        write_order(&mut data, o);
        Ok(())
    }
}

// 7. mod fees
pub mod fees {
    use solana_program::program_error::ProgramError;
    use crate::{
        constants::{MAX_FEE_RATE_PERCENT, PERCENT_DENOMINATOR},
        error::LoanError,
    };

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Settlement {
        /// Disbursed lender -> borrower when the loan is funded.
        pub principal: u64,
        /// Owed by the borrower at repayment.
        pub total_owed: u64,
        /// Retained by the market out of the interest.
        pub protocol_fee: u64,
        /// Paid to the lender at repayment.
        pub lender_payout: u64,
    }

    pub fn protocol_fee(interest: u64, fee_rate_percent: u8) -> Result<u64, ProgramError> {
        if fee_rate_percent > MAX_FEE_RATE_PERCENT {
            return Err(LoanError::InvalidFeeRate.into());
        }
        let scaled = (interest as u128)
            .checked_mul(fee_rate_percent as u128)
            .ok_or(LoanError::ArithmeticOverflow)?;
        u64::try_from(scaled / PERCENT_DENOMINATOR).map_err(|_| LoanError::ArithmeticOverflow.into())
    }

    pub fn settle(request_amount: u64, interest: u64, fee_rate_percent: u8) -> Result<Settlement, ProgramError> {
        let protocol_fee = protocol_fee(interest, fee_rate_percent)?;
        let total_owed = request_amount.checked_add(interest).ok_or(LoanError::ArithmeticOverflow)?;
        let lender_payout = total_owed.checked_sub(protocol_fee).ok_or(LoanError::ArithmeticUnderflow)?;
        Ok(Settlement {
            principal: request_amount,
            total_owed,
            protocol_fee,
            lender_payout,
        })
    }
}

// 8. mod registry
/// Market-level bookkeeping on the configuration record.
pub mod registry {
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};
    use crate::{
        constants::{CONFIG_MAGIC, MAX_FEE_RATE_PERCENT, VERSION},
        error::LoanError,
        state::Configuration,
    };

    impl Configuration {
        pub fn new(
            admin: &Pubkey,
            reference_mint: &Pubkey,
            reference_vault: &Pubkey,
            fee_rate_percent: u8,
            bump: u8,
            vault_bump: u8,
        ) -> Result<Self, ProgramError> {
            if fee_rate_percent > MAX_FEE_RATE_PERCENT {
                return Err(LoanError::InvalidFeeRate.into());
            }
            Ok(Configuration {
                magic: CONFIG_MAGIC,
                version: VERSION,
                bump,
                vault_bump,
                fee_rate_percent,
                _padding: [0; 1],
                admin: admin.to_bytes(),
                reference_mint: reference_mint.to_bytes(),
                reference_vault: reference_vault.to_bytes(),
                next_order_id: 0,
                outstanding_additional_collateral: 0,
                accrued_fees: 0,
                _reserved: [0; 16],
            })
        }

        /// Hands out the current id and advances the counter. Ids are never
        /// handed out twice, whatever becomes of the order.
        pub fn allocate_order_id(&mut self) -> Result<u64, ProgramError> {
            let id = self.next_order_id;
            self.next_order_id = id.checked_add(1).ok_or(LoanError::ArithmeticOverflow)?;
            Ok(id)
        }

        pub fn adjust_outstanding_collateral(&mut self, delta: i128) -> Result<(), ProgramError> {
            let next = (self.outstanding_additional_collateral as i128)
                .checked_add(delta)
                .ok_or(LoanError::ArithmeticOverflow)?;
            if next < 0 {
                return Err(LoanError::ArithmeticUnderflow.into());
            }
            self.outstanding_additional_collateral =
                u64::try_from(next).map_err(|_| LoanError::ArithmeticOverflow)?;
            Ok(())
        }

        pub fn accrue_fee(&mut self, amount: u64) -> Result<(), ProgramError> {
            self.accrued_fees = self.accrued_fees.checked_add(amount).ok_or(LoanError::ArithmeticOverflow)?;
            Ok(())
        }

        pub fn take_accrued_fees(&mut self) -> u64 {
            core::mem::take(&mut self.accrued_fees)
        }
    }
}

// 9. mod custody
/// Token custody: user accounts <-> program vaults, plus creation and
/// closing of the program's own accounts. The `check_*` functions never
/// mutate, so a handler can validate every leg before moving anything.
pub mod custody {
    use solana_program::{
        account_info::AccountInfo, entrypoint::ProgramResult, program_error::ProgramError,
        program_pack::Pack, pubkey::Pubkey,
    };
    use spl_token::state::{Account as TokenAccount, Mint};
    use crate::error::LoanError;

    #[cfg(not(any(test, feature = "test")))]
    use solana_program::{
        program::{invoke, invoke_signed},
        rent::Rent,
        system_instruction, system_program,
        sysvar::Sysvar,
    };

    #[cfg(any(test, feature = "test"))]
    use spl_token::state::AccountState;

    pub fn token_account(ai: &AccountInfo) -> Result<TokenAccount, ProgramError> {
        if ai.owner != &spl_token::ID {
            return Err(LoanError::InvalidTokenAccount.into());
        }
        let data = ai.try_borrow_data()?;
        TokenAccount::unpack(&data).map_err(|_| ProgramError::from(LoanError::InvalidTokenAccount))
    }

    pub fn fungible_mint(ai: &AccountInfo) -> Result<Mint, ProgramError> {
        if ai.owner != &spl_token::ID {
            return Err(LoanError::InvalidTokenAccount.into());
        }
        let data = ai.try_borrow_data()?;
        Mint::unpack(&data).map_err(|_| ProgramError::from(LoanError::InvalidTokenAccount))
    }

    /// A collateral mint must be a true single-unit asset.
    pub fn unique_mint(ai: &AccountInfo) -> Result<Mint, ProgramError> {
        let mint = fungible_mint(ai)?;
        if mint.supply != 1 || mint.decimals != 0 {
            return Err(LoanError::AssetMismatch.into());
        }
        Ok(mint)
    }

    /// True while the account holds no record: never created, or closed.
    pub fn is_vacant(ai: &AccountInfo) -> Result<bool, ProgramError> {
        let data = ai.try_borrow_data()?;
        Ok(data.iter().all(|b| *b == 0))
    }

    pub fn check_deposit_fungible(from: &AccountInfo, authority: &Pubkey, mint: &Pubkey, amount: u64) -> Result<(), ProgramError> {
        let src = token_account(from)?;
        if src.mint != *mint { return Err(LoanError::AssetMismatch.into()); }
        if src.owner != *authority { return Err(LoanError::AuthorityMismatch.into()); }
        if src.amount < amount { return Err(LoanError::InsufficientBalance.into()); }
        Ok(())
    }

    pub fn check_withdraw_fungible(vault: &AccountInfo, mint: &Pubkey, amount: u64) -> Result<(), ProgramError> {
        let src = token_account(vault)?;
        if src.mint != *mint { return Err(LoanError::AssetMismatch.into()); }
        if src.amount < amount { return Err(LoanError::InsufficientBalance.into()); }
        Ok(())
    }

    pub fn check_deposit_unique(from: &AccountInfo, authority: &Pubkey, asset: &Pubkey) -> Result<(), ProgramError> {
        let src = token_account(from)?;
        if src.mint != *asset { return Err(LoanError::AssetMismatch.into()); }
        if src.owner != *authority || src.amount != 1 { return Err(LoanError::NotOwner.into()); }
        Ok(())
    }

    pub fn check_withdraw_unique(vault: &AccountInfo, asset: &Pubkey) -> Result<(), ProgramError> {
        let src = token_account(vault)?;
        if src.mint != *asset || src.amount != 1 {
            return Err(LoanError::AssetMismatch.into());
        }
        Ok(())
    }

    /// Destination of a payout: right asset, held by the party being paid.
    pub fn check_receiver(to: &AccountInfo, owner: &Pubkey, mint: &Pubkey) -> Result<(), ProgramError> {
        let dst = token_account(to)?;
        if dst.mint != *mint { return Err(LoanError::AssetMismatch.into()); }
        if dst.owner != *owner { return Err(LoanError::AuthorityMismatch.into()); }
        Ok(())
    }

    /// User-signed transfer: deposits into a vault and party-to-party payments.
    pub fn pay<'a>(
        token_program: &AccountInfo<'a>,
        source: &AccountInfo<'a>,
        dest: &AccountInfo<'a>,
        authority: &AccountInfo<'a>,
        amount: u64,
    ) -> ProgramResult {
        if amount == 0 {
            return Ok(());
        }
        #[cfg(not(any(test, feature = "test")))]
        {
            let ix = spl_token::instruction::transfer(
                token_program.key,
                source.key,
                dest.key,
                authority.key,
                &[],
                amount,
            )?;
            invoke(&ix, &[source.clone(), dest.clone(), authority.clone(), token_program.clone()])
        }
        #[cfg(any(test, feature = "test"))]
        {
            let _ = (token_program, authority);
            move_balance(source, dest, amount)
        }
    }

    /// Vault-signed transfer; the vault is its own token authority.
    pub fn release<'a>(
        token_program: &AccountInfo<'a>,
        vault: &AccountInfo<'a>,
        dest: &AccountInfo<'a>,
        amount: u64,
        signer_seeds: &[&[&[u8]]],
    ) -> ProgramResult {
        if amount == 0 {
            return Ok(());
        }
        #[cfg(not(any(test, feature = "test")))]
        {
            let ix = spl_token::instruction::transfer(
                token_program.key,
                vault.key,
                dest.key,
                vault.key,
                &[],
                amount,
            )?;
            invoke_signed(&ix, &[vault.clone(), dest.clone(), token_program.clone()], signer_seeds)
        }
        #[cfg(any(test, feature = "test"))]
        {
            let _ = (token_program, signer_seeds);
            move_balance(vault, dest, amount)
        }
    }

    pub fn deposit_fungible<'a>(
        token_program: &AccountInfo<'a>,
        from: &AccountInfo<'a>,
        vault: &AccountInfo<'a>,
        authority: &AccountInfo<'a>,
        amount: u64,
    ) -> ProgramResult {
        pay(token_program, from, vault, authority, amount)
    }

    pub fn withdraw_fungible<'a>(
        token_program: &AccountInfo<'a>,
        vault: &AccountInfo<'a>,
        to: &AccountInfo<'a>,
        amount: u64,
        signer_seeds: &[&[&[u8]]],
    ) -> ProgramResult {
        release(token_program, vault, to, amount, signer_seeds)
    }

    pub fn deposit_unique<'a>(
        token_program: &AccountInfo<'a>,
        from: &AccountInfo<'a>,
        vault: &AccountInfo<'a>,
        authority: &AccountInfo<'a>,
    ) -> ProgramResult {
        pay(token_program, from, vault, authority, 1)
    }

    pub fn withdraw_unique<'a>(
        token_program: &AccountInfo<'a>,
        vault: &AccountInfo<'a>,
        to: &AccountInfo<'a>,
        signer_seeds: &[&[&[u8]]],
    ) -> ProgramResult {
        release(token_program, vault, to, 1, signer_seeds)
    }

    #[cfg(any(test, feature = "test"))]
    fn move_balance(source: &AccountInfo, dest: &AccountInfo, amount: u64) -> ProgramResult {
        // Self-transfer: balance must cover it, nothing moves.
        if source.key == dest.key {
            let state = TokenAccount::unpack(&source.try_borrow_data()?)?;
            if state.amount < amount {
                return Err(LoanError::InsufficientBalance.into());
            }
            return Ok(());
        }

        let mut src_data = source.try_borrow_mut_data()?;
        let mut src_state = TokenAccount::unpack(&src_data)?;
        src_state.amount = src_state.amount.checked_sub(amount).ok_or(LoanError::InsufficientBalance)?;
        TokenAccount::pack(src_state, &mut src_data)?;

        let mut dst_data = dest.try_borrow_mut_data()?;
        let mut dst_state = TokenAccount::unpack(&dst_data)?;
        dst_state.amount = dst_state.amount.checked_add(amount).ok_or(LoanError::ArithmeticOverflow)?;
        TokenAccount::pack(dst_state, &mut dst_data)?;
        Ok(())
    }

    /// Creates a PDA token account for `mint` whose authority is itself.
    #[allow(unused_variables)]
    pub fn create_token_vault<'a>(
        payer: &AccountInfo<'a>,
        vault: &AccountInfo<'a>,
        mint: &AccountInfo<'a>,
        system_program: &AccountInfo<'a>,
        token_program: &AccountInfo<'a>,
        seeds: &[&[u8]],
    ) -> ProgramResult {
        #[cfg(not(any(test, feature = "test")))]
        {
            let space = TokenAccount::LEN;
            let lamports = Rent::get()?.minimum_balance(space);
            let create_ix = system_instruction::create_account(
                payer.key,
                vault.key,
                lamports,
                space as u64,
                &spl_token::ID,
            );
            invoke_signed(&create_ix, &[payer.clone(), vault.clone(), system_program.clone()], &[seeds])?;

            let init_ix = spl_token::instruction::initialize_account3(
                &spl_token::ID,
                vault.key,
                mint.key,
                vault.key,
            )?;
            invoke(&init_ix, &[vault.clone(), mint.clone(), token_program.clone()])
        }
        #[cfg(any(test, feature = "test"))]
        {
            let mut data = vault.try_borrow_mut_data()?;
            let state = TokenAccount {
                mint: *mint.key,
                owner: *vault.key,
                state: AccountState::Initialized,
                ..TokenAccount::default()
            };
            TokenAccount::pack(state, &mut data)
        }
    }

    /// Closes an empty vault and pays its rent to `receiver`. Closing a vault
    /// that still holds tokens would destroy custody, so it is refused.
    #[allow(unused_variables)]
    pub fn close_token_vault<'a>(
        token_program: &AccountInfo<'a>,
        vault: &AccountInfo<'a>,
        receiver: &AccountInfo<'a>,
        signer_seeds: &[&[&[u8]]],
    ) -> ProgramResult {
        if token_account(vault)?.amount != 0 {
            return Err(LoanError::VaultNotEmpty.into());
        }
        #[cfg(not(any(test, feature = "test")))]
        {
            let ix = spl_token::instruction::close_account(
                token_program.key,
                vault.key,
                receiver.key,
                vault.key,
                &[],
            )?;
            invoke_signed(&ix, &[vault.clone(), receiver.clone(), token_program.clone()], signer_seeds)
        }
        #[cfg(any(test, feature = "test"))]
        {
            drain(vault, receiver)
        }
    }

    /// Allocates a program-owned PDA record of `space` bytes.
    #[allow(unused_variables)]
    pub fn create_record<'a>(
        payer: &AccountInfo<'a>,
        record: &AccountInfo<'a>,
        system_program: &AccountInfo<'a>,
        program_id: &Pubkey,
        space: usize,
        seeds: &[&[u8]],
    ) -> ProgramResult {
        #[cfg(not(any(test, feature = "test")))]
        {
            let lamports = Rent::get()?.minimum_balance(space);
            let ix = system_instruction::create_account(payer.key, record.key, lamports, space as u64, program_id);
            invoke_signed(&ix, &[payer.clone(), record.clone(), system_program.clone()], &[seeds])
        }
        #[cfg(any(test, feature = "test"))]
        {
            if record.data_len() < space {
                return Err(ProgramError::AccountDataTooSmall);
            }
            Ok(())
        }
    }

    /// Destroys a program-owned record, paying its rent to `receiver`.
    pub fn close_record<'a>(record: &AccountInfo<'a>, receiver: &AccountInfo<'a>) -> ProgramResult {
        drain(record, receiver)?;
        #[cfg(not(any(test, feature = "test")))]
        {
            record.assign(&system_program::ID);
            record.realloc(0, false)?;
        }
        Ok(())
    }

    fn drain(account: &AccountInfo, receiver: &AccountInfo) -> ProgramResult {
        let lamports = account.lamports();
        let credited = receiver.lamports().checked_add(lamports).ok_or(LoanError::ArithmeticOverflow)?;
        **receiver.try_borrow_mut_lamports()? = credited;
        **account.try_borrow_mut_lamports()? = 0;
        account.try_borrow_mut_data()?.fill(0);
        Ok(())
    }
}

// 10. mod processor
pub mod processor {
    use solana_program::{
        account_info::AccountInfo,
        entrypoint::ProgramResult,
        msg,
        program_error::ProgramError,
        pubkey::Pubkey,
        sysvar::{clock::Clock, Sysvar},
    };
    use crate::{
        accounts,
        constants::{CONFIG_LEN, CONFIG_SEED, MAX_FEE_RATE_PERCENT, NFT_VAULT_SEED, ORDER_LEN, SETTLEMENT_VAULT_SEED},
        custody,
        error::LoanError,
        fees,
        ix::Instruction,
        pda,
        state::{self, Configuration, Order, OrderStatus},
    };

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        let instruction = Instruction::decode(instruction_data)?;

        match instruction {
            Instruction::Initialize { fee_rate_percent } => {
                process_initialize(program_id, accounts, fee_rate_percent)
            }
            Instruction::CreateOrder { request_amount, interest, period, additional_collateral } => {
                process_create_order(program_id, accounts, request_amount, interest, period, additional_collateral)
            }
            Instruction::GiveLoan { order_id } => process_give_loan(program_id, accounts, order_id),
            Instruction::Payback { order_id } => process_payback(program_id, accounts, order_id),
            Instruction::CancelOrder { order_id } => process_cancel_order(program_id, accounts, order_id),
            Instruction::Liquidate { order_id } => process_liquidate(program_id, accounts, order_id),
            Instruction::SweepFees => process_sweep_fees(program_id, accounts),
        }
    }

    /// Loads the configuration and checks it sits at its canonical address.
    fn market(program_id: &Pubkey, a_config: &AccountInfo) -> Result<Configuration, ProgramError> {
        let config = state::load_config(a_config, program_id)?;
        let (expected, _) = pda::configuration(program_id, &config.reference_mint())?;
        accounts::expect_key(a_config, &expected)?;
        Ok(config)
    }

    /// Loads a live order and checks it belongs to `a_config` under `order_id`.
    fn live_order(
        program_id: &Pubkey,
        a_config: &AccountInfo,
        a_order: &AccountInfo,
        order_id: u64,
    ) -> Result<Order, ProgramError> {
        let order = state::load_order(a_order, program_id)?;
        let (expected, _) = pda::order(program_id, a_config.key, order_id)?;
        accounts::expect_key(a_order, &expected)?;
        if order.order_id != order_id || order.configuration() != *a_config.key {
            return Err(LoanError::InvalidAccountAddress.into());
        }
        Ok(order)
    }

    fn process_initialize(program_id: &Pubkey, accounts: &[AccountInfo], fee_rate_percent: u8) -> ProgramResult {
        accounts::expect_len(accounts, 6)?;
        let a_admin = &accounts[0];
        let a_config = &accounts[1];
        let a_mint = &accounts[2];
        let a_vault = &accounts[3];
        let a_token = &accounts[4];
        let a_system = &accounts[5];

        accounts::expect_signer(a_admin)?;
        accounts::expect_writable(a_admin)?;
        accounts::expect_writable(a_config)?;
        accounts::expect_writable(a_vault)?;
        accounts::expect_token_program(a_token)?;
        accounts::expect_system_program(a_system)?;

        if fee_rate_percent > MAX_FEE_RATE_PERCENT {
            return Err(LoanError::InvalidFeeRate.into());
        }
        custody::fungible_mint(a_mint)?;

        let (config_key, config_bump) = pda::configuration(program_id, a_mint.key)?;
        accounts::expect_key(a_config, &config_key)?;
        let (vault_key, vault_bump) = pda::settlement_vault(program_id, a_mint.key)?;
        accounts::expect_key(a_vault, &vault_key)?;

        if !custody::is_vacant(a_config)? || !custody::is_vacant(a_vault)? {
            return Err(LoanError::AlreadyInitialized.into());
        }

        let config = Configuration::new(a_admin.key, a_mint.key, a_vault.key, fee_rate_percent, config_bump, vault_bump)?;

        let vault_bump_seed = [vault_bump];
        let vault_seeds: [&[u8]; 3] = [a_mint.key.as_ref(), SETTLEMENT_VAULT_SEED, &vault_bump_seed];
        custody::create_token_vault(a_admin, a_vault, a_mint, a_system, a_token, &vault_seeds)?;

        let config_bump_seed = [config_bump];
        let config_seeds: [&[u8]; 3] = [a_mint.key.as_ref(), CONFIG_SEED, &config_bump_seed];
        custody::create_record(a_admin, a_config, a_system, program_id, CONFIG_LEN, &config_seeds)?;
        state::store_config(a_config, &config)?;

        msg!("initialize: mint={} fee_rate_percent={}", a_mint.key, fee_rate_percent);
        Ok(())
    }

    fn process_create_order(
        program_id: &Pubkey,
        accounts: &[AccountInfo],
        request_amount: u64,
        interest: u64,
        period: u64,
        additional_collateral: u64,
    ) -> ProgramResult {
        accounts::expect_len(accounts, 12)?;
        let a_borrower = &accounts[0];
        let a_config = &accounts[1];
        let a_mint = &accounts[2];
        let a_vault = &accounts[3];
        let a_borrower_ref = &accounts[4];
        let a_nft_mint = &accounts[5];
        let a_borrower_nft = &accounts[6];
        let a_nft_vault = &accounts[7];
        let a_order = &accounts[8];
        let a_token = &accounts[9];
        let a_system = &accounts[10];
        let a_clock = &accounts[11];

        accounts::expect_signer(a_borrower)?;
        accounts::expect_writable(a_borrower)?;
        accounts::expect_writable(a_config)?;
        accounts::expect_writable(a_vault)?;
        accounts::expect_writable(a_borrower_ref)?;
        accounts::expect_writable(a_borrower_nft)?;
        accounts::expect_writable(a_nft_vault)?;
        accounts::expect_writable(a_order)?;
        accounts::expect_token_program(a_token)?;
        accounts::expect_system_program(a_system)?;

        if request_amount == 0 || interest == 0 || period == 0 {
            return Err(LoanError::AmountMustBeGreaterThanZero.into());
        }

        let mut config = market(program_id, a_config)?;
        let reference_mint = config.reference_mint();
        accounts::expect_key(a_mint, &reference_mint)?;
        accounts::expect_key(a_vault, &config.reference_vault())?;

        // Repayment and expiry must be representable before anyone funds it.
        fees::settle(request_amount, interest, config.fee_rate_percent)?;
        i64::try_from(period).map_err(|_| LoanError::ArithmeticOverflow)?;

        custody::unique_mint(a_nft_mint)?;
        custody::check_deposit_unique(a_borrower_nft, a_borrower.key, a_nft_mint.key)?;
        custody::check_deposit_fungible(a_borrower_ref, a_borrower.key, &reference_mint, additional_collateral)?;

        let (nft_vault_key, nft_vault_bump) = pda::nft_vault(program_id, a_nft_mint.key)?;
        accounts::expect_key(a_nft_vault, &nft_vault_key)?;
        if !custody::is_vacant(a_nft_vault)? {
            return Err(LoanError::AlreadyInitialized.into());
        }

        let order_id = config.allocate_order_id()?;
        let (order_key, order_bump) = pda::order(program_id, a_config.key, order_id)?;
        accounts::expect_key(a_order, &order_key)?;
        if !custody::is_vacant(a_order)? {
            return Err(LoanError::AlreadyInitialized.into());
        }

        config.adjust_outstanding_collateral(additional_collateral as i128)?;
        let clock = Clock::from_account_info(a_clock)?;

        let order = Order::open(
            order_id,
            a_config.key,
            a_borrower.key,
            a_nft_mint.key,
            a_nft_vault.key,
            request_amount,
            interest,
            period,
            additional_collateral,
            clock.unix_timestamp,
            order_bump,
            nft_vault_bump,
        );

        let nft_bump_seed = [nft_vault_bump];
        let nft_vault_seeds: [&[u8]; 3] = [a_nft_mint.key.as_ref(), NFT_VAULT_SEED, &nft_bump_seed];
        custody::create_token_vault(a_borrower, a_nft_vault, a_nft_mint, a_system, a_token, &nft_vault_seeds)?;
        custody::deposit_unique(a_token, a_borrower_nft, a_nft_vault, a_borrower)?;
        custody::deposit_fungible(a_token, a_borrower_ref, a_vault, a_borrower, additional_collateral)?;

        let id_text = order_id.to_string();
        let order_bump_seed = [order_bump];
        let order_seeds: [&[u8]; 3] = [id_text.as_bytes(), a_config.key.as_ref(), &order_bump_seed];
        custody::create_record(a_borrower, a_order, a_system, program_id, ORDER_LEN, &order_seeds)?;
        state::store_order(a_order, &order)?;
        state::store_config(a_config, &config)?;

        msg!(
            "create_order: id={} borrower={} nft={} request={} interest={} period={} additional={}",
            order_id, a_borrower.key, a_nft_mint.key, request_amount, interest, period, additional_collateral
        );
        Ok(())
    }

    fn process_give_loan(program_id: &Pubkey, accounts: &[AccountInfo], order_id: u64) -> ProgramResult {
        accounts::expect_len(accounts, 7)?;
        let a_lender = &accounts[0];
        let a_config = &accounts[1];
        let a_order = &accounts[2];
        let a_lender_ref = &accounts[3];
        let a_borrower_ref = &accounts[4];
        let a_token = &accounts[5];
        let a_clock = &accounts[6];

        accounts::expect_signer(a_lender)?;
        accounts::expect_writable(a_order)?;
        accounts::expect_writable(a_lender_ref)?;
        accounts::expect_writable(a_borrower_ref)?;
        accounts::expect_token_program(a_token)?;

        let config = market(program_id, a_config)?;
        let mut order = live_order(program_id, a_config, a_order, order_id)?;
        order.expect_status(OrderStatus::Open)?;

        let reference_mint = config.reference_mint();
        custody::check_deposit_fungible(a_lender_ref, a_lender.key, &reference_mint, order.request_amount)?;
        custody::check_receiver(a_borrower_ref, &order.borrower(), &reference_mint)?;

        let clock = Clock::from_account_info(a_clock)?;
        order.activate(a_lender.key, clock.unix_timestamp)?;
        order.expires_at()?;

        custody::pay(a_token, a_lender_ref, a_borrower_ref, a_lender, order.request_amount)?;
        state::store_order(a_order, &order)?;

        msg!(
            "give_loan: id={} lender={} principal={} start={}",
            order_id, a_lender.key, order.request_amount, clock.unix_timestamp
        );
        Ok(())
    }

    fn process_payback(program_id: &Pubkey, accounts: &[AccountInfo], order_id: u64) -> ProgramResult {
        accounts::expect_len(accounts, 9)?;
        let a_borrower = &accounts[0];
        let a_config = &accounts[1];
        let a_order = &accounts[2];
        let a_vault = &accounts[3];
        let a_borrower_ref = &accounts[4];
        let a_lender_ref = &accounts[5];
        let a_nft_vault = &accounts[6];
        let a_borrower_nft = &accounts[7];
        let a_token = &accounts[8];

        accounts::expect_signer(a_borrower)?;
        accounts::expect_writable(a_borrower)?;
        accounts::expect_writable(a_config)?;
        accounts::expect_writable(a_order)?;
        accounts::expect_writable(a_vault)?;
        accounts::expect_writable(a_borrower_ref)?;
        accounts::expect_writable(a_lender_ref)?;
        accounts::expect_writable(a_nft_vault)?;
        accounts::expect_writable(a_borrower_nft)?;
        accounts::expect_token_program(a_token)?;

        let mut config = market(program_id, a_config)?;
        accounts::expect_key(a_vault, &config.reference_vault())?;
        let order = live_order(program_id, a_config, a_order, order_id)?;
        order.expect_status(OrderStatus::Active)?;
        if order.borrower() != *a_borrower.key {
            return Err(LoanError::AuthorityMismatch.into());
        }
        let lender = order.lender().ok_or(LoanError::InvalidState)?;
        accounts::expect_key(a_nft_vault, &order.nft_vault())?;

        let reference_mint = config.reference_mint();
        let nft_mint = order.nft_mint();
        let settlement = fees::settle(order.request_amount, order.interest, config.fee_rate_percent)?;
        custody::check_deposit_fungible(a_borrower_ref, a_borrower.key, &reference_mint, settlement.total_owed)?;
        custody::check_receiver(a_lender_ref, &lender, &reference_mint)?;
        custody::check_withdraw_fungible(a_vault, &reference_mint, order.additional_collateral)?;
        custody::check_withdraw_unique(a_nft_vault, &nft_mint)?;
        custody::check_receiver(a_borrower_nft, a_borrower.key, &nft_mint)?;

        config.adjust_outstanding_collateral(-(order.additional_collateral as i128))?;
        config.accrue_fee(settlement.protocol_fee)?;

        custody::pay(a_token, a_borrower_ref, a_lender_ref, a_borrower, settlement.lender_payout)?;
        custody::deposit_fungible(a_token, a_borrower_ref, a_vault, a_borrower, settlement.protocol_fee)?;

        let vault_bump_seed = [config.vault_bump];
        let vault_seeds: [&[u8]; 3] = [reference_mint.as_ref(), SETTLEMENT_VAULT_SEED, &vault_bump_seed];
        custody::withdraw_fungible(a_token, a_vault, a_borrower_ref, order.additional_collateral, &[&vault_seeds])?;

        let nft_bump_seed = [order.nft_vault_bump];
        let nft_vault_seeds: [&[u8]; 3] = [nft_mint.as_ref(), NFT_VAULT_SEED, &nft_bump_seed];
        custody::withdraw_unique(a_token, a_nft_vault, a_borrower_nft, &[&nft_vault_seeds])?;
        custody::close_token_vault(a_token, a_nft_vault, a_borrower, &[&nft_vault_seeds])?;
        custody::close_record(a_order, a_borrower)?;
        state::store_config(a_config, &config)?;

        msg!(
            "payback: id={} lender_payout={} protocol_fee={} additional_returned={}",
            order_id, settlement.lender_payout, settlement.protocol_fee, order.additional_collateral
        );
        Ok(())
    }

    fn process_cancel_order(program_id: &Pubkey, accounts: &[AccountInfo], order_id: u64) -> ProgramResult {
        accounts::expect_len(accounts, 8)?;
        let a_borrower = &accounts[0];
        let a_config = &accounts[1];
        let a_order = &accounts[2];
        let a_vault = &accounts[3];
        let a_borrower_ref = &accounts[4];
        let a_nft_vault = &accounts[5];
        let a_borrower_nft = &accounts[6];
        let a_token = &accounts[7];

        accounts::expect_signer(a_borrower)?;
        accounts::expect_writable(a_borrower)?;
        accounts::expect_writable(a_config)?;
        accounts::expect_writable(a_order)?;
        accounts::expect_writable(a_vault)?;
        accounts::expect_writable(a_borrower_ref)?;
        accounts::expect_writable(a_nft_vault)?;
        accounts::expect_writable(a_borrower_nft)?;
        accounts::expect_token_program(a_token)?;

        let mut config = market(program_id, a_config)?;
        accounts::expect_key(a_vault, &config.reference_vault())?;
        let order = live_order(program_id, a_config, a_order, order_id)?;
        order.expect_status(OrderStatus::Open)?;
        if order.borrower() != *a_borrower.key {
            return Err(LoanError::AuthorityMismatch.into());
        }
        accounts::expect_key(a_nft_vault, &order.nft_vault())?;

        let reference_mint = config.reference_mint();
        let nft_mint = order.nft_mint();
        custody::check_withdraw_fungible(a_vault, &reference_mint, order.additional_collateral)?;
        custody::check_receiver(a_borrower_ref, a_borrower.key, &reference_mint)?;
        custody::check_withdraw_unique(a_nft_vault, &nft_mint)?;
        custody::check_receiver(a_borrower_nft, a_borrower.key, &nft_mint)?;

        config.adjust_outstanding_collateral(-(order.additional_collateral as i128))?;

        let vault_bump_seed = [config.vault_bump];
        let vault_seeds: [&[u8]; 3] = [reference_mint.as_ref(), SETTLEMENT_VAULT_SEED, &vault_bump_seed];
        custody::withdraw_fungible(a_token, a_vault, a_borrower_ref, order.additional_collateral, &[&vault_seeds])?;

        let nft_bump_seed = [order.nft_vault_bump];
        let nft_vault_seeds: [&[u8]; 3] = [nft_mint.as_ref(), NFT_VAULT_SEED, &nft_bump_seed];
        custody::withdraw_unique(a_token, a_nft_vault, a_borrower_nft, &[&nft_vault_seeds])?;
        custody::close_token_vault(a_token, a_nft_vault, a_borrower, &[&nft_vault_seeds])?;
        custody::close_record(a_order, a_borrower)?;
        state::store_config(a_config, &config)?;

        msg!("cancel_order: id={} borrower={}", order_id, a_borrower.key);
        Ok(())
    }

    fn process_liquidate(program_id: &Pubkey, accounts: &[AccountInfo], order_id: u64) -> ProgramResult {
        accounts::expect_len(accounts, 9)?;
        let a_lender = &accounts[0];
        let a_config = &accounts[1];
        let a_order = &accounts[2];
        let a_vault = &accounts[3];
        let a_lender_ref = &accounts[4];
        let a_nft_vault = &accounts[5];
        let a_lender_nft = &accounts[6];
        let a_token = &accounts[7];
        let a_clock = &accounts[8];

        accounts::expect_signer(a_lender)?;
        accounts::expect_writable(a_lender)?;
        accounts::expect_writable(a_config)?;
        accounts::expect_writable(a_order)?;
        accounts::expect_writable(a_vault)?;
        accounts::expect_writable(a_lender_ref)?;
        accounts::expect_writable(a_nft_vault)?;
        accounts::expect_writable(a_lender_nft)?;
        accounts::expect_token_program(a_token)?;

        let mut config = market(program_id, a_config)?;
        accounts::expect_key(a_vault, &config.reference_vault())?;
        let order = live_order(program_id, a_config, a_order, order_id)?;
        order.expect_status(OrderStatus::Active)?;
        if order.lender() != Some(*a_lender.key) {
            return Err(LoanError::AuthorityMismatch.into());
        }

        let clock = Clock::from_account_info(a_clock)?;
        if clock.unix_timestamp < order.expires_at()? {
            return Err(LoanError::LoanNotExpired.into());
        }
        accounts::expect_key(a_nft_vault, &order.nft_vault())?;

        let reference_mint = config.reference_mint();
        let nft_mint = order.nft_mint();
        custody::check_withdraw_fungible(a_vault, &reference_mint, order.additional_collateral)?;
        custody::check_receiver(a_lender_ref, a_lender.key, &reference_mint)?;
        custody::check_withdraw_unique(a_nft_vault, &nft_mint)?;
        custody::check_receiver(a_lender_nft, a_lender.key, &nft_mint)?;

        config.adjust_outstanding_collateral(-(order.additional_collateral as i128))?;

        // Additional collateral is forfeited to the lender along with the asset.
        let vault_bump_seed = [config.vault_bump];
        let vault_seeds: [&[u8]; 3] = [reference_mint.as_ref(), SETTLEMENT_VAULT_SEED, &vault_bump_seed];
        custody::withdraw_fungible(a_token, a_vault, a_lender_ref, order.additional_collateral, &[&vault_seeds])?;

        let nft_bump_seed = [order.nft_vault_bump];
        let nft_vault_seeds: [&[u8]; 3] = [nft_mint.as_ref(), NFT_VAULT_SEED, &nft_bump_seed];
        custody::withdraw_unique(a_token, a_nft_vault, a_lender_nft, &[&nft_vault_seeds])?;
        custody::close_token_vault(a_token, a_nft_vault, a_lender, &[&nft_vault_seeds])?;
        custody::close_record(a_order, a_lender)?;
        state::store_config(a_config, &config)?;

        msg!(
            "liquidate: id={} lender={} nft={} additional_forfeited={}",
            order_id, a_lender.key, nft_mint, order.additional_collateral
        );
        Ok(())
    }

    fn process_sweep_fees(program_id: &Pubkey, accounts: &[AccountInfo]) -> ProgramResult {
        accounts::expect_len(accounts, 5)?;
        let a_admin = &accounts[0];
        let a_config = &accounts[1];
        let a_vault = &accounts[2];
        let a_treasury = &accounts[3];
        let a_token = &accounts[4];

        accounts::expect_signer(a_admin)?;
        accounts::expect_writable(a_config)?;
        accounts::expect_writable(a_vault)?;
        accounts::expect_writable(a_treasury)?;
        accounts::expect_token_program(a_token)?;

        let mut config = market(program_id, a_config)?;
        if config.admin() != *a_admin.key {
            return Err(LoanError::AuthorityMismatch.into());
        }
        accounts::expect_key(a_vault, &config.reference_vault())?;

        let reference_mint = config.reference_mint();
        let treasury = custody::token_account(a_treasury)?;
        if treasury.mint != reference_mint {
            return Err(LoanError::AssetMismatch.into());
        }
        custody::check_withdraw_fungible(a_vault, &reference_mint, config.accrued_fees)?;

        let amount = config.take_accrued_fees();
        let vault_bump_seed = [config.vault_bump];
        let vault_seeds: [&[u8]; 3] = [reference_mint.as_ref(), SETTLEMENT_VAULT_SEED, &vault_bump_seed];
        custody::withdraw_fungible(a_token, a_vault, a_treasury, amount, &[&vault_seeds])?;
        state::store_config(a_config, &config)?;

        msg!("sweep_fees: amount={} treasury={}", amount, a_treasury.key);
        Ok(())
    }
}

// 11. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
#[allow(unsafe_code)]
pub mod entrypoint {
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult,
        program_error::PrintProgramError, pubkey::Pubkey,
    };
    use crate::{error::LoanError, processor};

    entrypoint!(process_instruction);

    fn process_instruction<'a>(
        program_id: &Pubkey,
        accounts: &'a [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        if let Err(error) = processor::process_instruction(program_id, accounts, instruction_data) {
            error.print::<LoanError>();
            return Err(error);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use solana_program::{
        account_info::AccountInfo,
        clock::Clock,
        program_error::ProgramError,
        program_pack::Pack,
        pubkey::Pubkey,
    };
    use spl_token::state::{Account as TokenAccount, AccountState, Mint};
    use crate::{
        constants::{CONFIG_LEN, ORDER_LEN},
        custody,
        error::LoanError,
        ix::Instruction,
        pda,
        processor::process_instruction,
        state::{self, OrderStatus},
    };

    // --- Harness ---

    struct TestAccount {
        key: Pubkey,
        owner: Pubkey,
        lamports: u64,
        data: Vec<u8>,
        is_signer: bool,
        is_writable: bool,
    }

    impl TestAccount {
        fn new(key: Pubkey, owner: Pubkey, lamports: u64, data: Vec<u8>) -> Self {
            Self { key, owner, lamports, data, is_signer: false, is_writable: false }
        }
        fn signer(mut self) -> Self { self.is_signer = true; self }
        fn writable(mut self) -> Self { self.is_writable = true; self }

        fn to_info<'a>(&'a mut self) -> AccountInfo<'a> {
            AccountInfo::new(
                &self.key,
                self.is_signer,
                self.is_writable,
                &mut self.lamports,
                &mut self.data,
                &self.owner,
                false,
                0,
            )
        }
    }

    // --- Builders ---

    fn make_token_account(mint: Pubkey, owner: Pubkey, amount: u64) -> Vec<u8> {
        let mut data = vec![0u8; TokenAccount::LEN];
        let mut account = TokenAccount::default();
        account.mint = mint;
        account.owner = owner;
        account.amount = amount;
        account.state = AccountState::Initialized;
        TokenAccount::pack(account, &mut data).unwrap();
        data
    }

    fn make_mint(supply: u64, decimals: u8) -> Vec<u8> {
        let mut data = vec![0u8; Mint::LEN];
        let mint = Mint { supply, decimals, is_initialized: true, ..Mint::default() };
        Mint::pack(mint, &mut data).unwrap();
        data
    }

    fn make_clock(unix_timestamp: i64) -> Vec<u8> {
        let clock = Clock { unix_timestamp, ..Clock::default() };
        bincode::serialize(&clock).unwrap()
    }

    fn wallet() -> TestAccount {
        TestAccount::new(Pubkey::new_unique(), solana_program::system_program::id(), 0, vec![]).signer().writable()
    }

    fn balance(account: &TestAccount) -> u64 {
        TokenAccount::unpack(&account.data).unwrap().amount
    }

    struct Fixture {
        program_id: Pubkey,
        admin: TestAccount,
        config: TestAccount,
        mint: TestAccount,
        vault: TestAccount,
        token_prog: TestAccount,
        system: TestAccount,
        clock: TestAccount,
    }

    struct Borrower {
        wallet: TestAccount,
        reference: TestAccount,
        nft_mint: TestAccount,
        nft: TestAccount,
        nft_vault: TestAccount,
    }

    struct Lender {
        wallet: TestAccount,
        reference: TestAccount,
        nft: TestAccount,
    }

    fn setup() -> Fixture {
        let program_id = Pubkey::new_unique();
        let mint_key = Pubkey::new_unique();
        let (config_key, _) = pda::configuration(&program_id, &mint_key).unwrap();
        let (vault_key, _) = pda::settlement_vault(&program_id, &mint_key).unwrap();

        Fixture {
            program_id,
            admin: wallet(),
            config: TestAccount::new(config_key, program_id, 0, vec![0u8; CONFIG_LEN]).writable(),
            mint: TestAccount::new(mint_key, spl_token::ID, 0, make_mint(1_000_000_000, 6)),
            vault: TestAccount::new(vault_key, spl_token::ID, 0, vec![0u8; TokenAccount::LEN]).writable(),
            token_prog: TestAccount::new(spl_token::ID, Pubkey::default(), 0, vec![]),
            system: TestAccount::new(solana_program::system_program::id(), Pubkey::default(), 0, vec![]),
            clock: TestAccount::new(solana_program::sysvar::clock::id(), solana_program::sysvar::id(), 0, make_clock(100)),
        }
    }

    fn initialized(fee_rate_percent: u8) -> Fixture {
        let mut f = setup();
        initialize(&mut f, fee_rate_percent).unwrap();
        f
    }

    fn borrower(f: &Fixture, reference_balance: u64) -> Borrower {
        let wallet = wallet();
        let nft_mint_key = Pubkey::new_unique();
        let (nft_vault_key, _) = pda::nft_vault(&f.program_id, &nft_mint_key).unwrap();
        Borrower {
            reference: TestAccount::new(
                Pubkey::new_unique(), spl_token::ID, 0,
                make_token_account(f.mint.key, wallet.key, reference_balance),
            ).writable(),
            nft_mint: TestAccount::new(nft_mint_key, spl_token::ID, 0, make_mint(1, 0)),
            nft: TestAccount::new(Pubkey::new_unique(), spl_token::ID, 0, make_token_account(nft_mint_key, wallet.key, 1)).writable(),
            nft_vault: TestAccount::new(nft_vault_key, spl_token::ID, 500, vec![0u8; TokenAccount::LEN]).writable(),
            wallet,
        }
    }

    fn lender(f: &Fixture, reference_balance: u64, nft_mint: Pubkey) -> Lender {
        let wallet = wallet();
        Lender {
            reference: TestAccount::new(
                Pubkey::new_unique(), spl_token::ID, 0,
                make_token_account(f.mint.key, wallet.key, reference_balance),
            ).writable(),
            nft: TestAccount::new(Pubkey::new_unique(), spl_token::ID, 0, make_token_account(nft_mint, wallet.key, 0)).writable(),
            wallet,
        }
    }

    fn order_account(f: &Fixture, order_id: u64) -> TestAccount {
        let (key, _) = pda::order(&f.program_id, &f.config.key, order_id).unwrap();
        TestAccount::new(key, f.program_id, 1_000, vec![0u8; ORDER_LEN]).writable()
    }

    // --- Instruction drivers ---

    fn initialize(f: &mut Fixture, fee_rate_percent: u8) -> Result<(), ProgramError> {
        let data = Instruction::Initialize { fee_rate_percent }.encode();
        let program_id = f.program_id;
        let accs = vec![
            f.admin.to_info(), f.config.to_info(), f.mint.to_info(), f.vault.to_info(),
            f.token_prog.to_info(), f.system.to_info(),
        ];
        process_instruction(&program_id, &accs, &data)
    }

    fn create_order(
        f: &mut Fixture,
        b: &mut Borrower,
        order: &mut TestAccount,
        terms: [u64; 4],
    ) -> Result<(), ProgramError> {
        let [request_amount, interest, period, additional_collateral] = terms;
        let data = Instruction::CreateOrder { request_amount, interest, period, additional_collateral }.encode();
        let program_id = f.program_id;
        let accs = vec![
            b.wallet.to_info(), f.config.to_info(), f.mint.to_info(), f.vault.to_info(),
            b.reference.to_info(), b.nft_mint.to_info(), b.nft.to_info(), b.nft_vault.to_info(),
            order.to_info(), f.token_prog.to_info(), f.system.to_info(), f.clock.to_info(),
        ];
        process_instruction(&program_id, &accs, &data)
    }

    fn give_loan(
        f: &mut Fixture,
        l: &mut Lender,
        order: &mut TestAccount,
        borrower_reference: &mut TestAccount,
        order_id: u64,
    ) -> Result<(), ProgramError> {
        let data = Instruction::GiveLoan { order_id }.encode();
        let program_id = f.program_id;
        let accs = vec![
            l.wallet.to_info(), f.config.to_info(), order.to_info(), l.reference.to_info(),
            borrower_reference.to_info(), f.token_prog.to_info(), f.clock.to_info(),
        ];
        process_instruction(&program_id, &accs, &data)
    }

    fn payback(
        f: &mut Fixture,
        b: &mut Borrower,
        order: &mut TestAccount,
        lender_reference: &mut TestAccount,
        order_id: u64,
    ) -> Result<(), ProgramError> {
        let data = Instruction::Payback { order_id }.encode();
        let program_id = f.program_id;
        let accs = vec![
            b.wallet.to_info(), f.config.to_info(), order.to_info(), f.vault.to_info(),
            b.reference.to_info(), lender_reference.to_info(), b.nft_vault.to_info(), b.nft.to_info(),
            f.token_prog.to_info(),
        ];
        process_instruction(&program_id, &accs, &data)
    }

    fn cancel(f: &mut Fixture, b: &mut Borrower, order: &mut TestAccount, order_id: u64) -> Result<(), ProgramError> {
        let data = Instruction::CancelOrder { order_id }.encode();
        let program_id = f.program_id;
        let accs = vec![
            b.wallet.to_info(), f.config.to_info(), order.to_info(), f.vault.to_info(),
            b.reference.to_info(), b.nft_vault.to_info(), b.nft.to_info(), f.token_prog.to_info(),
        ];
        process_instruction(&program_id, &accs, &data)
    }

    fn liquidate(
        f: &mut Fixture,
        l: &mut Lender,
        nft_vault: &mut TestAccount,
        order: &mut TestAccount,
        order_id: u64,
    ) -> Result<(), ProgramError> {
        let data = Instruction::Liquidate { order_id }.encode();
        let program_id = f.program_id;
        let accs = vec![
            l.wallet.to_info(), f.config.to_info(), order.to_info(), f.vault.to_info(),
            l.reference.to_info(), nft_vault.to_info(), l.nft.to_info(), f.token_prog.to_info(),
            f.clock.to_info(),
        ];
        process_instruction(&program_id, &accs, &data)
    }

    fn sweep(f: &mut Fixture, admin: &mut TestAccount, treasury: &mut TestAccount) -> Result<(), ProgramError> {
        let data = Instruction::SweepFees.encode();
        let program_id = f.program_id;
        let accs = vec![
            admin.to_info(), f.config.to_info(), f.vault.to_info(), treasury.to_info(), f.token_prog.to_info(),
        ];
        process_instruction(&program_id, &accs, &data)
    }

    fn set_clock(f: &mut Fixture, unix_timestamp: i64) {
        f.clock.data = make_clock(unix_timestamp);
    }

    /// Borrower with order 0 open on a fresh market.
    fn with_open_order(fee_rate_percent: u8, terms: [u64; 4], reference_balance: u64) -> (Fixture, Borrower, TestAccount) {
        let mut f = initialized(fee_rate_percent);
        let mut b = borrower(&f, reference_balance);
        let mut order = order_account(&f, 0);
        create_order(&mut f, &mut b, &mut order, terms).unwrap();
        (f, b, order)
    }

    // --- Tests ---

    #[test]
    fn test_initialize_creates_market() {
        let f = initialized(10);
        let config = state::read_config(&f.config.data);
        assert_eq!(config.fee_rate_percent, 10);
        assert_eq!(config.admin(), f.admin.key);
        assert_eq!(config.reference_mint(), f.mint.key);
        assert_eq!(config.reference_vault(), f.vault.key);
        assert_eq!(config.next_order_id, 0);
        assert_eq!(config.outstanding_additional_collateral, 0);
        assert_eq!(balance(&f.vault), 0);
    }

    #[test]
    fn test_initialize_twice_fails() {
        let mut f = initialized(10);
        assert_eq!(initialize(&mut f, 5), Err(LoanError::AlreadyInitialized.into()));
        assert_eq!(state::read_config(&f.config.data).fee_rate_percent, 10);
    }

    #[test]
    fn test_initialize_rejects_fee_above_hundred() {
        let mut f = setup();
        assert_eq!(initialize(&mut f, 101), Err(LoanError::InvalidFeeRate.into()));
        assert!(f.config.data.iter().all(|b| *b == 0));
        assert_eq!(initialize(&mut f, 100), Ok(()));
    }

    #[test]
    fn test_create_order_escrows_collateral() {
        let (f, b, order) = with_open_order(10, [1000, 10, 50, 30], 100);

        assert_eq!(balance(&b.nft), 0);
        assert_eq!(balance(&b.nft_vault), 1);
        assert_eq!(balance(&b.reference), 70);
        assert_eq!(balance(&f.vault), 30);

        let config = state::read_config(&f.config.data);
        assert_eq!(config.next_order_id, 1);
        assert_eq!(config.outstanding_additional_collateral, 30);

        let o = state::read_order(&order.data);
        assert_eq!(o.order_id, 0);
        assert_eq!(o.status().unwrap(), OrderStatus::Open);
        assert_eq!(o.borrower(), b.wallet.key);
        assert_eq!(o.nft_mint(), b.nft_mint.key);
        assert_eq!(o.lender(), None);
        assert_eq!(o.loan_start_time(), None);
        assert_eq!(o.created_at, 100);
    }

    #[test]
    fn test_create_order_rejects_zero_terms() {
        let mut f = initialized(10);
        for terms in [[0, 10, 50, 0], [1000, 0, 50, 0], [1000, 10, 0, 0]] {
            let mut b = borrower(&f, 100);
            let mut order = order_account(&f, 0);
            assert_eq!(
                create_order(&mut f, &mut b, &mut order, terms),
                Err(LoanError::AmountMustBeGreaterThanZero.into())
            );
        }
        assert_eq!(state::read_config(&f.config.data).next_order_id, 0);
    }

    #[test]
    fn test_create_order_overflow_has_no_effect() {
        let mut f = initialized(10);
        let mut b = borrower(&f, 100);
        let mut order = order_account(&f, 0);
        assert_eq!(
            create_order(&mut f, &mut b, &mut order, [u64::MAX, 1, 50, 10]),
            Err(LoanError::ArithmeticOverflow.into())
        );
        assert_eq!(state::read_config(&f.config.data).next_order_id, 0);
        assert_eq!(balance(&b.nft), 1);
        assert_eq!(balance(&b.reference), 100);
        assert!(order.data.iter().all(|x| *x == 0));
    }

    #[test]
    fn test_create_order_requires_signature() {
        let mut f = initialized(10);
        let mut b = borrower(&f, 100);
        b.wallet.is_signer = false;
        let mut order = order_account(&f, 0);
        assert_eq!(
            create_order(&mut f, &mut b, &mut order, [1000, 10, 50, 0]),
            Err(LoanError::AuthorityMismatch.into())
        );
    }

    #[test]
    fn test_create_order_rejects_fungible_or_missing_asset() {
        let mut f = initialized(10);

        let mut b = borrower(&f, 100);
        b.nft_mint.data = make_mint(2, 0);
        let mut order = order_account(&f, 0);
        assert_eq!(
            create_order(&mut f, &mut b, &mut order, [1000, 10, 50, 0]),
            Err(LoanError::AssetMismatch.into())
        );

        let mut b = borrower(&f, 100);
        b.nft.data = make_token_account(b.nft_mint.key, b.wallet.key, 0);
        assert_eq!(
            create_order(&mut f, &mut b, &mut order, [1000, 10, 50, 0]),
            Err(LoanError::NotOwner.into())
        );

        let mut b = borrower(&f, 5);
        assert_eq!(
            create_order(&mut f, &mut b, &mut order, [1000, 10, 50, 10]),
            Err(LoanError::InsufficientBalance.into())
        );
    }

    #[test]
    fn test_give_loan_disburses_principal() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        set_clock(&mut f, 200);

        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();

        assert_eq!(balance(&l.reference), 0);
        assert_eq!(balance(&b.reference), 1100);
        let o = state::read_order(&order.data);
        assert_eq!(o.status().unwrap(), OrderStatus::Active);
        assert_eq!(o.lender(), Some(l.wallet.key));
        assert_eq!(o.loan_start_time(), Some(200));
        assert_eq!(o.expires_at().unwrap(), 250);
    }

    #[test]
    fn test_give_loan_twice_fails() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut first = lender(&f, 1000, b.nft_mint.key);
        let mut second = lender(&f, 1000, b.nft_mint.key);

        give_loan(&mut f, &mut first, &mut order, &mut b.reference, 0).unwrap();
        assert_eq!(
            give_loan(&mut f, &mut second, &mut order, &mut b.reference, 0),
            Err(LoanError::InvalidState.into())
        );
        assert_eq!(balance(&second.reference), 1000);
        assert_eq!(state::read_order(&order.data).lender(), Some(first.wallet.key));
    }

    #[test]
    fn test_give_loan_insufficient_balance() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 999, b.nft_mint.key);
        assert_eq!(
            give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0),
            Err(LoanError::InsufficientBalance.into())
        );
        assert_eq!(state::read_order(&order.data).status().unwrap(), OrderStatus::Open);
    }

    #[test]
    fn test_wrong_order_account_rejected() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        assert_eq!(
            give_loan(&mut f, &mut l, &mut order, &mut b.reference, 1),
            Err(LoanError::InvalidAccountAddress.into())
        );
    }

    #[test]
    fn test_payback_settles_with_fee() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();

        payback(&mut f, &mut b, &mut order, &mut l.reference, 0).unwrap();

        // 1000 principal + 10 interest, 1 of which is the 10% fee.
        assert_eq!(balance(&l.reference), 1009);
        assert_eq!(balance(&b.reference), 90);
        assert_eq!(balance(&f.vault), 1);
        assert_eq!(balance(&b.nft), 1);

        let config = state::read_config(&f.config.data);
        assert_eq!(config.accrued_fees, 1);
        assert_eq!(config.outstanding_additional_collateral, 0);

        assert!(order.data.iter().all(|x| *x == 0));
        assert_eq!(order.lamports, 0);
        assert!(b.nft_vault.data.iter().all(|x| *x == 0));
        assert_eq!(b.wallet.lamports, 1_500);
    }

    #[test]
    fn test_payback_returns_additional_collateral() {
        let (mut f, mut b, mut order) = with_open_order(0, [1000, 10, 50, 40], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();

        payback(&mut f, &mut b, &mut order, &mut l.reference, 0).unwrap();

        assert_eq!(balance(&l.reference), 1010);
        assert_eq!(balance(&b.reference), 90);
        assert_eq!(balance(&f.vault), 0);
        assert_eq!(state::read_config(&f.config.data).outstanding_additional_collateral, 0);
    }

    #[test]
    fn test_payback_by_stranger_fails() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();

        b.wallet = wallet();
        assert_eq!(
            payback(&mut f, &mut b, &mut order, &mut l.reference, 0),
            Err(LoanError::AuthorityMismatch.into())
        );
        assert_eq!(balance(&b.nft_vault), 1);
    }

    #[test]
    fn test_payback_before_funding_fails() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 2000);
        let mut l = lender(&f, 0, b.nft_mint.key);
        assert_eq!(
            payback(&mut f, &mut b, &mut order, &mut l.reference, 0),
            Err(LoanError::InvalidState.into())
        );
    }

    #[test]
    fn test_late_payback_allowed() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();

        set_clock(&mut f, 10_000);
        assert_eq!(payback(&mut f, &mut b, &mut order, &mut l.reference, 0), Ok(()));
        assert_eq!(balance(&b.nft), 1);
    }

    #[test]
    fn test_cancel_returns_everything() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 25], 100);

        cancel(&mut f, &mut b, &mut order, 0).unwrap();

        assert_eq!(balance(&b.nft), 1);
        assert_eq!(balance(&b.reference), 100);
        assert_eq!(balance(&f.vault), 0);
        assert_eq!(state::read_config(&f.config.data).outstanding_additional_collateral, 0);
        assert_eq!(b.wallet.lamports, 1_500);

        assert_eq!(cancel(&mut f, &mut b, &mut order, 0), Err(LoanError::OrderNotFound.into()));
    }

    #[test]
    fn test_cancel_after_funding_fails() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();

        assert_eq!(cancel(&mut f, &mut b, &mut order, 0), Err(LoanError::InvalidState.into()));
        assert_eq!(balance(&b.nft_vault), 1);
    }

    #[test]
    fn test_liquidate_boundary() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 20], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();

        set_clock(&mut f, 149);
        assert_eq!(
            liquidate(&mut f, &mut l, &mut b.nft_vault, &mut order, 0),
            Err(LoanError::LoanNotExpired.into())
        );

        set_clock(&mut f, 150);
        liquidate(&mut f, &mut l, &mut b.nft_vault, &mut order, 0).unwrap();

        assert_eq!(balance(&l.nft), 1);
        assert_eq!(balance(&l.reference), 20);
        assert_eq!(balance(&f.vault), 0);
        assert_eq!(state::read_config(&f.config.data).outstanding_additional_collateral, 0);
        assert_eq!(l.wallet.lamports, 1_500);
        assert!(order.data.iter().all(|x| *x == 0));
    }

    #[test]
    fn test_liquidate_by_non_lender_fails() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();
        set_clock(&mut f, 1_000);

        let mut stranger = lender(&f, 0, b.nft_mint.key);
        assert_eq!(
            liquidate(&mut f, &mut stranger, &mut b.nft_vault, &mut order, 0),
            Err(LoanError::AuthorityMismatch.into())
        );
    }

    #[test]
    fn test_payback_and_liquidate_are_exclusive() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();
        set_clock(&mut f, 1_000);

        payback(&mut f, &mut b, &mut order, &mut l.reference, 0).unwrap();
        assert_eq!(
            liquidate(&mut f, &mut l, &mut b.nft_vault, &mut order, 0),
            Err(LoanError::OrderNotFound.into())
        );

        let mut b2 = borrower(&f, 100);
        let mut order2 = order_account(&f, 1);
        create_order(&mut f, &mut b2, &mut order2, [500, 5, 50, 0]).unwrap();
        let mut l2 = lender(&f, 500, b2.nft_mint.key);
        give_loan(&mut f, &mut l2, &mut order2, &mut b2.reference, 1).unwrap();
        set_clock(&mut f, 2_000);

        liquidate(&mut f, &mut l2, &mut b2.nft_vault, &mut order2, 1).unwrap();
        assert_eq!(
            payback(&mut f, &mut b2, &mut order2, &mut l2.reference, 1),
            Err(LoanError::OrderNotFound.into())
        );
    }

    #[test]
    fn test_order_ids_never_reused() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        cancel(&mut f, &mut b, &mut order, 0).unwrap();

        // The same asset can be pledged again, but never under id 0.
        assert_eq!(
            create_order(&mut f, &mut b, &mut order, [1000, 10, 50, 0]),
            Err(LoanError::InvalidAccountAddress.into())
        );

        let mut order1 = order_account(&f, 1);
        create_order(&mut f, &mut b, &mut order1, [1000, 10, 50, 0]).unwrap();
        assert_eq!(state::read_order(&order1.data).order_id, 1);
        assert_eq!(state::read_config(&f.config.data).next_order_id, 2);
    }

    #[test]
    fn test_vault_covers_outstanding_collateral_and_fees() {
        let mut f = initialized(50);
        let mut b1 = borrower(&f, 100);
        let mut b2 = borrower(&f, 100);
        let mut o1 = order_account(&f, 0);
        let mut o2 = order_account(&f, 1);

        create_order(&mut f, &mut b1, &mut o1, [100, 20, 50, 30]).unwrap();
        create_order(&mut f, &mut b2, &mut o2, [100, 20, 50, 70]).unwrap();
        assert_eq!(state::read_config(&f.config.data).outstanding_additional_collateral, 100);
        assert_eq!(balance(&f.vault), 100);

        let mut l = lender(&f, 100, b1.nft_mint.key);
        give_loan(&mut f, &mut l, &mut o1, &mut b1.reference, 0).unwrap();
        payback(&mut f, &mut b1, &mut o1, &mut l.reference, 0).unwrap();

        let config = state::read_config(&f.config.data);
        assert_eq!(config.outstanding_additional_collateral, 70);
        assert_eq!(config.accrued_fees, 10);
        assert_eq!(balance(&f.vault), config.outstanding_additional_collateral + config.accrued_fees);
        assert_eq!(balance(&l.reference), 110);
    }

    #[test]
    fn test_sweep_fees_by_admin() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();
        payback(&mut f, &mut b, &mut order, &mut l.reference, 0).unwrap();

        let mut treasury = TestAccount::new(
            Pubkey::new_unique(), spl_token::ID, 0, make_token_account(f.mint.key, Pubkey::new_unique(), 0),
        ).writable();

        let mut stranger = wallet();
        assert_eq!(sweep(&mut f, &mut stranger, &mut treasury), Err(LoanError::AuthorityMismatch.into()));

        let mut admin = TestAccount::new(f.admin.key, f.admin.owner, 0, vec![]).signer();
        sweep(&mut f, &mut admin, &mut treasury).unwrap();
        assert_eq!(balance(&treasury), 1);
        assert_eq!(balance(&f.vault), 0);
        assert_eq!(state::read_config(&f.config.data).accrued_fees, 0);
    }

    #[test]
    fn test_scenario_repaid_loan() {
        let (mut f, mut b, mut order) = with_open_order(10, [100, 10, 259_200, 10], 20);
        let mut l = lender(&f, 100, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();
        payback(&mut f, &mut b, &mut order, &mut l.reference, 0).unwrap();

        assert_eq!(balance(&l.reference), 109);
        assert_eq!(balance(&b.nft), 1);
        assert_eq!(balance(&b.reference), 10);
        assert_eq!(state::load_order(&order.to_info(), &f.program_id).map(|_| ()), Err(LoanError::OrderNotFound.into()));
    }

    #[test]
    fn test_scenario_liquidated_loan() {
        let (mut f, mut b, mut order) = with_open_order(10, [100, 10, 3, 10], 10);
        let mut l = lender(&f, 100, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();
        set_clock(&mut f, 104);
        liquidate(&mut f, &mut l, &mut b.nft_vault, &mut order, 0).unwrap();

        assert_eq!(balance(&l.nft), 1);
        assert_eq!(balance(&l.reference), 10);
        assert_eq!(balance(&b.reference), 100);
        assert_eq!(state::read_config(&f.config.data).outstanding_additional_collateral, 0);
        assert_eq!(state::load_order(&order.to_info(), &f.program_id).map(|_| ()), Err(LoanError::OrderNotFound.into()));
    }

    #[test]
    fn test_close_token_vault_rejects_held_asset() {
        let (mut f, mut b, _order) = with_open_order(10, [1000, 10, 50, 0], 100);
        {
            let token = f.token_prog.to_info();
            let vault = b.nft_vault.to_info();
            let receiver = b.wallet.to_info();
            assert_eq!(
                custody::close_token_vault(&token, &vault, &receiver, &[]),
                Err(LoanError::VaultNotEmpty.into())
            );
        }
        assert_eq!(balance(&b.nft_vault), 1);
        assert_eq!(b.nft_vault.lamports, 500);
        assert_eq!(b.wallet.lamports, 0);
    }

    #[test]
    fn test_create_order_on_uninitialized_market() {
        let mut f = setup();
        let mut b = borrower(&f, 100);
        let mut order = order_account(&f, 0);
        assert_eq!(
            create_order(&mut f, &mut b, &mut order, [1000, 10, 50, 0]),
            Err(LoanError::NotInitialized.into())
        );
        assert_eq!(balance(&b.nft), 1);
    }

    #[test]
    fn test_payback_insufficient_leaves_accounts_unchanged() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 100);
        let mut l = lender(&f, 1000, b.nft_mint.key);
        give_loan(&mut f, &mut l, &mut order, &mut b.reference, 0).unwrap();
        b.reference.data = make_token_account(f.mint.key, b.wallet.key, 1009);

        let before = (
            order.data.clone(),
            f.config.data.clone(),
            f.vault.data.clone(),
            b.reference.data.clone(),
            l.reference.data.clone(),
            b.nft_vault.data.clone(),
        );
        assert_eq!(
            payback(&mut f, &mut b, &mut order, &mut l.reference, 0),
            Err(LoanError::InsufficientBalance.into())
        );
        let after = (
            order.data.clone(),
            f.config.data.clone(),
            f.vault.data.clone(),
            b.reference.data.clone(),
            l.reference.data.clone(),
            b.nft_vault.data.clone(),
        );
        assert_eq!(before, after);
        assert_eq!(order.lamports, 1_000);
    }

    #[test]
    fn test_sweep_rejects_foreign_treasury() {
        let mut f = initialized(10);
        let mut treasury = TestAccount::new(
            Pubkey::new_unique(), spl_token::ID, 0, make_token_account(Pubkey::new_unique(), Pubkey::new_unique(), 0),
        ).writable();
        let mut admin = TestAccount::new(f.admin.key, f.admin.owner, 0, vec![]).signer();
        assert_eq!(sweep(&mut f, &mut admin, &mut treasury), Err(LoanError::AssetMismatch.into()));
    }

    #[test]
    fn test_payer_must_be_writable() {
        let mut f = setup();
        f.admin.is_writable = false;
        assert_eq!(initialize(&mut f, 10), Err(LoanError::ExpectedWritable.into()));

        let mut f = initialized(10);
        let mut b = borrower(&f, 100);
        b.wallet.is_writable = false;
        let mut order = order_account(&f, 0);
        assert_eq!(
            create_order(&mut f, &mut b, &mut order, [1000, 10, 50, 0]),
            Err(LoanError::ExpectedWritable.into())
        );
    }

    #[test]
    fn test_foreign_token_account_rejected() {
        let mut f = initialized(10);
        let mut b = borrower(&f, 100);
        b.reference.owner = solana_program::system_program::id();
        let mut order = order_account(&f, 0);
        assert_eq!(
            create_order(&mut f, &mut b, &mut order, [1000, 10, 50, 0]),
            Err(LoanError::InvalidTokenAccount.into())
        );
        assert_eq!(state::read_config(&f.config.data).next_order_id, 0);
    }

    #[test]
    fn test_wrong_token_program_rejected() {
        let mut f = setup();
        f.token_prog.key = Pubkey::new_unique();
        assert_eq!(initialize(&mut f, 10), Err(ProgramError::IncorrectProgramId));
        assert!(f.config.data.iter().all(|x| *x == 0));
    }

    #[test]
    fn test_borrower_funds_own_order() {
        let (mut f, mut b, mut order) = with_open_order(10, [1000, 10, 50, 0], 1000);
        let data = Instruction::GiveLoan { order_id: 0 }.encode();
        let program_id = f.program_id;
        {
            let reference = b.reference.to_info();
            let accs = vec![
                b.wallet.to_info(), f.config.to_info(), order.to_info(), reference.clone(),
                reference, f.token_prog.to_info(), f.clock.to_info(),
            ];
            assert_eq!(process_instruction(&program_id, &accs, &data), Ok(()));
        }
        assert_eq!(balance(&b.reference), 1000);
        let o = state::read_order(&order.data);
        assert_eq!(o.lender(), Some(b.wallet.key));
        assert_eq!(o.status().unwrap(), OrderStatus::Active);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut f = initialized(10);
        let program_id = f.program_id;
        let accs = vec![f.admin.to_info()];
        assert_eq!(process_instruction(&program_id, &accs, &[99]), Err(ProgramError::InvalidInstructionData));
        assert_eq!(process_instruction(&program_id, &accs, &[]), Err(ProgramError::InvalidInstructionData));
    }
}
