// crates/anystake-core/src/error.rs

use thiserror::Error;

use crate::address::Address;

/// Protocol-wide error types for the AnyStake economy.
///
/// Every variant is a local, synchronous failure: the caller observes the
/// failed call and may resubmit with corrected inputs. Nothing is retried
/// internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnyStakeError {
    /// An owner-only operation was called by someone else.
    #[error("Unauthorized: {caller} is not permitted to {action}")]
    Unauthorized { caller: Address, action: String },

    /// Zero (or otherwise unusable) amount where a positive one is required.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Withdraw or claim exceeding the recorded stake.
    #[error("Insufficient stake: requested {requested}, staked {staked}")]
    InsufficientStake { requested: u128, staked: u128 },

    /// Batch operation whose parallel arrays differ in length.
    #[error("Arity mismatch: expected {expected} entries, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    /// Checked arithmetic overflowed.
    #[error("Arithmetic overflow in {0}")]
    ArithmeticOverflow(String),

    /// Checked arithmetic underflowed.
    #[error("Arithmetic underflow in {0}")]
    ArithmeticUnderflow(String),

    /// Pool id out of range.
    #[error("Pool not found: {0}")]
    PoolNotFound(usize),

    /// Component used before `initialize` wired its treasury.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// `initialize` called twice.
    #[error("Already initialized: {0}")]
    AlreadyInitialized(String),

    /// Component is deactivated (migration freeze).
    #[error("Inactive: {0}")]
    Inactive(String),

    /// Token bank balance too small for a transfer.
    #[error("Insufficient balance of {token} for {account}: needed {needed}, available {available}")]
    InsufficientBalance {
        token: Address,
        account: Address,
        needed: u128,
        available: u128,
    },

    /// Token not registered with the bank.
    #[error("Unknown token: {0}")]
    UnknownToken(Address),

    /// Liquidity pair not registered with the venue.
    #[error("Unknown pair: {0}")]
    UnknownPair(String),

    /// Invalid state transition.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Rejected configuration value.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AnyStakeError {
    /// Shorthand for an `Unauthorized` error.
    pub fn unauthorized(caller: Address, action: &str) -> Self {
        AnyStakeError::Unauthorized {
            caller,
            action: action.to_string(),
        }
    }
}

impl From<serde_json::Error> for AnyStakeError {
    fn from(e: serde_json::Error) -> Self {
        AnyStakeError::Serialization(e.to_string())
    }
}
