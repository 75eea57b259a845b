// crates/anystake-core/src/lib.rs
//
// anystake-core: Core types, traits, and fixed-point math for the AnyStake
// reward economy.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines account handles, the per-call context, the error taxonomy,
// ledger events, and the trait interfaces of the external collaborators
// (token bank, price oracle / swap venue, loyalty and governance registries)
// plus the treasury seam consumed by the staking ledgers.

pub mod address;
pub mod context;
pub mod error;
pub mod events;
pub mod math;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use anystake_core::Address;`

pub use address::Address;
pub use context::{Block, CallContext};
pub use error::AnyStakeError;
pub use events::{EventKind, LedgerEvent};
pub use math::{Amount, BPS_DENOMINATOR, PER_MILLE, WAD};
pub use traits::{
    Credit, Environment, GovernanceRegistry, LoyaltyRegistry, PriceOracle, RewardSource,
    SwapVenue, TokenBank,
};
