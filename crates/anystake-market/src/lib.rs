// crates/anystake-market/src/lib.rs
//
// anystake-market: In-memory implementations of the collaborators the
// staking core consumes but never reimplements.
//
// - `bank`: token balances, decimals, fee-on-transfer, mint/burn.
// - `amm`: constant-product liquidity pairs (price oracle + swap venue).
// - `market`: `InMemoryMarket`, the single object implementing every
//   collaborator trait, plus the loyalty and governance registries.

pub mod amm;
pub mod bank;
pub mod market;

pub use amm::{Pair, SWAP_FEE_PER_MILLE};
pub use bank::{InMemoryBank, TokenSpec};
pub use market::InMemoryMarket;
