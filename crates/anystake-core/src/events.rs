// crates/anystake-core/src/events.rs
//
// Ledger events. Deposits, withdrawals and claims are recorded so that
// off-chain reporting can reconstruct per-user and per-pool activity.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::context::Block;
use crate::math::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Deposit,
    Withdraw,
    Claim,
}

/// A single ledger event. `pid` is `None` for the single-pool regulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub kind: EventKind,
    pub user: Address,
    pub pid: Option<usize>,
    pub amount: Amount,
    pub block: Block,
}
