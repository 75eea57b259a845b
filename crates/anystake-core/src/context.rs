// crates/anystake-core/src/context.rs
//
// Per-call platform context. There is no background scheduler: all
// time-based accrual is computed lazily from the block height carried by
// the call that touches the state.

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Block height.
pub type Block = u64;

/// Who is calling, and at which block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub caller: Address,
    pub block: Block,
}

impl CallContext {
    pub fn new(caller: Address, block: Block) -> Self {
        Self { caller, block }
    }

    /// Same block, different caller.
    pub fn as_caller(&self, caller: Address) -> Self {
        Self {
            caller,
            block: self.block,
        }
    }
}
