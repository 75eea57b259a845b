// crates/anystake-economics/src/lib.rs
//
// anystake-economics: reward accounting and treasury distribution for the
// AnyStake economy. Pool ledger, treasury with bonded emission and revenue
// split, peg regulator, and the ledger migration sequence.
//
// All token amounts are raw integer units of their token; accumulators and
// prices are WAD-scaled (10^18).

pub mod emission;
pub mod ledger;
pub mod migration;
pub mod pool;
pub mod regulator;
pub mod rewards;
pub mod treasury;

// Re-export key types for ergonomic access from downstream crates.
pub use emission::BondedSchedule;
pub use ledger::{PoolRegistry, DEFAULT_EXTERNAL_POOL_THRESHOLD, DEFAULT_STIPEND};
pub use migration::{MigrationCoordinator, MigrationPhase};
pub use pool::{Pool, PoolParams, UserStake};
pub use regulator::{PegRegulator, PegSide, RegulatorExit, DEFAULT_PEG_PENALTY_RATE};
pub use rewards::{split_revenue, RevenueSplit, DEFAULT_BUYBACK_RATE, DEFAULT_DISTRIBUTION_RATE};
pub use treasury::Treasury;
