// crates/anystake-sim/src/lib.rs
//
// anystake-sim: scenario runner for the AnyStake economy. Deploys the
// treasury, ledger and peg regulator on top of the in-memory market,
// executes a TOML scenario step by step, and reports the final state.

pub mod config;
pub mod error;
pub mod output;
pub mod runtime;
pub mod scenario;
pub mod units;

pub use config::SimConfig;
pub use error::SimError;
pub use output::{render, OutputFormat, Report, StepRow};
pub use runtime::Chain;
pub use scenario::Step;

/// Deploy `config` and run its steps.
///
/// A failed step is rolled back and recorded in the report; with `strict`
/// the run stops there instead. The accounting invariants are checked once
/// the last step has run.
pub fn run(config: &SimConfig, strict: bool) -> Result<Report, SimError> {
    let mut chain = Chain::deploy(config)?;
    let mut rows = Vec::with_capacity(config.steps.len());

    for (index, step) in config.steps.iter().enumerate() {
        let block = chain.block();
        match chain.apply(step) {
            Ok(result) => {
                tracing::info!(index, block, step = %step, %result, "step applied");
                rows.push(StepRow {
                    index,
                    block,
                    step: step.to_string(),
                    result,
                    ok: true,
                });
            }
            Err(e) if strict => {
                return Err(SimError::StepFailed {
                    index,
                    step: step.to_string(),
                    source: Box::new(e),
                });
            }
            Err(e) => {
                rows.push(StepRow {
                    index,
                    block,
                    step: step.to_string(),
                    result: format!("failed: {}", e),
                    ok: false,
                });
            }
        }
    }

    let violations = chain.check_invariants();
    if !violations.is_empty() {
        return Err(SimError::Invariant(violations.join("; ")));
    }
    Ok(chain.report(rows))
}
