//! Implementation of the `ragstack teardown` command.

use ragstack::core::TeardownTarget;
use ragstack::teardown::TeardownSequencer;
use tracing::warn;

use super::build_context;

pub async fn run(target: TeardownTarget, yes: bool) -> anyhow::Result<()> {
    let ctx = build_context(yes).await?;
    let report = TeardownSequencer::new(target).run(&ctx).await?;
    println!("{}", report.render());

    if !report.is_clean() {
        warn!(
            failures = report.failures().len(),
            residue = report.residue().len(),
            "teardown finished with leftovers"
        );
    }
    Ok(())
}
