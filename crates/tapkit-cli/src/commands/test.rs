use anyhow::Result;

use tapkit_engine::standard_tests::{self, CapturedRecords};
use tapkit_engine::MessageEmitter;
use tapkit_types::message::Message;

use crate::commands::sync::{cancel_on_ctrl_c, prepare, print_summary};
use crate::SyncArgs;

/// Execute the `test` command: sync into memory, then run the standard tests.
pub async fn execute(args: &SyncArgs) -> Result<()> {
    let prepared = prepare(args).await?;
    cancel_on_ctrl_c(&prepared.cancel);
    let catalog = prepared.orchestrator.catalog().clone();

    let mut emitter = MessageEmitter::new(Vec::new());
    let result = prepared
        .orchestrator
        .run(prepared.initial, &mut emitter)
        .await;
    print_summary(&result);

    let output = String::from_utf8(emitter.into_inner())?;
    let messages = output
        .lines()
        .map(serde_json::from_str::<Message>)
        .collect::<Result<Vec<_>, _>>()?;
    let captured = CapturedRecords::from_messages(&messages);

    let mut failed = 0;
    let outcomes = standard_tests::run_all(&catalog, &captured);
    for (case, outcome) in &outcomes {
        match outcome {
            Ok(()) => println!("PASS  {}", case.id),
            Err(err) => {
                failed += 1;
                println!("FAIL  {}: {}", case.id, err.message);
            }
        }
    }
    println!("\n{} passed, {failed} failed", outcomes.len() - failed);

    if let Some(err) = result.error {
        anyhow::bail!("Sync {}: {err}", result.status);
    }
    if failed > 0 {
        anyhow::bail!("{failed} standard test(s) failed");
    }
    Ok(())
}
