use crate::cmd::{block_on, Session};
use crate::output::print_json;
use courier_core::action::{Situation, PUSH_MESSAGE_METADATA};
use std::collections::HashMap;
use std::path::Path;

pub fn run(
    root: &Path,
    payload: &str,
    situation: &str,
    push_message: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let situation: Situation = situation.parse()?;
    let mut metadata = HashMap::new();
    if let Some(raw) = push_message {
        let message: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("--push-message is not valid JSON: {e}"))?;
        metadata.insert(PUSH_MESSAGE_METADATA.to_string(), message);
    }

    let mut session = Session::open(root)?;
    block_on(async move {
        let Some(request) = session
            .courier
            .run_actions(Some(payload), situation, metadata)
        else {
            if json {
                print_json(&serde_json::json!({ "status": "ignored" }))?;
            } else {
                println!("Payload ignored: empty or not a JSON object.");
            }
            session.drain().await;
            return Ok::<(), anyhow::Error>(());
        };

        let summary = session.wait_for(request).await?;
        session.drain().await;

        if json {
            print_json(&serde_json::json!({
                "status": "finished",
                "request_id": request,
                "summary": summary,
            }))?;
        } else {
            println!(
                "Batch {request}: {} actions, {} completed, {} errors, {} rejected",
                summary.total, summary.completed, summary.errors, summary.rejected
            );
        }
        Ok::<(), anyhow::Error>(())
    })?
}
