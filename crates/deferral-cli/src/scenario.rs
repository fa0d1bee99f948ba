use crate::config::ScenarioConfig;
use deferral::{Action, DeferredDispatchRegistry, Error, ResolvedEntity, Resolution};
use serde_json::json;
use tokio::{sync::mpsc, time::sleep};

/// What happened during a run.
#[derive(Debug)]
pub struct Report {
    /// Every dispatched action, in dispatch order.
    pub dispatched: Vec<Action>,
    /// Provisional edits accepted before the create resolved.
    pub accepted: usize,
    /// Provisional edits refused because nothing was pending anymore.
    pub rejected: usize,
    /// Terminal outcome of the pending operation.
    pub outcome: deferral::Result<Resolution>,
}

/// Simulates an optimistic create followed by a burst of edits.
///
/// The create request resolves (or fails) after `resolve_after`; edits are
/// pushed every `edit_interval` starting right after the create is sent.
/// `on_dispatch` sees each action as soon as it is dispatched.
///
/// # Errors
///
/// Fails if the key is already pending, which cannot happen on the fresh
/// registry each run uses.
pub async fn run(
    config: &ScenarioConfig,
    mut on_dispatch: impl FnMut(&Action),
) -> anyhow::Result<Report> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
    let registry = DeferredDispatchRegistry::new(tx);

    let creation = {
        let delay = config.resolve_after;
        let fail = config.fail;
        let id = config.resolved_id.clone();
        async move {
            sleep(delay).await;
            if fail {
                Err("simulated create request failed")
            } else {
                Ok(ResolvedEntity::new(id).with("title", "Untitled"))
            }
        }
    };

    let handle = registry
        .put_with_field(
            config.key.as_str(),
            creation,
            |entity| Action::new("CREATED").with("entity", entity),
            config.payload_field.as_str(),
        )
        .ok_or_else(|| anyhow::anyhow!("key {} is already pending", config.key))?;
    tracing::info!(key = %config.key, "Create request sent");

    let editor = {
        let registry = registry.clone();
        let config = config.clone();
        tokio::spawn(async move { push_edits(&registry, &config).await })
    };

    let printer = async move {
        let mut dispatched = Vec::new();
        while let Some(action) = rx.recv().await {
            on_dispatch(&action);
            dispatched.push(action);
        }
        dispatched
    };

    let driver = async move {
        let outcome = handle.await;
        let counts = editor.await.unwrap_or_else(|e| {
            tracing::error!("Editor task failed: {e}");
            (0, config.edits)
        });
        // Closes the dispatch channel once the unit is gone too.
        drop(registry);
        (outcome, counts)
    };

    let (dispatched, (outcome, (accepted, rejected))) = tokio::join!(printer, driver);

    match &outcome {
        Ok(resolution) => tracing::info!(
            key = %config.key,
            superseded = resolution.superseded,
            merged = resolution.merged.is_some(),
            "Create resolved"
        ),
        Err(e) => tracing::warn!(key = %config.key, "Create did not resolve: {e}"),
    }

    Ok(Report {
        dispatched,
        accepted,
        rejected,
        outcome,
    })
}

/// Pushes `config.edits` provisional edits, returning how many were accepted
/// and how many were refused.
async fn push_edits(registry: &DeferredDispatchRegistry, config: &ScenarioConfig) -> (usize, usize) {
    let mut accepted = 0;
    let mut rejected = 0;

    for revision in 1..=config.edits {
        if revision > 1 {
            sleep(config.edit_interval).await;
        }

        let action = Action::new("EDIT").with(
            config.payload_field.as_str(),
            json!({ "id": config.key, "revision": revision, "text": format!("revision {revision}") }),
        );

        match registry.push_action(&config.key, action) {
            Ok(()) => accepted += 1,
            Err(Error::NotFound { key }) => {
                tracing::warn!(key = %key, revision, "Edit arrived after the create settled");
                rejected += 1;
            }
            Err(e) => {
                tracing::error!("Unexpected error pushing edit: {e}");
                rejected += 1;
            }
        }
    }

    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use serde_json::Value;

    fn config(edits: usize, resolve_after_ms: u64) -> ScenarioConfig {
        ScenarioConfig {
            key: "draft-1".into(),
            resolved_id: json!("server-42"),
            resolve_after: Duration::from_millis(resolve_after_ms),
            edits,
            edit_interval: Duration::from_millis(10),
            payload_field: "payload".into(),
            fail: false,
            log_json: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn edits_before_resolution_collapse_into_one() {
        let report = run(&config(3, 100), |_| {}).await.unwrap();

        assert_eq!(report.accepted, 3);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.outcome.unwrap().superseded, 2);

        let dispatched: Vec<Value> = report.dispatched.into_iter().map(Value::from).collect();
        assert_eq!(
            dispatched,
            [
                json!({
                    "type": "CREATED",
                    "entity": { "id": "server-42", "title": "Untitled", "uuid": "draft-1" }
                }),
                json!({
                    "type": "EDIT",
                    "payload": { "id": "server-42", "revision": 3, "text": "revision 3" }
                }),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_edits_are_rejected() {
        // Edits at t = 0, 10, 20, 30; the create settles at t = 15.
        let report = run(&config(4, 15), |_| {}).await.unwrap();

        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.dispatched.len(), 2);
        assert_eq!(report.dispatched[1].get("payload").unwrap()["revision"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_create_dispatches_nothing() {
        let mut config = config(2, 5);
        config.fail = true;
        let mut seen = 0;

        let report = run(&config, |_| seen += 1).await.unwrap();

        assert!(matches!(report.outcome, Err(Error::Upstream { .. })));
        assert!(report.dispatched.is_empty());
        assert_eq!(seen, 0);
    }
}
