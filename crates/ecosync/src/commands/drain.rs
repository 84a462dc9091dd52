//! `ecosync drain`: replay queued writes against the backend.

use tabled::Tabled;

use ecosync_core::{DrainOutcome, EngineConfig, SyncEngine};

use crate::cli::{DrainArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::go_online;

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Outcome")]
    outcome: &'static str,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn outcome_row(outcome: &DrainOutcome) -> OutcomeRow {
    let (label, id, detail) = match outcome {
        DrainOutcome::Idle => ("idle", None, "queue is empty".to_owned()),
        DrainOutcome::Busy => ("busy", None, "another drain pass is running".to_owned()),
        DrainOutcome::Offline => ("offline", None, "not attempted".to_owned()),
        DrainOutcome::Delivered { id, entity_id } => (
            "delivered",
            Some(id),
            entity_id
                .as_deref()
                .map_or_else(String::new, |e| format!("entity {e}")),
        ),
        DrainOutcome::Retrying {
            id,
            attempts,
            retry_in,
        } => (
            "retrying",
            Some(id),
            format!(
                "attempt {attempts}, next try in {}",
                humantime::format_duration(*retry_in)
            ),
        ),
        DrainOutcome::Failed { id, error } => ("failed", Some(id), error.clone()),
    };
    OutcomeRow {
        outcome: label,
        id: id.map(ToString::to_string).unwrap_or_default(),
        detail,
    }
}

fn outcome_id(outcome: &DrainOutcome) -> String {
    outcome_row(outcome).id
}

pub async fn handle(
    config: EngineConfig,
    args: DrainArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let once = args.once;
    let outcomes = SyncEngine::oneshot(config, |engine| async move {
        go_online(&engine, global);
        if once {
            Ok(vec![engine.drain_once().await?])
        } else {
            engine.drain_all().await
        }
    })
    .await?;

    let out = output::render_list(&global.output, &outcomes, outcome_row, outcome_id)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn retrying_row_shows_backoff() {
        let id = Uuid::new_v4();
        let row = outcome_row(&DrainOutcome::Retrying {
            id,
            attempts: 2,
            retry_in: Duration::from_secs(4),
        });
        assert_eq!(row.outcome, "retrying");
        assert_eq!(row.id, id.to_string());
        assert_eq!(row.detail, "attempt 2, next try in 4s");
    }

    #[test]
    fn idle_row_has_no_id() {
        let row = outcome_row(&DrainOutcome::Idle);
        assert!(row.id.is_empty());
    }
}
