//! `ecosync queue`: inspect and manage the offline mutation queue.

use bytesize::ByteSize;
use chrono::Utc;
use tabled::Tabled;

use ecosync_core::{
    AuditEntry, EngineConfig, MutationPayload, MutationStatus, QueueCounts, QueuedMutation,
    SubmitOutcome, SyncEngine,
};

use crate::cli::{EnqueueArgs, GlobalOpts, QueueArgs, QueueCommand, StatusFilter};
use crate::error::CliError;
use crate::output;

use super::{go_online, util};

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct MutationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Op")]
    op: String,
    #[tabled(rename = "Prio")]
    priority: u8,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Tries")]
    attempts: u32,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Last error")]
    last_error: String,
}

#[derive(Tabled)]
struct AuditRow {
    #[tabled(rename = "Time")]
    at: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Op")]
    op: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn audit_row(entry: &AuditEntry) -> AuditRow {
    AuditRow {
        at: entry.at.format("%Y-%m-%d %H:%M:%S").to_string(),
        action: entry.action.to_string(),
        op: entry.op_type.to_string(),
        id: entry.mutation_id.to_string(),
        detail: entry.detail.clone().unwrap_or_default(),
    }
}

fn mutation_row(record: &QueuedMutation, color: bool) -> MutationRow {
    MutationRow {
        id: record.id.to_string(),
        op: record.op_type.to_string(),
        priority: record.priority,
        status: output::status_label(record.status, color),
        attempts: record.attempts,
        age: age(record),
        file: record
            .payload
            .attachment
            .as_ref()
            .map(|a| ByteSize::b(a.data.len() as u64).to_string())
            .unwrap_or_default(),
        last_error: record.last_error.clone().unwrap_or_default(),
    }
}

fn age(record: &QueuedMutation) -> String {
    let elapsed = (Utc::now() - record.created_at)
        .to_std()
        .unwrap_or_default();
    let whole_secs = std::time::Duration::from_secs(elapsed.as_secs());
    humantime::format_duration(whole_secs).to_string()
}

fn matches_filter(record: &QueuedMutation, filter: Option<StatusFilter>) -> bool {
    match filter {
        None => true,
        Some(StatusFilter::Pending) => record.status == MutationStatus::Pending,
        Some(StatusFilter::InFlight) => record.status == MutationStatus::InFlight,
        Some(StatusFilter::Failed) => record.status == MutationStatus::Failed,
    }
}

fn render_records(records: &[QueuedMutation], global: &GlobalOpts) -> Result<String, CliError> {
    let color = output::should_color(&global.color);
    Ok(output::render_list(
        &global.output,
        records,
        |r| mutation_row(r, color),
        |r| r.id.to_string(),
    )?)
}

fn counts_detail(counts: &QueueCounts) -> String {
    output::detail(&[
        ("Pending", counts.pending.to_string()),
        ("In flight", counts.in_flight.to_string()),
        ("Failed", counts.failed.to_string()),
        ("Total", counts.total().to_string()),
    ])
}

fn outcome_detail(outcome: &SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::Delivered { id, entity_id } => output::detail(&[
            ("ID", id.to_string()),
            ("Outcome", "delivered".into()),
            ("Entity", entity_id.clone().unwrap_or_else(|| "-".into())),
        ]),
        SubmitOutcome::Queued { id } => output::detail(&[
            ("ID", id.to_string()),
            ("Outcome", "queued".into()),
        ]),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    config: EngineConfig,
    args: QueueArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        QueueCommand::List { status } => {
            let records = SyncEngine::oneshot(config, |engine| async move {
                Ok(engine.queue().list_all().await)
            })
            .await?;
            let records: Vec<_> = records
                .into_iter()
                .filter(|r| matches_filter(r, status))
                .collect();
            output::print_output(&render_records(&records, global)?, global.quiet);
            Ok(())
        }

        QueueCommand::Issues => {
            let records = SyncEngine::oneshot(config, |engine| async move {
                Ok(engine.list_failed().await)
            })
            .await?;
            output::print_output(&render_records(&records, global)?, global.quiet);
            Ok(())
        }

        QueueCommand::Counts => {
            let counts = SyncEngine::oneshot(config, |engine| async move {
                Ok(engine.queue_counts().await)
            })
            .await?;
            let out = output::render_single(&global.output, &counts, counts_detail, |c| {
                c.total().to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        QueueCommand::Enqueue(args) => enqueue(config, args, global).await,

        QueueCommand::Log { limit, clear } => {
            if clear {
                let removed = SyncEngine::oneshot(config, |engine| async move {
                    engine.queue().audit().clear().await
                })
                .await?;
                if !global.quiet {
                    eprintln!("✓ Cleared {removed} audit entries");
                }
                return Ok(());
            }

            let entries = SyncEngine::oneshot(config, |engine| async move {
                engine.queue().audit().entries(Some(limit)).await
            })
            .await?;
            let out = output::render_list(&global.output, &entries, audit_row, |e| {
                e.to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        QueueCommand::Retry { id } => {
            let id = util::parse_mutation_id(&id)?;
            let record =
                SyncEngine::oneshot(config, |engine| async move { engine.retry(id).await })
                    .await?;
            if !global.quiet {
                eprintln!("✓ {} re-queued with a fresh retry budget", record.id);
            }
            Ok(())
        }

        QueueCommand::Discard { id } => {
            let id = util::parse_mutation_id(&id)?;
            let record =
                SyncEngine::oneshot(config, |engine| async move { engine.discard(id).await })
                    .await?;
            if !global.quiet {
                eprintln!("✓ Discarded {} ({})", record.id, record.op_type);
            }
            Ok(())
        }
    }
}

async fn enqueue(
    config: EngineConfig,
    args: EnqueueArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let body = match (args.data, args.from_file) {
        (Some(raw), _) => serde_json::from_str(&raw)?,
        (None, Some(path)) => util::read_json_file(&path)?,
        (None, None) => serde_json::Value::Object(serde_json::Map::new()),
    };
    let mut payload = MutationPayload::json(body);
    if let Some(ref path) = args.attach {
        payload = payload.with_attachment(util::read_attachment(path)?);
    }

    let op_type = args.op;
    let priority = args.priority;
    let direct = args.direct;

    let outcome = SyncEngine::oneshot(config, |engine| async move {
        if direct {
            go_online(&engine, global);
            engine.submit_or_enqueue(op_type, payload, priority).await
        } else {
            let id = engine.enqueue(op_type, payload, priority).await?;
            Ok(SubmitOutcome::Queued { id })
        }
    })
    .await?;

    let out = output::render_single(&global.output, &outcome, outcome_detail, |o| {
        o.id().to_string()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
