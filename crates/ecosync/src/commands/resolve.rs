//! `ecosync resolve`: point lookup through memory, cache, then network.

use serde::Serialize;

use ecosync_core::{EngineConfig, EntityRecord, Resolution, SyncEngine, Tier};

use crate::cli::{GlobalOpts, ResolveArgs};
use crate::error::CliError;
use crate::output;

use super::go_online;

#[derive(Debug, Serialize)]
struct ResolvedView {
    id: String,
    tier: Tier,
    possibly_stale: bool,
    #[serde(flatten)]
    record: EntityRecord,
}

fn detail(view: &ResolvedView) -> String {
    let body = serde_json::to_string_pretty(&view.record).unwrap_or_default();
    let mut out = output::detail(&[
        ("ID", view.id.clone()),
        ("Type", view.record.entity_type().to_string()),
        ("Tier", view.tier.to_string()),
        (
            "Stale",
            if view.possibly_stale {
                "possibly".into()
            } else {
                "no".into()
            },
        ),
    ]);
    out.push_str("\n\n");
    out.push_str(&body);
    out
}

pub async fn handle(
    config: EngineConfig,
    args: ResolveArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let ResolveArgs { entity_type, id } = args;
    let lookup_id = id.clone();
    let resolution = SyncEngine::oneshot(config, |engine| async move {
        go_online(&engine, global);
        Ok(engine.resolve_entity(&lookup_id, entity_type).await)
    })
    .await?;

    let view = match resolution {
        Resolution::Found {
            record,
            tier,
            possibly_stale,
        } => ResolvedView {
            id,
            tier,
            possibly_stale,
            record,
        },
        Resolution::NotFound => {
            return Err(CliError::NotFound {
                resource_type: entity_type.to_string(),
                identifier: id,
                list_command: "run --user <id>".into(),
            });
        }
    };

    let out = output::render_single(&global.output, &view, detail, |v| v.id.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}
