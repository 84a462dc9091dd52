//! `ecosync run`: keep a session alive and report store changes.

use serde::Serialize;
use tracing::{info, warn};

use ecosync_core::{Connectivity, EngineConfig, QueueCounts, SyncEngine};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::output;

use super::go_online;

#[derive(Debug, Serialize)]
struct StoreSummary {
    revision: u64,
    owner: Option<String>,
    connectivity: Connectivity,
    missions_active: usize,
    missions_pending: usize,
    missions_completed: usize,
    badges: usize,
    learning_progress: usize,
    community_posts: usize,
    notifications: usize,
    queue: QueueCounts,
}

impl StoreSummary {
    async fn capture(engine: &SyncEngine) -> Self {
        let store = engine.store();
        let missions = store.missions();
        Self {
            revision: store.revision(),
            owner: store.owner_id(),
            connectivity: engine.connectivity(),
            missions_active: missions.active.len(),
            missions_pending: missions.pending.len(),
            missions_completed: missions.completed.len(),
            badges: store.badges().len(),
            learning_progress: store.learning_progress().len(),
            community_posts: store.community_posts().len(),
            notifications: store.notifications().len(),
            queue: engine.queue_counts().await,
        }
    }

    fn line(&self) -> String {
        format!(
            "rev {} · {} · missions {}/{}/{} · posts {} · notifications {} · queue {} pending, {} failed",
            self.revision,
            self.connectivity,
            self.missions_active,
            self.missions_pending,
            self.missions_completed,
            self.community_posts,
            self.notifications,
            self.queue.pending + self.queue.in_flight,
            self.queue.failed,
        )
    }
}

async fn report(engine: &SyncEngine, global: &GlobalOpts) -> Result<(), CliError> {
    let summary = StoreSummary::capture(engine).await;
    let out = output::render_single(&global.output, &summary, StoreSummary::line, |s| {
        s.revision.to_string()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle(
    config: EngineConfig,
    args: RunArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let engine = SyncEngine::start(config).await?;
    go_online(&engine, global);

    let handles = match engine.start_session(&args.user, args.role).await {
        Ok(handles) => handles,
        Err(e) => {
            engine.shutdown().await;
            return Err(e.into());
        }
    };
    info!(user = %args.user, role = %args.role, feeds = handles.len(), "session started");

    let result = watch_until_interrupted(&engine, global).await;

    if let Err(e) = engine.end_session(false).await {
        warn!(error = %e, "failed to end session cleanly");
    }
    engine.shutdown().await;
    result
}

async fn watch_until_interrupted(engine: &SyncEngine, global: &GlobalOpts) -> Result<(), CliError> {
    let mut revisions = engine.store().subscribe_revision();
    let mut counts = engine.queue().subscribe_counts();
    let mut connectivity = engine.subscribe_connectivity();

    report(engine, global).await?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("interrupted, shutting down");
                return Ok(());
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            changed = counts.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
        report(engine, global).await?;
    }
}
