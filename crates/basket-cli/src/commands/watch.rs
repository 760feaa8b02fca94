//! Watch command handler
//!
//! Keeps the dashboard (or one list) on screen and reprints it whenever the
//! local state changes, until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use basket_core::{LiveSync, ReconcilerEvent, Subscriber};

use super::{parse_list_id, Session};
use crate::output::Output;

pub async fn watch(session: &Session, list: Option<String>, output: &Output) -> Result<()> {
    let reconciler = &session.reconciler;
    let mut events = reconciler
        .take_events()
        .context("Event stream already taken")?;

    let subscriber = Subscriber::new(Arc::new(session.backend.clone()))
        .with_delays(session.config.settle_delays());

    let list_id = match list {
        Some(ref id) => Some(parse_list_id(id, reconciler)?),
        None => None,
    };
    let live = match list_id {
        Some(ref id) => LiveSync::list_view(reconciler.clone(), &subscriber, id.clone()),
        None => LiveSync::dashboard(reconciler.clone(), &subscriber),
    };
    info!("Watching {:?}", live.scopes());

    let render = || match list_id {
        Some(ref id) => match reconciler.list(id) {
            Some(list) => output.print_list(&list),
            None => output.message("List no longer exists."),
        },
        None => output.print_lists(&reconciler.lists()),
    };

    render();
    output.message("Watching for changes (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(ReconcilerEvent::Changed) => {
                    output.message("");
                    render();
                }
                Some(ReconcilerEvent::RefreshFailed(e)) => {
                    if !output.is_quiet() {
                        eprintln!("⚠ Refresh failed: {}", e);
                    }
                }
                Some(ReconcilerEvent::RolledBack { .. }) => {}
                None => break,
            },
        }
    }

    live.shutdown().await;
    Ok(())
}
