//! Status command handler

use anyhow::Result;

use basket_core::{Progress, SCHEMA_VERSION};

use super::Session;
use crate::output::{Output, OutputFormat};

/// Show session user, storage location, and totals
pub fn show(session: &Session, output: &Output) -> Result<()> {
    let config = &session.config;
    let lists = session.reconciler.lists();
    let items: Vec<_> = lists.iter().flat_map(|l| l.items.iter().cloned()).collect();
    let overall = Progress::of(&items);
    let db_size = std::fs::metadata(config.database_path())
        .map(|m| m.len())
        .unwrap_or(0);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "user": session.reconciler.owner(),
                    "storage": {
                        "data_dir": config.data_dir,
                        "database": config.database_path(),
                        "size_bytes": db_size,
                        "schema_version": SCHEMA_VERSION
                    },
                    "contents": {
                        "lists": lists.len(),
                        "items": overall.total,
                        "completed": overall.completed
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", session.reconciler.owner());
        }
        OutputFormat::Human => {
            println!("Basket Status");
            println!("=============");
            println!();
            println!("User: {}", session.reconciler.owner());
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!("  Database: {} ({})", config.database_path().display(), human_size(db_size));
            println!();
            println!("Contents:");
            println!("  Lists: {}", lists.len());
            println!("  Items: {}", overall.total);
            println!("  Done:  {}", overall);
        }
    }

    Ok(())
}

fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
