//! List command handlers

use anyhow::{bail, Context, Result};

use basket_core::{ListPatch, Reconciler};

use super::parse_list_id;
use crate::output::Output;
use crate::prompt::confirm;

/// Show every list with its progress
pub fn list_all(reconciler: &Reconciler, output: &Output) -> Result<()> {
    output.print_lists(&reconciler.lists());
    Ok(())
}

/// Create a new list
pub async fn create(
    reconciler: &Reconciler,
    name: String,
    description: Option<String>,
    output: &Output,
) -> Result<()> {
    let list = reconciler
        .create_list(&name, description.as_deref())
        .await
        .context("Failed to create list")?;

    output.success(&format!("Created list: {}", list.id));
    output.print_list(&list);

    Ok(())
}

/// Show a single list with its items
pub fn show(reconciler: &Reconciler, id: String, output: &Output) -> Result<()> {
    let list_id = parse_list_id(&id, reconciler)?;

    let list = reconciler
        .list(&list_id)
        .ok_or_else(|| anyhow::anyhow!("List not found: {}", id))?;

    output.print_list(&list);
    Ok(())
}

/// Rename a list or change its description
pub async fn edit(
    reconciler: &Reconciler,
    id: String,
    name: Option<String>,
    description: Option<String>,
    clear_description: bool,
    output: &Output,
) -> Result<()> {
    let list_id = parse_list_id(&id, reconciler)?;

    let description = if clear_description {
        Some(None)
    } else {
        description.map(Some)
    };
    let patch = ListPatch { name, description };
    if patch.is_empty() {
        bail!("Nothing to change. Pass --name, --description, or --clear-description.");
    }

    let list = reconciler
        .update_list(&list_id, patch)
        .await
        .context("Failed to update list")?;

    output.success("List updated");
    output.print_list(&list);

    Ok(())
}

/// Delete a list and all of its items
pub async fn delete(reconciler: &Reconciler, id: String, output: &Output) -> Result<()> {
    let list_id = parse_list_id(&id, reconciler)?;

    let list = reconciler
        .list(&list_id)
        .ok_or_else(|| anyhow::anyhow!("List not found: {}", id))?;

    // Confirm deletion
    if output.should_prompt() {
        println!(
            "Delete list: {} ({} item(s))",
            list.name,
            list.items.len()
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    reconciler
        .delete_list(&list_id)
        .await
        .context("Failed to delete list")?;

    output.success(&format!("Deleted list: {}", list_id));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Session;
    use crate::output::OutputFormat;
    use basket_core::Config;
    use tempfile::TempDir;

    async fn session(temp: &TempDir) -> Session {
        let config = Config {
            data_dir: temp.path().to_path_buf(),
            ..Config::default()
        };
        Session::open(config, Some("alice".to_string())).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_edit_delete() {
        let temp = TempDir::new().unwrap();
        let session = session(&temp).await;
        let reconciler = &session.reconciler;
        let output = Output::new(OutputFormat::Quiet);

        create(reconciler, "Groceries".into(), Some("weekly".into()), &output)
            .await
            .unwrap();
        let list = reconciler.lists()[0].clone();
        assert_eq!(list.description.as_deref(), Some("weekly"));

        edit(
            reconciler,
            list.id.to_string(),
            Some("Food".into()),
            None,
            true,
            &output,
        )
        .await
        .unwrap();
        let list = reconciler.list(&list.id).unwrap();
        assert_eq!(list.name, "Food");
        assert!(list.description.is_none());

        delete(reconciler, list.id.to_string(), &output)
            .await
            .unwrap();
        assert!(reconciler.lists().is_empty());
    }

    #[tokio::test]
    async fn test_edit_requires_a_change() {
        let temp = TempDir::new().unwrap();
        let session = session(&temp).await;
        let output = Output::new(OutputFormat::Quiet);

        create(&session.reconciler, "Groceries".into(), None, &output)
            .await
            .unwrap();
        let id = session.reconciler.lists()[0].id.to_string();

        let err = edit(&session.reconciler, id, None, None, false, &output)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Nothing to change"));
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let temp = TempDir::new().unwrap();
        let session = session(&temp).await;
        let output = Output::new(OutputFormat::Quiet);

        assert!(create(&session.reconciler, "   ".into(), None, &output)
            .await
            .is_err());
        assert!(session.reconciler.lists().is_empty());
    }
}
