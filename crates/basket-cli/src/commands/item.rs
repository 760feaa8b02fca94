//! Item command handlers

use anyhow::{bail, Context, Result};

use basket_core::{EntityId, ItemPatch, Reconciler};

use super::{parse_item_id, parse_list_id};
use crate::output::Output;

/// Add an item to a list
pub async fn add(
    reconciler: &Reconciler,
    list: String,
    name: String,
    quantity: u32,
    output: &Output,
) -> Result<()> {
    let list_id = parse_list_id(&list, reconciler)?;

    let item = reconciler
        .create_item(&list_id, &name, quantity)
        .await
        .context("Failed to add item")?;

    output.success(&format!("Added item: {}", item.id));
    output.print_item(&item);
    print_progress(reconciler, &list_id, output);

    Ok(())
}

/// Rename an item or change its quantity
pub async fn edit(
    reconciler: &Reconciler,
    id: String,
    name: Option<String>,
    quantity: Option<u32>,
    output: &Output,
) -> Result<()> {
    let item_id = parse_item_id(&id, reconciler)?;

    let patch = ItemPatch {
        name,
        quantity,
        completed: None,
    };
    if patch.is_empty() {
        bail!("Nothing to change. Pass --name or --quantity.");
    }

    let item = reconciler
        .update_item(&item_id, patch)
        .await
        .context("Failed to update item")?;

    output.success("Item updated");
    output.print_item(&item);

    Ok(())
}

/// Flip an item between done and not done
pub async fn toggle(reconciler: &Reconciler, id: String, output: &Output) -> Result<()> {
    let item_id = parse_item_id(&id, reconciler)?;

    let item = reconciler
        .toggle_item(&item_id)
        .await
        .context("Failed to toggle item")?;

    output.success(if item.completed {
        "Marked done"
    } else {
        "Marked not done"
    });
    output.print_item(&item);
    print_progress(reconciler, &item.list_id, output);

    Ok(())
}

/// Delete an item
pub async fn delete(reconciler: &Reconciler, id: String, output: &Output) -> Result<()> {
    let item_id = parse_item_id(&id, reconciler)?;

    reconciler
        .delete_item(&item_id)
        .await
        .context("Failed to delete item")?;

    output.success(&format!("Deleted item: {}", item_id));

    Ok(())
}

fn print_progress(reconciler: &Reconciler, list_id: &EntityId, output: &Output) {
    if let Some(progress) = reconciler.progress(list_id) {
        output.message(&format!("Progress: {}", progress));
    }
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
    async fn test_groceries_flow() {
        let temp = TempDir::new().unwrap();
        let session = session(&temp).await;
        let reconciler = &session.reconciler;
        let output = Output::new(OutputFormat::Quiet);

        let list = reconciler.create_list("Groceries", None).await.unwrap();
        let list_ref = list.id.to_string();
        add(reconciler, list_ref.clone(), "Milk".into(), 2, &output)
            .await
            .unwrap();
        add(reconciler, list_ref, "Bread".into(), 1, &output)
            .await
            .unwrap();

        let milk = reconciler.items(&list.id)[0].id.to_string();
        toggle(reconciler, milk.clone(), &output).await.unwrap();
        assert_eq!(reconciler.progress(&list.id).unwrap().percent(), 50);

        edit(reconciler, milk.clone(), None, Some(3), &output)
            .await
            .unwrap();
        assert_eq!(reconciler.items(&list.id)[0].quantity, 3);

        delete(reconciler, milk, &output).await.unwrap();
        assert_eq!(reconciler.items(&list.id).len(), 1);
        assert_eq!(reconciler.progress(&list.id).unwrap().percent(), 0);
    }

    #[tokio::test]
    async fn test_add_rejects_zero_quantity() {
        let temp = TempDir::new().unwrap();
        let session = session(&temp).await;
        let output = Output::new(OutputFormat::Quiet);

        let list = session
            .reconciler
            .create_list("Groceries", None)
            .await
            .unwrap();
        let err = add(
            &session.reconciler,
            list.id.to_string(),
            "Milk".into(),
            0,
            &output,
        )
        .await
        .unwrap_err();
        assert!(format!("{:#}", err).contains("quantity"));
        assert!(session.reconciler.items(&list.id).is_empty());
    }
}
