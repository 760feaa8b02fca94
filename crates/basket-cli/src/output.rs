//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use basket_core::{Item, ShoppingList};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize output: {}", e),
        }
    }

    /// Print a single list with its items
    pub fn print_list(&self, list: &ShoppingList) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:          {}", list.id);
                println!("Name:        {}", list.name);
                if let Some(ref desc) = list.description {
                    println!("Description: {}", desc);
                }
                println!("Progress:    {}", list.progress());
                println!("Created:     {}", list.created_at.format("%Y-%m-%d %H:%M"));
                println!("Updated:     {}", list.updated_at.format("%Y-%m-%d %H:%M"));

                println!();
                if list.items.is_empty() {
                    println!("No items on this list.");
                    return;
                }
                println!("── Items ({}) ──", list.items.len());
                for item in &list.items {
                    println!("{}", item_line(item));
                }
            }
            OutputFormat::Json => self.print_json(list),
            OutputFormat::Quiet => {
                println!("{}", list.id);
            }
        }
    }

    /// Print the dashboard: every list with its progress
    pub fn print_lists(&self, lists: &[ShoppingList]) {
        match self.format {
            OutputFormat::Human => {
                if lists.is_empty() {
                    println!("No lists found.");
                    return;
                }
                for list in lists {
                    println!(
                        "{} | {} | {}",
                        short_id(list.id.as_str()),
                        truncate(&list.name, 35),
                        list.progress()
                    );
                }
                println!("\n{} list(s)", lists.len());
            }
            OutputFormat::Json => {
                let json_lists: Vec<_> = lists
                    .iter()
                    .map(|list| {
                        let progress = list.progress();
                        serde_json::json!({
                            "id": list.id,
                            "name": list.name,
                            "description": list.description,
                            "updated_at": list.updated_at,
                            "completed": progress.completed,
                            "total": progress.total,
                            "percent": progress.percent(),
                        })
                    })
                    .collect();
                self.print_json(&json_lists);
            }
            OutputFormat::Quiet => {
                for list in lists {
                    println!("{}", list.id);
                }
            }
        }
    }

    /// Print a single item
    pub fn print_item(&self, item: &Item) {
        match self.format {
            OutputFormat::Human => println!("{}", item_line(item)),
            OutputFormat::Json => self.print_json(item),
            OutputFormat::Quiet => {
                println!("{}", item.id);
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn item_line(item: &Item) -> String {
    format!(
        "[{}] {} | {} x{}",
        if item.completed { "x" } else { " " },
        short_id(item.id.as_str()),
        truncate(&item.name, 40),
        item.quantity
    )
}

/// First 8 characters of an id
fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map(|(i, _)| &id[..i]).unwrap_or(id)
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
