//! `subtree inspect`: list the join commits reachable from a revision.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use subtree_core::object::CommitId;
use subtree_core::prefix::Prefix;
use subtree_core::SubtreeOps;

use super::style;

pub fn run_inspect(ops: &SubtreeOps, head: &CommitId, prefix: Option<&Prefix>) -> Result<()> {
    let joins = ops.joins(head, prefix).context("failed to scan history for subtree metadata")?;

    if joins.is_empty() {
        println!();
        println!("{}", style::dim("No subtree joins found."));
        println!();
        return Ok(());
    }

    println!();
    println!("{}", style::header(&format!("Subtree Joins ({})", joins.len())));
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Commit", "Date", "Dir", "Mainline", "Split", "Subject"]);

    let short = |id: &Option<CommitId>| id.as_ref().map(CommitId::short).unwrap_or_else(|| "—".to_string());
    for join in &joins {
        let date = join
            .commit
            .committer
            .timestamp
            .to_datetime()
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "—".to_string());
        let dir = join
            .metadata
            .subtree_dir
            .as_ref()
            .map(|dir| dir.as_internal_str().to_string())
            .unwrap_or_else(|| "—".to_string());

        table.add_row(vec![
            Cell::new(join.commit.id.short()),
            Cell::new(&date),
            Cell::new(&dir),
            Cell::new(short(&join.metadata.mainline_commit)),
            Cell::new(short(&join.metadata.split_commit)),
            Cell::new(join.commit.subject()),
        ]);
    }

    println!("{}", table);
    println!();
    Ok(())
}
