//! `bunker ps`: List containers and whether they are running.

use bunker_common::constants;
use bunker_runtime::engine::Engine;

use crate::output::{self, Table};

const COLUMN_WIDTH: usize = 20;

/// Executes the `ps` command.
///
/// The command column is cut to the column width.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn execute(engine: &Engine) -> anyhow::Result<()> {
    let mut table = Table::new(
        COLUMN_WIDTH,
        &["CONTAINER ID", "IMAGE", "COMMAND", "CREATED", "STATUS"],
    );
    for row in engine.ps()? {
        let command = row
            .entry
            .command
            .unwrap_or_else(|| constants::UNKNOWN.to_string());
        table.row(&[
            row.entry.id.to_string(),
            row.entry.source,
            output::cut(command.trim(), COLUMN_WIDTH),
            row.entry.created,
            row.status.to_string(),
        ]);
    }
    output::table(&table)
}
