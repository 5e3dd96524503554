//! `bunker images`: List images.

use bunker_runtime::engine::Engine;

use crate::output::{self, Table};

const COLUMN_WIDTH: usize = 15;

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn execute(engine: &Engine) -> anyhow::Result<()> {
    let mut table = Table::new(COLUMN_WIDTH, &["IMAGE ID", "SOURCE", "SIZE", "CREATED"]);
    for image in engine.images()? {
        table.row(&[
            image.id.to_string(),
            image.source,
            image.size,
            image.created,
        ]);
    }
    output::table(&table)
}
