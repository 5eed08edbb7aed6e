//! Inspect command implementation

use anyhow::Result;

use crate::{StoreArgs, commands::Store};

/// Run the inspect command
pub fn run(args: &StoreArgs, index: String) -> Result<()> {
    let store = Store::open(args)?;
    let summary = store.open_index(&index)?.summary()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    store.report();
    Ok(())
}
