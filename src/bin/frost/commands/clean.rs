//! `frost clean` command

use anyhow::Result;

use crate::cli::CleanArgs;
use crate::commands::bundle_path;
use frost::core::Platform;
use frost::ops::freeze::{clean, FreezeOptions};
use frost::util::GlobalContext;

pub fn execute(args: CleanArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let config = ctx.load_config();

    let opts = FreezeOptions {
        bundle_path: bundle_path(&ctx, args.config)?,
        ..FreezeOptions::default()
    };

    let removed = clean(&config, &opts, &Platform::host())?;
    if removed.is_empty() {
        eprintln!("     Nothing to remove");
    }
    for path in removed {
        eprintln!("     Removed {}", path.display());
    }

    Ok(())
}
