//! `frost inspect` command

use anyhow::Result;

use crate::cli::InspectArgs;
use frost::ops::inspect::{format_listing, inspect, InspectOptions, InspectResult};

pub fn execute(args: InspectArgs) -> Result<()> {
    let opts = InspectOptions {
        archive: args.archive,
        extract: args.extract,
        output: args.output,
        key: args.key,
    };

    match inspect(&opts)? {
        InspectResult::Listing(listing) => print!("{}", format_listing(&listing)),
        InspectResult::Extracted { name, output, len } => {
            eprintln!("   Extracted `{}` ({} bytes) -> {}", name, len, output.display());
        }
    }

    Ok(())
}
