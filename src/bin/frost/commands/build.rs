//! `frost build` command

use anyhow::Result;

use crate::cli::BuildArgs;
use crate::commands::bundle_path;
use frost::ops::freeze::{freeze, FreezeOptions};
use frost::util::fs::relative_path;
use frost::util::GlobalContext;

pub fn execute(args: BuildArgs, verbose: bool) -> Result<()> {
    let mut ctx = GlobalContext::new()?;
    ctx.set_verbose(verbose);

    let opts = FreezeOptions {
        bundle_path: bundle_path(&ctx, args.config)?,
        clean: args.clean,
        workpath: args.workpath,
        distpath: args.distpath,
        jobs: args.jobs,
    };

    let result = freeze(&ctx, &opts)?;

    if ctx.is_verbose() {
        for target in &result.targets {
            let status = if target.rebuilt { "Built" } else { "Fresh" };
            eprintln!("{:>12} {} {}", status, target.kind, target.output.display());
        }
    }
    if !result.warnings.is_empty() {
        eprintln!(
            "{:>12} {} warning(s) emitted, see above",
            "Warning",
            result.warnings.len()
        );
    }
    eprintln!(
        "    Finished `{}` -> {}",
        relative_path(ctx.cwd(), &opts.bundle_path).display(),
        relative_path(ctx.cwd(), &result.output).display()
    );

    Ok(())
}
