//! `frost hooks` command

use anyhow::Result;

use crate::cli::HooksArgs;
use frost::hooks::HookEngine;
use frost::util::GlobalContext;

pub fn execute(args: HooksArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let config = ctx.load_config();

    let builtin: Vec<_> = config
        .loader
        .dir
        .iter()
        .map(|dir| dir.join("hooks"))
        .filter(|dir| dir.is_dir())
        .collect();
    let mut user = config.hooks.dirs.clone();
    user.extend(args.dirs);

    let engine = HookEngine::from_dirs(&builtin, &user)?;

    if engine.hooks().is_empty() {
        println!("no hooks found");
    }
    for (module, scripts) in engine.hooks().iter() {
        println!("{}", module);
        for script in scripts {
            println!("    {}", script.display());
        }
    }

    let excluded = engine.excluded_imports();
    if !excluded.is_empty() {
        println!();
        println!("excluded imports:");
        for (name, excluders) in excluded.iter() {
            let by: Vec<&str> = excluders.iter().map(String::as_str).collect();
            println!("    {} (by {})", name, by.join(", "));
        }
    }

    Ok(())
}
