//! Loads the template environment and the hosting token.

use anyhow::{Result, bail};
use herald_auth::{ResolveOptions, Resolution, forced_provider, resolve};

use crate::context::{ReleaseContext, Skip};
use crate::reporter::Reporter;

pub fn run(ctx: &mut ReleaseContext, reporter: &mut dyn Reporter) -> Result<()> {
    let mut tmpl = ctx.template();
    for entry in &ctx.config.env {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("invalid env entry {entry:?}: expected KEY=value");
        };
        let value = tmpl.apply(value)?;
        tmpl.env.insert(key.to_string(), value);
    }
    ctx.env = tmpl.env.clone();

    let skip = ctx.skip_token_check
        || ctx.snapshot
        || ctx.skips(Skip::Publish)
        || tmpl.eval_bool(&ctx.config.release.disable)?;

    let options = ResolveOptions {
        files: ctx.config.env_files.to_token_files(),
        force: forced_provider(ctx.config.force_token),
        skip,
    };
    match resolve(&options)? {
        Resolution::Active(credentials) => {
            reporter.info(&format!(
                "using {} token from {}",
                credentials.provider, credentials.source
            ));
            ctx.credentials = Some(credentials);
        }
        Resolution::Skipped => reporter.info("token check skipped"),
    }
    Ok(())
}
