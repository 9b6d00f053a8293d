pub mod cli;
pub mod commands;
pub mod config;
pub mod confirm;
pub mod datetime;
pub mod filter;
pub mod render;
pub mod storage;
pub mod store;
pub mod task;
pub mod theme;

use std::ffi::OsString;
use std::io;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::confirm::{
  AssumeYes,
  Confirm,
  StdinConfirm
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting smarttask CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.smarttaskrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let kv = storage::FileKv::open(
    &data_dir
  )
  .with_context(|| {
    format!(
      "failed to open storage at {}",
      data_dir.display()
    )
  })?;
  let mut store =
    store::TaskStore::load(kv);

  let theme =
    theme::load_theme(store.storage());
  let mut renderer =
    render::Renderer::new(&cfg, theme)?;

  let skip_confirm = cli.yes
    || !cfg
      .get_bool("confirmation")
      .unwrap_or(true);
  let mut confirm: Box<dyn Confirm> =
    if skip_confirm {
      Box::new(AssumeYes)
    } else {
      Box::new(StdinConfirm)
    };

  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let mut env = commands::CommandEnv {
    cfg:      &cfg,
    renderer: &mut renderer,
    confirm:  confirm.as_mut(),
    out:      io::stdout().lock(),
    now:      Utc::now()
  };
  commands::dispatch(
    &mut store, &mut env, inv
  )?;

  info!("done");
  Ok(())
}
