pub mod api;
pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod flatten;
pub mod overdue;
pub mod reminder;
pub mod render;
pub mod state;
pub mod store;
pub mod task;
pub mod views;

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info,
  warn
};

use crate::api::{
  FileTaskSource,
  HttpTaskApi,
  TaskSource
};
use crate::store::{
  BlobStore,
  FileStore,
  MemoryStore
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
    "starting kira CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.kirarc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let zone = datetime::Zone::resolve(
    cfg.timezone().as_deref()
  );
  debug!(zone = %zone.label(), "resolved timezone");

  let store = open_store(
    &cfg,
    cli.data.as_deref()
  );

  let api = HttpTaskApi::new(
    &cfg.api_base()
  )
  .context(
    "failed to set up the task API \
     client"
  )?;
  let source: Box<dyn TaskSource> =
    match cli.tasks.as_deref() {
      | Some(path) => Box::new(
        FileTaskSource::new(path)
      ),
      | None => Box::new(api.clone())
    };

  let renderer =
    render::Renderer::new(&cfg);
  let mut session = commands::Session::new(
    cfg,
    zone,
    cli.today,
    store,
    source,
    Box::new(api)
  );
  if let Some(id) = cli.user {
    session.state.switch_user(Some(
      task::UserRef {
        id,
        name: None,
        email: None
      }
    ));
  }

  let stdout = io::stdout();
  let mut out = stdout.lock();
  commands::dispatch(
    &mut session,
    &renderer,
    cli.command,
    &mut out
  )?;

  info!("done");
  Ok(())
}

/// The data directory backs reminder
/// settings and the sent registry. When it
/// cannot be used the session runs on an
/// in-memory store instead.
fn open_store(
  cfg: &config::Config,
  data_override: Option<&std::path::Path>
) -> Arc<dyn BlobStore> {
  let opened =
    config::resolve_data_dir(
      cfg,
      data_override
    )
    .and_then(|dir| FileStore::open(&dir));

  match opened {
    | Ok(store) => Arc::new(store),
    | Err(err) => {
      warn!(
        error = %format!("{err:#}"),
        "data directory unavailable; \
         settings and notification \
         tracking will not persist"
      );
      Arc::new(MemoryStore::new())
    }
  }
}
