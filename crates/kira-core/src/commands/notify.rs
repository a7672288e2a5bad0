use std::io::Write;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::Session;
use crate::dispatch::plan_batch;
use crate::render::Renderer;

pub(super) fn cmd_notify(
    session: &mut Session,
    renderer: &Renderer,
    dry_run: bool,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    session.reload()?;
    let ctx = session.dispatch_context();

    if dry_run {
        let plan = {
            let mut dedup = session.state.gate().dedup();
            dedup.reload();
            plan_batch(session.state.tasks(), &dedup, &ctx)
        };
        return renderer.write_plan(&mut *out, &plan);
    }

    let report = session
        .state
        .gate()
        .run(session.state.tasks(), session.notifier(), &ctx);
    renderer.write_dispatch_report(&mut *out, &report)
}

/// Reload-then-dispatch loop. A failed reload skips that round; the
/// previous snapshot is not re-notified.
#[tracing::instrument(skip(session, renderer, out))]
pub(super) fn cmd_watch(
    session: &mut Session,
    renderer: &Renderer,
    interval: u64,
    iterations: Option<u32>,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let pause = Duration::from_secs(interval.max(1));
    let mut round = 0u32;

    loop {
        round += 1;
        match session.reload() {
            Ok(()) => {
                let ctx = session.dispatch_context();
                match session
                    .state
                    .gate()
                    .try_run(session.state.tasks(), session.notifier(), &ctx)
                {
                    Some(report) => renderer.write_dispatch_report(&mut *out, &report)?,
                    None => info!(round, "previous batch still running; skipping round"),
                }
            }
            Err(err) => {
                warn!(round, error = %format!("{err:#}"), "reload failed; skipping round");
            }
        }
        out.flush()?;

        if iterations.is_some_and(|limit| round >= limit) {
            info!(round, "watch finished");
            return Ok(());
        }
        thread::sleep(pause);
    }
}
