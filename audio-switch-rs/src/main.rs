use anyhow::{Context, Result};
use audio_switch::{
    create_update_channel, default_backend, init_logging, AppConfig, AppContext, Command,
    Outcome,
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

fn main() -> Result<()> {
    init_logging();

    let config = AppConfig::resolve().context("resolving configuration")?;
    info!(save_dir = %config.save_dir().display(), "starting audio switch");

    let (sink, updates) = create_update_channel();
    let backend = default_backend().context("opening audio backend")?;
    let ctx = AppContext::new(config, backend, Arc::new(sink)).context("preparing save directory")?;

    thread::Builder::new()
        .name("state-updates".to_string())
        .spawn(move || {
            for update in updates {
                info!(
                    event = %update.event,
                    selected = %update.state.selected,
                    muted = update.state.muted,
                    devices = update.state.devices.len(),
                    "state update"
                );
            }
        })
        .context("spawning update logger")?;

    ctx.service().start().context("starting audio service")?;
    let result = command_loop(&ctx);

    if let Err(err) = ctx.service().stop() {
        warn!(%err, "audio service stop");
    }
    result
}

fn command_loop(ctx: &AppContext) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                writeln!(stdout, "error: {err}")?;
                continue;
            }
        };

        match ctx.execute(&command) {
            Ok(Outcome::State(state)) => {
                writeln!(stdout, "{}", serde_json::to_string_pretty(&state)?)?;
            }
            Ok(Outcome::Done) => writeln!(stdout, "ok")?,
            Ok(Outcome::Quit) => break,
            Err(err) => writeln!(stdout, "error: {err}")?,
        }
        stdout.flush()?;
    }
    Ok(())
}
