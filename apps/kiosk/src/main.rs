mod config;
mod terminal;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use kiosk_core::{
    ApiBase, CheckinController, DoctorRegistry, HttpKioskBackend, KioskEvent,
};
use tracing::{info, warn};
use url::Url;

use crate::{
    config::load_settings,
    terminal::{stdin_input, TerminalPaymentUi},
};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "kiosk.toml")]
    config: PathBuf,
    /// Overrides `api_base` from the config file and environment.
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    hosting_origin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if args.api_base.is_some() {
        settings.api_base = args.api_base;
    }
    if let Some(origin) = args.hosting_origin {
        settings.hosting_origin = origin;
    }

    let hosting_origin = Url::parse(&settings.hosting_origin)
        .with_context(|| format!("invalid hosting origin '{}'", settings.hosting_origin))?;
    let base = ApiBase::resolve(
        settings.api_base.as_deref(),
        &hosting_origin,
        &settings.static_host_suffixes,
    );
    info!(
        api_base = %base.origin(),
        same_origin = base.is_same_origin(),
        "collaborator endpoints resolved"
    );

    let backend = HttpKioskBackend::with_timeout(base, settings.request_timeout())
        .context("failed to build http client")?;
    let registry = match settings.doctors.clone() {
        Some(doctors) => DoctorRegistry::new(doctors).context("invalid doctor list")?,
        None => DoctorRegistry::default(),
    };

    let input = stdin_input();
    let controller = CheckinController::new(
        Arc::new(backend),
        Arc::new(TerminalPaymentUi::new(input.clone())),
        registry,
        settings.flow_options(),
    );

    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(KioskEvent::StepChanged { session_id, step }) => {
                    info!(session = %session_id, %step, "screen changed")
                }
                Ok(KioskEvent::SessionReset { session_id }) => {
                    info!(session = %session_id, "ready for next patient")
                }
                Ok(KioskEvent::Notice(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    terminal::run(&controller, &input).await
}
