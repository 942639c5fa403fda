//! Main CLI for fling
// (c) 2025 Ross Younger

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use super::args::{CliArgs, Command};
use crate::{
    client::Controller,
    events::{Event, EventSender},
    policy::ExtensionSet,
    server::{Listener, ListenerConfig},
    util::{setup_tracing, trace_level, ConsoleTraceType},
};

use anyhow::Context as _;
use clap::Parser as _;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

/// How long to wait for the server's policy announcement before sending anyway
const POLICY_WAIT: Duration = Duration::from_secs(10);

/// Main CLI entrypoint
///
/// Call this from `main`. It reads argv.
/// # Return
/// true indicates success. false indicates a failure we have logged. An Error is a failure we have not output or logged.
#[tokio::main]
pub async fn cli() -> anyhow::Result<bool> {
    let args = CliArgs::parse();
    setup_tracing(
        trace_level(args.debug, args.quiet),
        &ConsoleTraceType::Standard,
        args.log_file.as_ref(),
        args.timestamps,
        true,
    )?; // to provoke error: set RUST_LOG=.

    match args.command {
        Command::Serve {
            bind,
            port,
            allow,
            dest_dir,
        } => serve_main(bind, port, allow, dest_dir).await,
        Command::Send {
            host,
            port,
            messages,
            files,
        } => send_main(&host, port, &messages, &files).await,
    }
}

/// Renders a core event as console output
fn render_event(event: &Event) {
    match event {
        Event::Log(text) => info!("{text}"),
        Event::ConnectionState(state) => debug!("connection state: {state}"),
        Event::PolicyReceived(set) => debug!("policy cached: {set}"),
        Event::InboundText(text) => info!("message received: {text}"),
        Event::FileStored(filename) => info!("received file {filename}"),
        Event::SendRejected(extension) => warn!("transfer rejected: file type .{extension}"),
    }
}

// MODE HANDLERS ///////////////////////////////////////////////////////////

async fn serve_main(
    bind: IpAddr,
    port: u16,
    allow: ExtensionSet,
    dest_dir: PathBuf,
) -> anyhow::Result<bool> {
    let config = ListenerConfig {
        addr: SocketAddr::new(bind, port),
        allowed: allow,
        dest_dir,
    };
    let (events, mut rx) = EventSender::channel();
    let listener = Listener::bind(config, events).await?;
    info!("listening on {}", listener.local_addr());

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("could not listen for interrupt signal")?;
                info!("interrupt received, shutting down");
                break;
            },
            event = rx.recv() => match event {
                Some(event) => render_event(&event),
                None => break,
            },
        }
    }
    listener.stop().await;
    Ok(true)
}

async fn send_main(
    host: &str,
    port: u16,
    messages: &[String],
    files: &[PathBuf],
) -> anyhow::Result<bool> {
    if messages.is_empty() && files.is_empty() {
        anyhow::bail!("nothing to send: specify --message and/or files");
    }
    let addr = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("could not resolve {host}"))?
        .next()
        .with_context(|| format!("no addresses found for {host}"))?;

    let (events, mut rx) = EventSender::channel();
    let mut controller = Controller::new(events);
    controller.connect(addr).await?;
    wait_for_policy(&mut rx).await;

    let mut success = true;
    for message in messages {
        if let Err(e) = controller.send_text(message).await {
            error!("could not send message: {e}");
            success = false;
        }
    }
    for file in files {
        if let Err(e) = controller.send_file(file).await {
            error!("could not send {}: {e}", file.display());
            success = false;
        }
    }
    controller.disconnect().await;
    while let Ok(event) = rx.try_recv() {
        render_event(&event);
    }
    Ok(success)
}

/// Drains events until the server's allow-set arrives, so file sends can
/// be checked locally. If the announcement doesn't show up we proceed
/// anyway; the server enforces its policy regardless.
async fn wait_for_policy(rx: &mut UnboundedReceiver<Event>) {
    let wait = async {
        while let Some(event) = rx.recv().await {
            let got_policy = matches!(event, Event::PolicyReceived(_));
            render_event(&event);
            if got_policy {
                return;
            }
        }
    };
    if tokio::time::timeout(POLICY_WAIT, wait).await.is_err() {
        warn!("server did not announce its file type policy; sending anyway");
    }
}
