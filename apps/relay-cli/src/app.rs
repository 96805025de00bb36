//! Application wiring: gateway fetcher, Telegram uploader and the relay
//! orchestrator, plus terminal output.

use std::sync::Arc;

use linkrelay_relay::{JobFailure, JobReport, RelayEvent, RelayOrchestrator};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::gateway::GatewayFetcher;
use crate::telegram::TelegramUploader;

/// Relays every message in order. Returns `true` if all jobs completed.
pub async fn run(config: Config, messages: Vec<String>, json: bool) -> anyhow::Result<bool> {
    config.require_credentials()?;

    let fetcher = Arc::new(GatewayFetcher::new(&config.gateway.url)?);
    let uploader = Arc::new(TelegramUploader::new(
        &config.telegram.api_base,
        &config.telegram.bot_token,
        &config.telegram.chat_id,
    )?);

    let mut orch = RelayOrchestrator::new(
        fetcher,
        uploader,
        config.staging_root(),
        config.relay_settings(),
    );
    let printer = orch
        .take_events()
        .map(|rx| tokio::spawn(print_events(rx, json)));

    let cancel = orch.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, cancelling");
            cancel.cancel();
        }
    });

    let mut failed = 0usize;
    for message in &messages {
        match orch.relay(message).await {
            Ok(report) => println!("{}", render_report(&report, json)),
            Err(failure) => {
                failed += 1;
                eprintln!("{}", render_failure(&failure, json));
            }
        }
        if orch.cancel_token().is_cancelled() {
            break;
        }
    }

    interrupt.abort();
    drop(orch);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    tracing::info!(jobs = messages.len(), failed, "done");
    Ok(failed == 0)
}

async fn print_events(mut rx: mpsc::Receiver<RelayEvent>, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to encode event"),
            }
        } else if let Some(line) = render_event(&event) {
            eprintln!("{line}");
        }
    }
}

fn short_id(job_id: &str) -> &str {
    job_id.get(..8).unwrap_or(job_id)
}

/// Human-readable progress line. Terminal events are rendered from the
/// job result instead.
fn render_event(event: &RelayEvent) -> Option<String> {
    match event {
        RelayEvent::StateChanged { job_id, state } => {
            Some(format!("[{}] {state}", short_id(job_id)))
        }
        RelayEvent::Progress { job_id, update } => {
            Some(format!("[{}] {}: {update}", short_id(job_id), update.label))
        }
        RelayEvent::ItemUploaded {
            job_id, caption, ..
        } => Some(format!("[{}] sent \"{caption}\"", short_id(job_id))),
        RelayEvent::Completed { .. } | RelayEvent::Failed { .. } => None,
    }
}

fn render_report(report: &JobReport, json: bool) -> String {
    if json {
        serde_json::json!({
            "result": "completed",
            "job_id": report.job_id,
            "link": report.link,
            "name": report.name,
            "bytes": report.bytes,
            "uploads": report.uploads,
            "fetch_ms": report.fetch_elapsed.as_millis() as u64,
            "elapsed_ms": report.elapsed.as_millis() as u64,
        })
        .to_string()
    } else {
        format!(
            "relayed {} ({} bytes) as {} upload(s) in {:.1}s",
            report.name,
            report.bytes,
            report.uploads,
            report.elapsed.as_secs_f64()
        )
    }
}

fn render_failure(failure: &JobFailure, json: bool) -> String {
    if json {
        serde_json::json!({
            "result": "failed",
            "job_id": failure.job_id,
            "stage": failure.stage,
            "error": failure.error.to_string(),
        })
        .to_string()
    } else {
        format!("error: {failure}")
    }
}
