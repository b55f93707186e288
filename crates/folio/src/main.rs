use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use folio::sanitize::short_hash;
use folio::{load_config, telemetry, Config, DocumentProcessor, DocumentStatus, Folio, UploadRequest};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(3600);

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("usage: folio <config.json> <file.pdf>...");
        return ExitCode::from(2);
    }

    let config = match load_config(&args[0]) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = telemetry::init_tracing(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let files: Vec<PathBuf> = args[1..].iter().map(PathBuf::from).collect();
    match run(&config, &files) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Folio failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every file ended up `completed`.
fn run(config: &Config, files: &[PathBuf]) -> folio::Result<bool> {
    let service = Arc::new(Folio::open(config)?);

    let for_signal = service.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let cancelled = for_signal.cancel_all();
        warn!(cancelled, "Interrupted, cancelling running documents");
    }) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let mut events = service.orchestrator().progress().subscribe();
    thread::spawn(move || loop {
        match events.blocking_recv() {
            Ok(event) => {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
            }
            Err(RecvError::Lagged(missed)) => warn!(missed, "Progress output fell behind"),
            Err(RecvError::Closed) => break,
        }
    });

    let orchestrator = service.orchestrator();
    let mut hashes = Vec::new();
    let mut all_completed = true;
    for path in files {
        let result = orchestrator
            .upload(&UploadRequest::new(path))
            .and_then(|document| orchestrator.process(&document.hash));
        match result {
            Ok(document) => hashes.push(document.hash),
            Err(e) => {
                error!(file = %path.display(), error = %e, "Could not process file");
                all_completed = false;
            }
        }
    }

    for hash in &hashes {
        let document = service.wait_for_settled(hash, SETTLE_TIMEOUT)?;
        info!(
            document = %short_hash(hash),
            status = %document.status,
            pages = document.page_count.unwrap_or(0),
            "Document settled"
        );
        let status = orchestrator.get_processing_status(hash)?;
        if let Ok(line) = serde_json::to_string(&status) {
            println!("{}", line);
        }
        all_completed &= document.status == DocumentStatus::Completed;
    }

    service.shutdown();
    Ok(all_completed)
}
