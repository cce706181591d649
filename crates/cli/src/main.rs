//! Submit-and-watch command line for the darkroom controller.
//!
//! `darkroom <file>` uploads an image and streams progress until the job
//! finishes. `darkroom --resume` reattaches to whatever this identity
//! had in flight.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use darkroom_client::{ClientConfig, JobEventClient, ResumeOutcome};
use darkroom_core::job::OutputLocator;
use darkroom_core::job_events::{EventKind, JobEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "darkroom=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let arg = std::env::args().nth(1);
    let config = ClientConfig::from_env();
    let client = JobEventClient::connect(config)?;

    match arg.as_deref() {
        Some("--resume") => {
            match client.resume().await {
                ResumeOutcome::Idle => {
                    println!("nothing in flight for this identity");
                }
                ResumeOutcome::Completed { job_id, output_url } => {
                    println!("latest job {job_id} already completed");
                    match output_url {
                        Some(url) => println!("output: {url}"),
                        None => println!("output unavailable (could not resolve a download URL)"),
                    }
                }
                ResumeOutcome::Reattached { job_id } => {
                    println!("reattached to in-flight job {job_id}");
                    watch_job(&client, &job_id).await;
                }
            }
        }
        Some(path) => {
            let payload = std::fs::read(path)?;
            let filename = path.rsplit('/').next().unwrap_or("upload.jpg");

            let progress: darkroom_client::ProgressFn =
                Arc::new(|percent| tracing::info!(percent, "uploading"));
            let state = client
                .create_job(payload, filename, "image/jpeg", Some(progress))
                .await?;

            println!("job {} created ({:?})", state.job_id, state.status);
            watch_job(&client, &state.job_id).await;
        }
        None => {
            eprintln!("usage: darkroom <image-file> | darkroom --resume");
            std::process::exit(2);
        }
    }

    client.shutdown().await;
    Ok(())
}

/// Print events for a job until it reaches a terminal status (or the
/// stream gives up).
async fn watch_job(client: &Arc<JobEventClient>, job_id: &str) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<JobEvent>();
    let guard = client.on(
        job_id,
        Arc::new(move |event: &JobEvent| {
            let _ = tx.send(event.clone());
        }),
    );

    if let Some(eta) = client.eta(job_id).await {
        let eta = *eta.borrow();
        tracing::info!(eta_secs = eta.seconds, source = ?eta.source, "initial wait estimate");
    }

    // A subscription that went quiet past the idle ceiling has been
    // closed by the client; stop waiting shortly after that point.
    let watch_limit = client.config().idle_ceiling + std::time::Duration::from_secs(30);

    while let Ok(Some(event)) = tokio::time::timeout(watch_limit, rx.recv()).await {
        match event.kind {
            EventKind::Info | EventKind::State => {
                let message = event.message.as_deref().unwrap_or("update");
                match (event.progress, event.data.queue_position) {
                    (Some(p), Some(q)) => println!("[{p:>3}%] {message} (queue position {q})"),
                    (Some(p), None) => println!("[{p:>3}%] {message}"),
                    _ => println!("       {message}"),
                }
            }
            EventKind::Completed => {
                println!("job completed");
                break;
            }
            EventKind::Error => {
                println!(
                    "job failed: {}",
                    event.message.as_deref().unwrap_or("unknown error")
                );
                break;
            }
        }
    }
    guard.unsubscribe();

    if let Some(state) = client.state(job_id) {
        if let Some(OutputLocator::Url(url)) = state.output {
            println!("output: {url}");
        }
    }
}
