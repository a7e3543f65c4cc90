use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use rgrab::{
    cli::Cli,
    config::Config,
    display::{DisplayManager, ScanSummary},
    grabber::Grabber,
    target::{GrabTarget, TargetDecoder},
    utils,
};
use std::io::Write;
use std::process;
use std::time::SystemTime;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    // Status output would interleave with results written to stdout.
    let display = DisplayManager::with_quiet(cli.quiet || cli.output_file.is_none());

    if let Err(e) = run(&cli, &display).await {
        display.print_error(&format!("Scan failed: {:#}", e));
        process::exit(1);
    }
}

async fn run(cli: &Cli, display: &DisplayManager) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load_from_file(&path.to_string_lossy())
                .with_context(|| format!("loading configuration from {}", path.display()))?;
            display.print_success(&format!("Loaded configuration from {}", path.display()));
            config
        }
        None => Config::default(),
    };
    cli.apply(&mut config).context("applying command-line options")?;
    config.grab.load_root_ca_pool().context("loading root CA file")?;

    let senders = config.scan.senders.max(1);
    let grabber = Grabber::new(config.grab.clone()).context("invalid grab configuration")?;

    display.print_banner("rgrab - banner grabber", Some("Authorized Testing Only"));
    display.print_info(&format!(
        "Port {} with {} senders, timeout {}s",
        config.grab.port, senders, config.grab.timeout
    ));

    let input = utils::io::open_input(config.scan.input_file.as_deref())?;
    let mut output = utils::io::open_output(config.scan.output_file.as_deref())?;

    let (tx, mut rx) = mpsc::channel::<GrabTarget>(senders * 2);
    let producer = tokio::task::spawn_blocking(move || {
        let mut decoder = TargetDecoder::new(input);
        let mut skipped = 0usize;
        while let Some(next) = decoder.decode_next() {
            match next {
                Ok(target) => {
                    if tx.blocking_send(target).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Skipping target on line {}: {}", decoder.line(), e);
                    skipped += 1;
                }
            }
        }
        skipped
    });

    let start_time = SystemTime::now();
    let grabber = &grabber;
    let targets = stream::poll_fn(move |cx| rx.poll_recv(cx));
    let mut grabs = targets
        .map(move |target| async move { grabber.grab(&target).await })
        .buffer_unordered(senders);

    let mut summary = ScanSummary::default();
    while let Some(grab) = grabs.next().await {
        utils::io::write_json_line(&mut output, &grab).context("writing result")?;
        if cli.verbose > 0 {
            display.print_grab(&grab);
        }
        summary.record(&grab);
    }
    output.flush().context("flushing results")?;

    summary.invalid_targets = producer.await.context("target reader panicked")?;
    let elapsed = utils::time::elapsed_since(start_time);
    info!(
        "Finished {} grabs ({} complete) in {}",
        summary.total,
        summary.completed,
        utils::time::format_duration(elapsed)
    );
    display.print_scan_summary(&summary, &utils::time::format_duration(elapsed));
    Ok(())
}
