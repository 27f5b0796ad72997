use clap::Parser;
use ruuvi_trmnl::app::{self, App, Command, Options, RunError};
use ruuvi_trmnl::{BluetoothSource, TagCache, TrmnlSender, inspect, oneshot};
use std::io;
use std::panic::{self, PanicHookInfo};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_logger(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                log::error!("Cannot listen for SIGINT: {e}");
            }
        }
        () = terminate => {}
    }
    log::info!("Received shutdown signal");
}

/// Forward SIGUSR1 to a force-send channel.
fn force_trigger() -> io::Result<mpsc::Receiver<()>> {
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            match tx.try_send(()) {
                Ok(()) => {}
                Err(TrySendError::Full(())) => log::debug!("Forced send already pending"),
                Err(TrySendError::Closed(())) => break,
            }
        }
    });
    Ok(rx)
}

async fn run(options: Options) -> Result<(), RunError> {
    match options.command() {
        Command::Run { manual } => {
            let config = options.load_config(true)?;
            let cache = TagCache::load(&config.ruuvi.cache_file)?;
            let sender = TrmnlSender::new(&config.trmnl)?;
            log::info!("TRMNL webhook: {}", sender.masked_url());

            let app = App::new(config, cache, Box::new(sender));
            let force = force_trigger()?;
            app::run(app, &BluetoothSource, force, shutdown_signal(), manual).await?;
        }
        Command::SendOnce { timeout } => {
            let config = options.load_config(true)?;
            let cache = TagCache::load(&config.ruuvi.cache_file)?;
            let sender = TrmnlSender::new(&config.trmnl)?;
            let tags =
                oneshot::send_once(config, cache, &BluetoothSource, Box::new(sender), timeout)
                    .await?;
            log::info!("Sent {tags} tags to TRMNL");
        }
        Command::Inspect => {
            let config = options.load_config(false)?;
            let cache = TagCache::load(&config.ruuvi.cache_file)?;
            inspect::write_report(&config, &cache, &mut io::stdout().lock())?;
        }
        Command::Check => {
            let config = options.load_config(true)?;
            let sender = TrmnlSender::new(&config.trmnl)?;
            let outcome = sender.test_connection().await;
            if !outcome.is_success() {
                return Err(RunError::Send(outcome.to_string()));
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {info}");
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logger(options.verbose);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            log::error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
