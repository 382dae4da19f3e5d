use color_eyre::Report;
use std::sync::Arc;
use tokio::signal;
use tokio::spawn;
use tokio::sync::broadcast;
use tracing::{error, info};

mod manager;

/// Resolves on SIGINT or SIGTERM, with the name of the signal
#[cfg(unix)]
async fn stop_signal() -> Result<&'static str, Report> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => {
            res?;
            Ok("SIGINT")
        }
        _ = term.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn stop_signal() -> Result<&'static str, Report> {
    signal::ctrl_c().await?;
    Ok("ctrl-c")
}

#[tokio::main]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // get config
    let args = argh::from_env::<innlevering::config::Args>();

    // setup logging
    args.setup_logging()?;

    // fail early on a broken file, later reloads are checked every cycle
    let config = args.get_config()?;

    // the loop only looks at this between cycles. `stop_tx` stays alive here,
    // a closed channel would read as a stop request
    let (stop_tx, stop_rx) = broadcast::channel(1);
    let signal_tx = stop_tx.clone();
    spawn(async move {
        match stop_signal().await {
            Ok(name) => {
                info!("Got {name}, finishing the current cycle");
                let _ = signal_tx.send(());
            }
            Err(e) => error!("Could not listen for signals: {e:?}"),
        }
    });

    manager::main(Arc::new(args.config_source()), config, stop_rx).await?;

    drop(stop_tx);
    info!("Bye");

    Ok(())
}
