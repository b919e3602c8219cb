pub mod backoff;
pub mod channels;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod meter;
pub mod modbus;
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod shutdown;
pub mod sunspec;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::options::Options;
use crate::prelude::*;
use std::time::Duration;

pub async fn app() -> Result<()> {
    let options = Options::new();

    let config = Config::new(&options.config_file).unwrap_or_else(|err| {
        // no logging available yet, so eprintln! will have to do
        eprintln!("Error: {:?}", err);
        std::process::exit(255);
    });

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.loglevel()))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();

    info!(
        "Starting obis-bridge {} with config '{}'",
        CARGO_PKG_VERSION, options.config_file
    );
    config.log_summary();

    let shutdown = Shutdown::new();
    shutdown.install_signal_handlers()?;

    if let Some(runtime) = options.runtime {
        info!("Runtime of {} seconds specified, will terminate automatically", runtime);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(runtime)).await;
            info!("Runtime duration reached, initiating shutdown");
            shutdown.shutdown();
        });
    }

    let channels = Channels::new();

    let slave = match &config.modbus {
        Some(modbus_config) => Some(ModbusSlave::new(modbus_config.clone(), shutdown.clone())),
        None => {
            info!("Modbus slave disabled (no modbus section in config)");
            None
        }
    };

    let mqtt = Mqtt::new(config.mqtt.clone(), channels.clone(), shutdown.clone());
    let meter = Meter::new(config.meter.clone(), channels.clone(), shutdown.clone());
    let coordinator = Coordinator::new(
        config.clone(),
        channels.clone(),
        slave.clone(),
        shutdown.clone(),
    );

    let mut tasks = Vec::new();

    if let Some(slave) = slave {
        tasks.push(tokio::spawn(async move {
            if let Err(err) = slave.start().await {
                error!("modbus error: {}", err);
            }
        }));
    }
    tasks.push(tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            if let Err(err) = coordinator.start().await {
                error!("coordinator error: {}", err);
            }
        }
    }));
    tasks.push(tokio::spawn({
        let mqtt = mqtt.clone();
        async move {
            if let Err(err) = mqtt.start().await {
                error!("mqtt error: {}", err);
            }
        }
    }));
    tasks.push(tokio::spawn({
        let meter = meter.clone();
        async move {
            if let Err(err) = meter.start().await {
                error!("meter error: {}", err);
            }
        }
    }));

    // Block until a signal or a component triggers the shutdown.
    shutdown.wait().await;
    info!("Shutting down ({})", shutdown.signal_name());

    let _ = channels.from_meter.send(meter::ChannelData::Shutdown);
    let _ = channels.to_mqtt.send(mqtt::ChannelData::Shutdown);

    for task in tasks {
        let abort = task.abort_handle();
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            warn!("a component did not stop in time, aborting it");
            abort.abort();
        }
    }

    info!("Shutdown complete");
    Ok(())
}
