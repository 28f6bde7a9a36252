use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use pzem_core::driver::{self, Pzem004t, DEFAULT_ADDRESS};
use pzem_core::{
    BrokerSession, Clock, ConnectionManager, MonotonicClock, Reading, SampleSource, Scheduler,
    SchedulerConfig, TransportLink,
};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod mqtt;
mod network;
mod simulate;
#[cfg(test)]
mod main_tests;
#[cfg(test)]
mod mqtt_tests;

use mqtt::{BrokerConfig, MqttSession};
use network::{HostLink, InterfaceLink, LinkConfig, StaticLink};
use simulate::{SimulatedMeter, Source};

#[derive(Debug, Parser)]
#[command(name = "pzemd")]
#[command(about = "PZEM-004T power meter sampler with windowed MQTT reports")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, default_value = "/dev/ttyUSB0")]
    serial_port: String,

    #[arg(long, value_parser = parse_address, default_value_t = DEFAULT_ADDRESS)]
    address: u8,

    #[arg(long, default_value_t = 500)]
    read_timeout_ms: u64,

    #[arg(long, default_value = "127.0.0.1")]
    broker_host: String,

    #[arg(long, default_value_t = 1883)]
    broker_port: u16,

    #[arg(long, default_value = pzem_core::config::CLIENT_ID)]
    client_id: String,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(long, default_value = "wlan0")]
    interface: String,

    #[arg(long)]
    no_link_check: bool,

    #[arg(long, default_value_t = 30_000)]
    associate_timeout_ms: u64,

    #[arg(long, default_value_t = 1000)]
    sample_interval_ms: u64,

    #[arg(long, default_value_t = 300_000)]
    publish_interval_ms: u64,

    #[arg(long, default_value_t = 5000)]
    reconnect_interval_ms: u64,

    #[arg(long, default_value = pzem_core::config::REPORT_TOPIC)]
    report_topic: String,

    #[arg(long, default_value = pzem_core::config::STATUS_TOPIC)]
    status_topic: String,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List USB-serial adapters that may host a meter.
    Scan,
    /// Read a single sample and print it.
    Once {
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// Sample, aggregate and publish until interrupted.
    Run {
        #[arg(long)]
        simulate: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

fn parse_address(raw: &str) -> Result<u8, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => raw.parse::<u8>(),
    };
    match parsed {
        Ok(address) if (0x01..=0xF7).contains(&address) => Ok(address),
        Ok(address) => Err(format!("address {address:#04X} outside 0x01..=0xF7")),
        Err(err) => Err(format!("invalid address {raw:?}: {err}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = SchedulerConfig {
        sample_interval: Duration::from_millis(cli.sample_interval_ms),
        publish_interval: Duration::from_millis(cli.publish_interval_ms),
        reconnect_interval: Duration::from_millis(cli.reconnect_interval_ms),
        report_topic: cli.report_topic.clone(),
        status_topic: cli.status_topic.clone(),
        client_id: cli.client_id.clone(),
        ..SchedulerConfig::default()
    };

    match cli.command {
        Command::Scan => {
            let adapters = driver::discover_adapters()?;
            println!("{}", serde_json::to_string_pretty(&adapters)?);
        }
        Command::Once { format } => {
            let mut meter = Pzem004t::new(
                cli.serial_port.clone(),
                cli.address,
                Duration::from_millis(cli.read_timeout_ms),
            );
            let reading = meter.read().await?;
            print_reading(&reading, format)?;
        }
        Command::Run { simulate } => {
            let source = if simulate {
                info!("using simulated meter");
                Source::Simulated(SimulatedMeter::new(cli.address))
            } else {
                let mut meter = Pzem004t::new(
                    cli.serial_port.clone(),
                    cli.address,
                    Duration::from_millis(cli.read_timeout_ms),
                );
                match meter.probe_address() {
                    Ok(address) => info!(address, path = %meter.path(), "meter found"),
                    Err(err) => warn!(
                        error = %err,
                        address = cli.address,
                        "could not read meter address, keeping configured one"
                    ),
                }
                Source::Meter(meter)
            };

            let link = if cli.no_link_check {
                HostLink::Static(StaticLink)
            } else {
                HostLink::Interface(InterfaceLink::new(LinkConfig {
                    interface: cli.interface.clone(),
                    associate_timeout: Duration::from_millis(cli.associate_timeout_ms),
                    ..LinkConfig::default()
                }))
            };

            let session = MqttSession::new(BrokerConfig {
                host: cli.broker_host.clone(),
                port: cli.broker_port,
                client_id: cli.client_id.clone(),
                username: cli.username.clone(),
                password: cli.password.clone(),
                ..BrokerConfig::default()
            });

            let links = ConnectionManager::new(
                link,
                session,
                config.client_id.clone(),
                config.status_topic.clone(),
                source.address(),
            );
            let mut scheduler = Scheduler::new(source, links, MonotonicClock::new(), config);
            run_loop(&mut scheduler).await?;
        }
    }

    Ok(())
}

async fn run_loop<S, T, B, C>(scheduler: &mut Scheduler<S, T, B, C>) -> Result<()>
where
    S: SampleSource,
    T: TransportLink,
    B: BrokerSession,
    C: Clock,
{
    scheduler.start().await;
    let pause = scheduler.config().loop_yield;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            _ = async {
                scheduler.iterate().await;
                sleep(pause).await;
            } => {}
        }
    }

    info!(
        counters = ?scheduler.counters(),
        links = ?scheduler.links().counters(),
        pending_samples = scheduler.window().sample_count(),
        "stopped"
    );
    Ok(())
}

fn print_reading(reading: &Reading, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(reading)?);
        }
        OutputFormat::Human => {
            println!("=== PZEM Reading ===");
            println!("Address:      {:#04X}", reading.address);
            println!("Voltage:      {:.1} V", reading.voltage);
            println!("Current:      {:.3} A", reading.current);
            println!("Power:        {:.1} W", reading.active_power);
            println!("Energy:       {:.0} Wh", reading.active_energy);
            println!("Frequency:    {:.1} Hz", reading.frequency);
            println!("Power factor: {:.2}", reading.power_factor);
        }
    }

    Ok(())
}
