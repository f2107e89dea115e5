//! Process entry point for the brigade fleet.
//!
//! One binary, four roles:
//!
//! - `relay`: the TCP broadcast hub the multi-process fleet meets on
//! - `truck`: one autonomous firefighting agent
//! - `observer`: the passive terminal view
//! - `simulate`: a whole fleet plus an observer in one process, over the
//!   in-process bus

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use brigade_agent::{Observer, ObserverConfig, Truck, TruckConfig};
use brigade_core::{AgentId, LamportClock};
use brigade_net::{Bus, BusRelay, MemoryHub, TcpBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Autonomous firefighting truck.
    Truck,
    /// Passive terminal observer.
    Observer,
    /// TCP bus relay for the fleet.
    Relay,
    /// In-process fleet demo.
    Simulate,
}

#[derive(Debug, Parser)]
#[command(name = "brigade-node", about = "Decentralized firefighting fleet node")]
struct Cli {
    /// Unique node identifier.
    #[arg(long, default_value = "T1")]
    id: String,

    /// Bus endpoint: the relay address to connect to (or bind, for the
    /// relay role).
    #[arg(long, default_value = "127.0.0.1:4500")]
    bus: String,

    /// What this process does.
    #[arg(long, value_enum, default_value_t = Role::Truck)]
    role: Role,

    /// Fleet size for the simulate role.
    #[arg(long, default_value_t = 4)]
    trucks: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.role {
        Role::Relay => run_relay(&cli.bus).await,
        Role::Truck => run_truck(cli.id, &cli.bus).await,
        Role::Observer => run_observer(cli.id, &cli.bus).await,
        Role::Simulate => run_simulation(cli.trucks).await,
    }
}

async fn run_relay(addr: &str) -> anyhow::Result<()> {
    let relay = BusRelay::bind(addr)
        .await
        .context("failed to bind the bus relay")?;
    relay.run().await.context("relay stopped")?;
    Ok(())
}

async fn run_truck(id: String, addr: &str) -> anyhow::Result<()> {
    let id = AgentId::new(id)?;
    let clock = Arc::new(LamportClock::new());

    // Inability to reach the bus at startup is the one fatal error.
    let bus: Arc<dyn Bus> = TcpBus::connect(id.clone(), addr, Arc::clone(&clock))
        .await
        .context("failed to connect to the bus relay")?;

    let truck = Truck::new(id, TruckConfig::default(), clock, bus);
    truck.clone().start()?;
    truck.spawn_ignition();

    wait_for_shutdown().await
}

async fn run_observer(id: String, addr: &str) -> anyhow::Result<()> {
    let id = AgentId::new(id)?;
    let clock = Arc::new(LamportClock::new());
    let bus: Arc<dyn Bus> = TcpBus::connect(id.clone(), addr, clock)
        .await
        .context("failed to connect to the bus relay")?;

    let observer = Observer::new(id, ObserverConfig::default(), bus);
    observer.start()?;

    wait_for_shutdown().await
}

async fn run_simulation(fleet_size: usize) -> anyhow::Result<()> {
    let hub = MemoryHub::new();
    let mut trucks = Vec::with_capacity(fleet_size);

    for index in 1..=fleet_size {
        let id = AgentId::new(format!("T{index}"))?;
        let clock = Arc::new(LamportClock::new());
        let bus: Arc<dyn Bus> = Arc::new(hub.attach(id.clone(), Arc::clone(&clock)));

        let truck = Truck::new(id, TruckConfig::default(), clock, bus);
        truck.clone().start()?;
        truck.clone().spawn_ignition();
        trucks.push(truck);
    }

    let observer_id = AgentId::new("OBS")?;
    let observer_bus: Arc<dyn Bus> =
        Arc::new(hub.attach(observer_id.clone(), Arc::new(LamportClock::new())));
    let observer = Observer::new(observer_id, ObserverConfig::default(), observer_bus);
    observer.start()?;

    info!(fleet = trucks.len(), "simulation running, ctrl-c to stop");
    wait_for_shutdown().await
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    Ok(())
}
