//! Service Broadcast demo - drives the broadcast layer against the in-memory registry.
//!
//! Registers the scenario's implementations, starts a broadcast for the
//! configured service, announces late loads through the notification
//! router and prints what each broadcast visits.

mod scenario;

use anyhow::Result;
use clap::Parser;
use scenario::Scenario;
use service_broadcast::{InMemoryRegistry, ServiceBroadcast, ServiceRegistry};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "service-broadcast")]
#[command(about = "Broadcast over cached service implementations")]
struct Args {
    /// Scenario JSON file (defaults to a built-in audit_log scenario)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Print every handle the broadcast visits; nobody accepts, so all are visited.
fn print_broadcast(broadcast: &ServiceBroadcast, label: &str) {
    println!("{}:", label);
    let handled = broadcast.broadcast(|handle| {
        println!("  {}", handle.name());
        false
    });
    println!("  handled: {}", handled);
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let scenario = match &args.config {
        Some(path) => Scenario::from_file(path)?,
        None => Scenario::builtin(),
    };
    info!(
        "Running scenario for {} as {}",
        scenario.broadcast.service_name, scenario.broadcast.component_name
    );

    let (registry, providers) = InMemoryRegistry::shared();
    for entry in &scenario.implementations {
        registry.register(&entry.service, &entry.implementation, entry.event_name())?;
    }

    let broadcast = ServiceBroadcast::new(providers);
    broadcast.startup_with(&scenario.broadcast)?;
    let default = registry.acquire(&scenario.broadcast.service_name)?;
    info!(
        "Default implementation of {} is {}",
        scenario.broadcast.service_name,
        default.name()
    );
    print_broadcast(&broadcast, "Initial broadcast");

    if !scenario.load_after_start.is_empty() {
        let events: Vec<String> = scenario
            .load_after_start
            .iter()
            .map(|entry| -> Result<String> {
                registry.register(&entry.service, &entry.implementation, entry.event_name())?;
                Ok(entry.event_name())
            })
            .collect::<Result<_>>()?;

        let outcome = broadcast.router().notify_after_load(events.as_slice())?;
        info!("Load notification for {:?}: {:?}", events, outcome);
        print_broadcast(&broadcast, "After load notification");
    }

    broadcast.shutdown()?;
    info!("Shutdown complete");
    Ok(())
}
