// hub: chained publish/subscribe relay daemon entrypoint.

use clap::{Arg, ArgAction, Command};
use hub::config::{DiscoveryConfig, HubConfig};
use hub::hub::Hub;
use relay_wire::Endpoint;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

fn validate_endpoint(value: &str) -> Result<Endpoint, String> {
    let endpoint = Endpoint::parse(value).map_err(|e| e.to_string())?;
    if endpoint.port.is_none() {
        return Err("endpoint must carry a port, e.g. tcp://*:19780".to_owned());
    }
    Ok(endpoint)
}

fn validate_interface(value: &str) -> Result<Ipv4Addr, String> {
    value
        .parse::<Ipv4Addr>()
        .map_err(|_| "expected the IPv4 address of a local interface".to_owned())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "hub starting");

    let matches = Command::new("hub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Chained publish/subscribe relay hub")
        .arg(
            Arg::new("receiver-listen")
                .help("Request/reply bind endpoint for injectors. Eg. tcp://*:19780")
                .long("receiver-listen")
                .value_name("endpoint")
                .value_parser(validate_endpoint)
                .required(true),
        )
        .arg(
            Arg::new("publisher-listen")
                .help("Fan-out bind endpoint for subscribers. Eg. tcp://*:19790")
                .long("publisher-listen")
                .value_name("endpoint")
                .value_parser(validate_endpoint)
                .required(true),
        )
        .arg(
            Arg::new("chain-link")
                .help("Publisher endpoint of a peer hub to chain to (repeatable)")
                .long("chain-link")
                .value_name("endpoint")
                .value_parser(validate_endpoint)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("discovery")
                .help("Discover peer hubs over the local network")
                .long("discovery")
                .action(ArgAction::SetTrue)
                .conflicts_with("chain-link"),
        )
        .arg(
            Arg::new("discovery-interval")
                .help("Discovery announce interval in milliseconds")
                .long("discovery-interval")
                .value_name("ms")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("1000"),
        )
        .arg(
            Arg::new("discovery-interface")
                .help("IPv4 address of the interface to run discovery on")
                .long("discovery-interface")
                .value_name("address")
                .value_parser(validate_interface),
        )
        .arg(
            Arg::new("discovery-port")
                .help("UDP port of the discovery group")
                .long("discovery-port")
                .value_name("port")
                .value_parser(clap::value_parser!(u16))
                .default_value("5670"),
        )
        .arg(
            Arg::new("discovery-key")
                .help("Shared group key; hubs with different keys ignore each other")
                .long("discovery-key")
                .value_name("string")
                .default_value("TDRS"),
        )
        .get_matches();

    let discovery = if matches.get_flag("discovery") {
        Some(DiscoveryConfig {
            interval: Duration::from_millis(
                *matches
                    .get_one::<u64>("discovery-interval")
                    .expect("discovery-interval has a default"),
            ),
            interface: matches.get_one::<Ipv4Addr>("discovery-interface").copied(),
            port: *matches
                .get_one::<u16>("discovery-port")
                .expect("discovery-port has a default"),
            key: matches
                .get_one::<String>("discovery-key")
                .expect("discovery-key has a default")
                .clone(),
        })
    } else {
        None
    };

    let config = HubConfig {
        receiver_listen: matches
            .get_one::<Endpoint>("receiver-listen")
            .expect("receiver-listen is required")
            .clone(),
        publisher_listen: matches
            .get_one::<Endpoint>("publisher-listen")
            .expect("publisher-listen is required")
            .clone(),
        chain_links: matches
            .get_many::<Endpoint>("chain-link")
            .unwrap_or_default()
            .cloned()
            .collect(),
        discovery,
    };

    if let Err(e) = config.validate() {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    }

    let hub = match Hub::bind(config).await {
        Ok(hub) => hub,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("SIGINT received, shutting down"),
            Err(e) => error!(error = %e, "signal handler failed, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = hub.run(shutdown_rx).await {
        error!(error = %e, "hub failed");
        std::process::exit(1);
    }
}
