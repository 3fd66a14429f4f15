use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use contract_state_engine::config::Config;
use contract_state_engine::engine::{
    Action, DeploymentDescriptor, Dispatch, EventSource, FilterParams, FilterWindow,
    StateEngine, Store,
};
use contract_state_engine::ethereum::{
    abi::{self, AbiResolver, AbiSource},
    provider::AlloyNode,
    signer::LocalKeySigner,
    utils,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

fn cli() -> Command {
    Command::new("contract-state-engine")
        .version("0.1.0")
        .about("Synchronize a local state tree with a deployed smart contract")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .value_name("NETWORK")
                .help("Network to use (local, ethereum, sepolia)"),
        )
        .arg(
            Arg::new("rpc-url")
                .short('r')
                .long("rpc-url")
                .value_name("URL")
                .help("RPC endpoint URL"),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_name("ADDRESS")
                .help("Contract address"),
        )
        .arg(
            Arg::new("abi")
                .long("abi")
                .value_name("FILE")
                .help("Interface description file; fetched from the explorer when omitted"),
        )
        .arg(
            Arg::new("deployment")
                .long("deployment")
                .value_name("FILE")
                .help("Deployment descriptor with interfaceJson and transactionReceipt"),
        )
        .arg(
            Arg::new("allow-writes")
                .long("allow-writes")
                .help("Allow write operations (transactions)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .subcommand(Command::new("state").about("Initialize and print the contract state"))
        .subcommand(
            Command::new("call")
                .about("Call a read-only member")
                .arg(Arg::new("method").required(true))
                .arg(Arg::new("params").num_args(0..).help("Parameters as JSON values")),
        )
        .subcommand(
            Command::new("send")
                .about("Send a state-changing transaction and follow it to finalization")
                .arg(Arg::new("method").required(true))
                .arg(Arg::new("params").num_args(0..).help("Parameters as JSON values"))
                .arg(
                    Arg::new("value")
                        .long("value")
                        .value_name("WEI")
                        .help("Value to attach, in wei"),
                ),
        )
        .subcommand(
            Command::new("events")
                .about("Fetch a window of past events into the state")
                .arg(event_arg())
                .arg(
                    Arg::new("from-block")
                        .long("from-block")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("to-block")
                        .long("to-block")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("filter")
                        .long("filter")
                        .value_name("JSON")
                        .help("Indexed parameter values, e.g. {\"to\": \"0x...\"}"),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Initialize the state, then follow live events until interrupted")
                .arg(event_arg()),
        )
}

fn event_arg() -> Arg {
    Arg::new("event")
        .short('e')
        .long("event")
        .value_name("NAME")
        .help("Only this event")
}

/// JSON when it parses, otherwise the raw string.
fn parse_params(matches: &ArgMatches) -> Vec<Value> {
    matches
        .get_many::<String>("params")
        .map(|values| {
            values
                .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
                .collect()
        })
        .unwrap_or_default()
}

fn event_source(matches: &ArgMatches) -> EventSource {
    EventSource::from_name(matches.get_one::<String>("event").map(|s| s.as_str()))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn bind(engine: &StateEngine, config: &Config, network: &str) -> Result<()> {
    if let Some(path) = &config.engine.deployment_path {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read deployment descriptor {}: {}", path, e))?;
        let descriptor: DeploymentDescriptor = serde_json::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse deployment descriptor {}: {}", path, e))?;
        engine.initialize_from_deployment(descriptor).await?;
        return Ok(());
    }

    let address = config
        .engine
        .address
        .as_deref()
        .ok_or_else(|| anyhow!("No contract address given (use --address or --deployment)"))?;

    let interface = match &config.engine.abi_path {
        Some(path) => abi::load_interface_file(path).await?,
        None => {
            let mut resolver = AbiResolver::new(AbiSource::default());
            resolver.get_abi(address, network).await.map_err(|e| {
                anyhow!("{}", utils::interpret_abi_error(&e.to_string(), address))
            })?
        }
    };

    engine.bind(interface, address).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries JSON output only
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = cli().get_matches();

    if matches.get_flag("generate-config") {
        let sample_config = Config::generate_sample();
        println!("{}", sample_config);
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let mut config = Config::load_or_default(config_path).await;

    if let Some(network) = matches.get_one::<String>("network") {
        config.default_network = network.clone();
    }
    if let Some(rpc_url) = matches.get_one::<String>("rpc-url") {
        if let Some(network_config) = config.networks.get_mut(&config.default_network) {
            network_config.rpc_url = rpc_url.clone();
        }
    }
    if let Some(address) = matches.get_one::<String>("address") {
        config.engine.address = Some(address.clone());
    }
    if let Some(path) = matches.get_one::<String>("abi") {
        config.engine.abi_path = Some(path.clone());
    }
    if let Some(path) = matches.get_one::<String>("deployment") {
        config.engine.deployment_path = Some(path.clone());
    }
    if matches.get_flag("allow-writes") {
        config.security.allow_write_operations = true;
    }

    let network = config.default_network.clone();
    let settings = config.engine_settings(&network)?;
    let node = AlloyNode::from_network(config.network(&network)?)?;
    let head = node.validate_connection(&network).await?;
    info!("Connected to {} at block {}", network, head);

    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
    let dispatch: Dispatch = Arc::new(move |action| {
        if tx.send(action).is_err() {
            warn!("Action dropped: store is gone");
        }
    });
    let engine = StateEngine::new(Arc::new(node), Arc::new(LocalKeySigner), settings, dispatch);
    bind(&engine, &config, &network).await?;

    let mut store = Store::new();
    match matches.subcommand() {
        Some(("call", sub)) => {
            let method = sub
                .get_one::<String>("method")
                .ok_or_else(|| anyhow!("method is required"))?;
            let value = engine.call(method, parse_params(sub)).await?;
            print_json(&value)?;
        }
        Some(("send", sub)) => {
            if !config.security.allow_write_operations {
                return Err(anyhow!(
                    "Write operations are disabled; set security.allow_write_operations or pass --allow-writes"
                ));
            }
            let method = sub
                .get_one::<String>("method")
                .ok_or_else(|| anyhow!("method is required"))?;
            let value = sub
                .get_one::<String>("value")
                .map(|v| utils::parse_wei(v))
                .transpose()?;

            engine.send(method, parse_params(sub), value).await?;
            while let Ok(action) = rx.try_recv() {
                print_json(&action.to_json())?;
                store.apply(&action);
            }
            print_json(&store.state().to_json())?;
        }
        Some(("events", sub)) => {
            let params: FilterParams = match sub.get_one::<String>("filter") {
                Some(raw) => FilterParams {
                    indexed: serde_json::from_str(raw)
                        .map_err(|e| anyhow!("Invalid --filter JSON: {}", e))?,
                },
                None => FilterParams::default(),
            };
            let from_block = sub.get_one::<u64>("from-block").copied();
            let to_block = sub.get_one::<u64>("to-block").copied();
            let window = match (from_block, to_block) {
                (None, None) => None,
                (from_block, to_block) => Some(FilterWindow {
                    from_block: match from_block {
                        Some(block) => block,
                        None => engine.binding().await?.origin_block(),
                    },
                    to_block,
                }),
            };
            let source = event_source(sub);

            let delivered = engine.fetch_window(params, window, source).await?;
            info!("Fetched {} events", delivered);
            store.drain(&mut rx);
            print_json(&store.state().to_json())?;
        }
        Some(("watch", sub)) => {
            let source = event_source(sub);
            engine.initialize_state().await?;
            let subscription = engine
                .watch(FilterParams::default(), None, source)
                .await?;

            loop {
                tokio::select! {
                    action = rx.recv() => match action {
                        Some(action) => {
                            store.apply(&action);
                            print_json(&store.state().to_json())?;
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted, stopping subscription");
                        subscription.abort();
                        break;
                    }
                }
            }
        }
        _ => {
            engine.initialize_state().await?;
            store.drain(&mut rx);
            print_json(&store.state().to_json())?;
        }
    }

    Ok(())
}
