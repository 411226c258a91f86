use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monero_highway::checkpoint::daemon::Daemon;
use monero_highway::checkpoint::producer::{Producer, ProducerOptions, TipNotification};
use monero_highway::checkpoint::publish::{parse_push_config, PushTarget};
use monero_highway::checkpoint::{load_checkpoint_state, zmq};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);
const RESTART_DELAY: Duration = Duration::from_secs(5);
const TIP_CHANNEL_DEPTH: usize = 10;

fn cli() -> Command {
    Command::new("checkpointer")
        .about("Computes chain checkpoints and pushes them to DNS publication backends")
        .arg(
            Arg::new("rpc")
                .long("rpc")
                .value_name("URL")
                .help("Monero RPC server URL. Can be restricted")
                .default_value("http://127.0.0.1:18081"),
        )
        .arg(
            Arg::new("zmq")
                .long("zmq")
                .value_name("ADDR")
                .help("Monero ZMQ-PUB server address")
                .default_value("tcp://127.0.0.1:18083"),
        )
        .arg(
            Arg::new("push-config")
                .long("push-config")
                .value_name("PATH")
                .help("Path to YAML file to push records"),
        )
        .arg(
            Arg::new("checkpoint-state")
                .long("checkpoint-state")
                .value_name("PATH")
                .help("File where to save checkpoints.json state. Directory where it is emplaced must be writable and on same mount. Same format as used by the chain daemon.")
                .default_value("checkpoints.json"),
        )
        .arg(
            Arg::new("checkpoint-depth")
                .long("checkpoint-depth")
                .value_name("N")
                .help("Depth from tip to place checkpoints at. Depth of 2 means tip height of 100 will checkpoint 98")
                .value_parser(clap::value_parser!(u64))
                .default_value("2"),
        )
        .arg(
            Arg::new("checkpoint-interval")
                .long("checkpoint-interval")
                .value_name("DURATION")
                .help("Interval when checkpoints will be set. Default zero, checkpoint instantly. Recommended: 5m")
                .value_parser(humantime::parse_duration),
        )
        .arg(
            Arg::new("loop")
                .long("loop")
                .help("By default the program will bail out when a sanity check fails or miscondition happens. Enable this to restart the loop instead")
                .action(ArgAction::SetTrue),
        )
}

async fn run_once(
    rpc_url: &str,
    zmq_addr: &str,
    targets: Vec<PushTarget>,
    options: ProducerOptions,
) -> monero_highway::Result<()> {
    let daemon = Daemon::new(rpc_url, RPC_TIMEOUT)?;

    let loaded = match options.state_path.as_deref() {
        Some(path) => load_checkpoint_state(path)?,
        None => None,
    };

    let producer = Producer::new(daemon, targets, options)?;
    let (tip_tx, tip_rx) = mpsc::channel::<TipNotification>(TIP_CHANNEL_DEPTH);

    // the listener exits once the producer side drops the channel
    let listener = tokio::spawn(zmq::listen_tips(zmq_addr.to_string(), tip_tx));

    let result = producer.run(loaded, tip_rx).await;
    listener.abort();
    result
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = cli().get_matches();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "monero_highway=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rpc_url = matches.get_one::<String>("rpc").unwrap().clone();
    let zmq_addr = matches.get_one::<String>("zmq").unwrap().clone();
    let restart = matches.get_flag("loop");

    let targets = match matches.get_one::<String>("push-config") {
        Some(path) => {
            let data = std::fs::read_to_string(path)?;
            let targets = parse_push_config(&data)?;
            info!("Loaded push config with {} entries", targets.len());
            targets
        }
        None => Vec::new(),
    };

    let state_path = matches
        .get_one::<String>("checkpoint-state")
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);

    let options = ProducerOptions {
        checkpoint_depth: *matches.get_one::<u64>("checkpoint-depth").unwrap(),
        checkpoint_interval: matches
            .get_one::<Duration>("checkpoint-interval")
            .copied()
            .filter(|interval| !interval.is_zero()),
        state_path,
    };

    loop {
        match run_once(&rpc_url, &zmq_addr, targets.clone(), options.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                error!("Checkpoint producer failed: {}", e);
                if !restart {
                    return Err(e.into());
                }
                // prevent fast crash loops
                tokio::time::sleep(RESTART_DELAY).await;
                info!("recovered, starting anew");
            }
        }
    }
}
