use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monero_highway::dns::enums::RecordType;
use monero_highway::dnssec::{KeyPair, Signer, SignerOptions};
use monero_highway::http_api::{ApiState, HttpApi};
use monero_highway::notify::TransferNotifier;
use monero_highway::responder::QueryResponder;
use monero_highway::server::{run_tcp_server, run_udp_server};
use monero_highway::state::StateFile;

const KEY_ENV: &str = "MONERO_HIGHWAY_KEY";

fn cli() -> Command {
    Command::new("dns-checkpoints")
        .about("Authoritative DNSSEC server broadcasting checkpoint TXT records")
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_name("ADDR")
                .help("address to bind DNS server to, UDP and TCP")
                .default_value("0.0.0.0:15353"),
        )
        .arg(
            Arg::new("api-bind")
                .long("api-bind")
                .value_name("ADDR")
                .help("address to bind the HTTP API")
                .default_value("127.0.0.1:19080"),
        )
        .arg(
            Arg::new("zone")
                .long("zone")
                .value_name("NAME")
                .help("domain zone to reply for")
                .required(true),
        )
        .arg(
            Arg::new("mailbox")
                .long("mailbox")
                .value_name("NAME")
                .help("mailbox for the zone SOA record")
                .required(true),
        )
        .arg(
            Arg::new("ns")
                .long("ns")
                .value_name("NAME")
                .help("nameservers for the zone. Can be specified multiple times")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("key")
                .long("key")
                .value_name("PATH")
                .help("DER/PEM encoded private key. Alternatively, use the MONERO_HIGHWAY_KEY environment variable"),
        )
        .arg(
            Arg::new("generate-key-type")
                .long("generate-key-type")
                .value_name("TYPE")
                .help("type of key to generate when no key file is given")
                .value_parser(["ed25519", "secp256r1", "secp384r1", "rsa2048", "rsa4096"])
                .default_value("ed25519"),
        )
        .arg(
            Arg::new("ttl")
                .long("ttl")
                .value_name("DURATION")
                .help("TTL to set on responses, with seconds granularity")
                .value_parser(humantime::parse_duration)
                .default_value("5m"),
        )
        .arg(
            Arg::new("authority-ttl")
                .long("authority-ttl")
                .value_name("DURATION")
                .help("TTL to set on authority (SOA / NS / DS / DNSKEY / etc.) responses, with seconds granularity")
                .value_parser(humantime::parse_duration)
                .default_value("24h"),
        )
        .arg(
            Arg::new("axfr")
                .long("axfr")
                .help("allow zone transfers via AXFR TCP transfers")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("axfr-notify")
                .long("axfr-notify")
                .value_name("TARGET")
                .help("servers or addresses with defined port to NOTIFY for a desired AXFR transfer")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("state")
                .long("state")
                .value_name("PATH")
                .help("state file to preserve set TXT records to load on startup. A temporary file will be created next to it."),
        )
}

/// Warn about and fix a missing trailing dot, the way operators habitually
/// pass zone names.
fn ensure_fqdn(kind: &str, name: &str) -> String {
    if name.ends_with('.') {
        return name.to_string();
    }
    warn!("-{} does not end with . suffix, adding: {}", kind, name);
    format!("{name}.")
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

    let bind_addr: SocketAddr = matches.get_one::<String>("bind").unwrap().parse()?;
    let api_bind: SocketAddr = matches.get_one::<String>("api-bind").unwrap().parse()?;

    let zone = ensure_fqdn("zone", matches.get_one::<String>("zone").unwrap());
    let mailbox = ensure_fqdn("mailbox", matches.get_one::<String>("mailbox").unwrap());
    let nameservers: Vec<String> = matches
        .get_many::<String>("ns")
        .unwrap_or_default()
        .map(|ns| ensure_fqdn("ns", ns))
        .collect();

    let key_path = matches
        .get_one::<String>("key")
        .cloned()
        .or_else(|| std::env::var(KEY_ENV).ok().filter(|v| !v.is_empty()));

    let key = match key_path {
        Some(path) => {
            let key = KeyPair::from_file(&path)?;
            info!("Loaded private key from file");
            key
        }
        None => {
            let key_type = matches.get_one::<String>("generate-key-type").unwrap();
            warn!(
                "no private key file provided via -key or {}. Generating random key.",
                KEY_ENV
            );
            let (key, pkcs8) = KeyPair::generate(key_type)?;
            let pem = monero_highway::dnssec::keys::pkcs8_to_pem(&pkcs8);
            warn!("Generated private key, type {}", key_type);
            eprintln!("\n{pem}");
            key
        }
    };

    let options = SignerOptions {
        zone,
        mailbox,
        nameservers,
        record_ttl: *matches.get_one::<Duration>("ttl").unwrap(),
        authority_ttl: *matches.get_one::<Duration>("authority-ttl").unwrap(),
        ..Default::default()
    };
    let record_ttl = options.record_ttl;

    let signer = Arc::new(Signer::new(key, options)?);

    let [zsk, ksk] = signer.dnskey();
    let authority_ttl_secs = signer.options().authority_ttl.as_secs() as u32;
    info!("DNSKEY ZSK: {}", zsk.display(signer.zone(), authority_ttl_secs));
    info!("DNSKEY KSK: {}", ksk.display(signer.zone(), authority_ttl_secs));
    info!("DS KSK: {}", signer.ds().display(signer.zone(), authority_ttl_secs));
    for (i, ns) in signer.nameservers().iter().enumerate() {
        info!("NS{}: {} {} IN NS {}", i + 1, signer.zone(), authority_ttl_secs, ns);
    }

    // the sole writer to the record store
    let signing_task = {
        let signer = signer.clone();
        tokio::spawn(async move {
            if let Err(e) = signer.process(record_ttl / 2).await {
                // serving stale signatures is unsafe
                error!("Failed to process record: {}", e);
                std::process::exit(1);
            }
        })
    };

    signer.add_authority_records().await?;

    let notify_targets: Vec<String> = matches
        .get_many::<String>("axfr-notify")
        .unwrap_or_default()
        .cloned()
        .collect();
    let notifier = if notify_targets.is_empty() {
        None
    } else {
        Some(TransferNotifier::spawn(signer.clone(), notify_targets))
    };

    let state_file = matches
        .get_one::<String>("state")
        .map(|path| StateFile::new(path, signer.clone()));
    if let Some(state_file) = &state_file {
        state_file.load().await?;
    }

    // await the initial signatures before serving
    while signer.get(RecordType::NS.code()).is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let axfr = matches.get_flag("axfr");
    let udp_responder = Arc::new(QueryResponder::new(signer.clone(), false));
    let tcp_responder = Arc::new(QueryResponder::new(signer.clone(), axfr));

    let udp_task = tokio::spawn(run_udp_server(bind_addr, udp_responder));
    let tcp_task = tokio::spawn(run_tcp_server(bind_addr, tcp_responder));

    let api_task = tokio::spawn(
        HttpApi::new(
            ApiState {
                signer: signer.clone(),
                notifier: notifier.clone(),
                state_file,
            },
            api_bind,
        )
        .start(),
    );

    info!("DNS server listening on {} (UDP and TCP)", bind_addr);

    if let Some(notifier) = &notifier {
        notifier.notify();
    }

    tokio::select! {
        result = udp_task => {
            error!("UDP server exited: {:?}", result);
        }
        result = tcp_task => {
            error!("TCP server exited: {:?}", result);
        }
        result = api_task => {
            error!("HTTP server exited: {:?}", result);
        }
        result = signing_task => {
            error!("Signing task exited: {:?}", result);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            return Ok(());
        }
    }

    Err("no active servers".into())
}
