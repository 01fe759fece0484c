//! Minimal CLI for exercising the crowdfunding pledge protocol.
//!
//! `demo` runs a campaign start plus one pledge on an in-process network and
//! prints which nodes can see the resulting records; `config-check` validates
//! a network description.

use std::{
    env,
    path::{Path, PathBuf},
};

use crowdfund_ledger::config::NetworkConfig;
use crowdfund_ledger::net::{unix_time_ms, LocalNetwork};
use crowdfund_ledger::{Amount, Campaign, Pledge};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const DEMO_CAMPAIGN: &str = "Roger's Campaign";
const DEMO_DEADLINE_MS: u64 = 10 * 60 * 1000;

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_help() {
    println!("Usage: crowdfund <demo|config-check> ...");
    println!("  demo [--config <file>] [--manager <name>] [--pledger <name>]");
    println!("       [--target <pounds>] [--amount <pounds>] [--no-broadcast]");
    println!("  config-check <file>");
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> T {
    let value = value.unwrap_or_else(|| fatal(&format!("{flag} expects a value")));
    value
        .parse()
        .unwrap_or_else(|_| fatal(&format!("invalid {flag} value: {value}")))
}

struct DemoOptions {
    config: Option<PathBuf>,
    manager: String,
    pledger: String,
    target: u64,
    amount: u64,
    broadcast: bool,
}

impl DemoOptions {
    fn parse(args: Vec<String>) -> Self {
        let mut options = Self {
            config: None,
            manager: "PartyA".into(),
            pledger: "PartyB".into(),
            target: 1000,
            amount: 100,
            broadcast: true,
        };
        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => options.config = Some(parse_value("--config", iter.next())),
                "--manager" => options.manager = parse_value("--manager", iter.next()),
                "--pledger" => options.pledger = parse_value("--pledger", iter.next()),
                "--target" => options.target = parse_value("--target", iter.next()),
                "--amount" => options.amount = parse_value("--amount", iter.next()),
                "--no-broadcast" => options.broadcast = false,
                other => fatal(&format!("unknown argument: {other}")),
            }
        }
        options
    }
}

async fn cmd_demo(args: Vec<String>) {
    let options = DemoOptions::parse(args);
    let config = match &options.config {
        Some(path) => NetworkConfig::load(path).unwrap_or_else(|err| fatal(&err.to_string())),
        None => NetworkConfig::demo(),
    };
    let cluster = LocalNetwork::bootstrap(&config)
        .await
        .unwrap_or_else(|err| fatal(&format!("bootstrap failed: {err}")));
    let manager = cluster
        .node(&options.manager)
        .unwrap_or_else(|| fatal(&format!("unknown manager {}", options.manager)));
    let pledger = cluster
        .node(&options.pledger)
        .unwrap_or_else(|| fatal(&format!("unknown pledger {}", options.pledger)));

    let start = manager
        .start_campaign(
            DEMO_CAMPAIGN,
            Amount::pounds(options.target),
            unix_time_ms() + DEMO_DEADLINE_MS,
        )
        .await
        .unwrap_or_else(|err| fatal(&format!("campaign start failed: {err}")));
    let campaign_id = match start.tx().outputs_of_type::<Campaign>().first() {
        Some(campaign) => campaign.linear_id.clone(),
        None => fatal("campaign start produced no campaign"),
    };

    let receipt = pledger
        .start_pledge(Amount::pounds(options.amount), campaign_id.clone(), options.broadcast)
        .outcome()
        .await
        .unwrap_or_else(|err| fatal(&format!("pledge failed: {err}")));
    let ftx = &receipt.transaction;
    let campaign_ref = ftx.tx().out_ref(0);
    let pledge_ref = ftx.tx().out_ref(1);

    let mut visibility = Vec::new();
    for node in cluster.nodes() {
        let campaign = node.load_state_as::<Campaign>(&campaign_ref).await.ok();
        let pledge = node.load_state_as::<Pledge>(&pledge_ref).await.ok();
        let pledger_identity = match &pledge {
            Some(pledge) => node
                .well_known_party_from_anonymous(&pledge.state.pledger)
                .await
                .map(|party| party.name),
            None => None,
        };
        visibility.push(json!({
            "party": node.party().name,
            "campaign": campaign.map(|c| c.state.raised_so_far.to_string()),
            "pledge": pledge.map(|p| p.state.amount.to_string()),
            "pledger": pledger_identity,
        }));
    }
    let report = json!({
        "campaign_id": campaign_id.to_string(),
        "transaction": ftx.id().to_hex(),
        "broadcast": options.broadcast,
        "distribution": receipt.distribution,
        "visibility": visibility,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{text}"),
        Err(err) => fatal(&format!("failed to encode report: {err}")),
    }
}

fn cmd_config_check(args: Vec<String>) {
    let path = args
        .into_iter()
        .next()
        .unwrap_or_else(|| fatal("Usage: crowdfund config-check <file>"));
    match NetworkConfig::load(Path::new(&path)) {
        Ok(config) => println!(
            "config ok: notary {} with {} parties",
            config.notary.name,
            config.parties.len()
        ),
        Err(err) => fatal(&format!("config invalid: {err}")),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let mut args = env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("demo") => cmd_demo(args.collect()).await,
        Some("config-check") => cmd_config_check(args.collect()),
        Some("help") | Some("--help") | None => print_help(),
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}
