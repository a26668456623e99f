//! MQTT Console - terminal entry point
//!
//! A line-oriented presentation adapter: commands are read from stdin and
//! every session notification is printed on stdout.

use clap::Parser;
use mqtt_console::config::ConfigSource;
use mqtt_console::console::{Console, ConsoleHandle};
use mqtt_console::observability::{init_logging, level_from_verbosity, LogFormat};
use mqtt_console::session::{ConsoleNotification, SessionSnapshot, Timings};
use mqtt_console::transport::mqtt::RumqttcConnector;
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Drive MQTT publish/subscribe actions from named controls
#[derive(Parser)]
#[command(name = "mqtt-console")]
#[command(version)]
struct Cli {
    /// Configuration document: a local path or an http(s) URL
    #[arg(short, long, value_name = "PATH|URL", default_value = "ui_setup.json")]
    config: String,

    /// Connect as soon as the configuration is loaded
    #[arg(long)]
    connect: bool,

    /// Verbose logging (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format: json, pretty or compact
    #[arg(long, value_name = "FORMAT", default_value = "compact")]
    log_format: String,

    /// Log span open/close events
    #[arg(long)]
    log_spans: bool,
}

/// One line typed by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
enum TerminalCommand {
    Connect,
    Disconnect,
    Toggle,
    Click(usize),
    Load(String),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<TerminalCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".to_string());
    };
    let argument = words.next();

    let command = match (verb, argument) {
        ("connect", None) => TerminalCommand::Connect,
        ("disconnect", None) => TerminalCommand::Disconnect,
        ("toggle", None) => TerminalCommand::Toggle,
        ("status", None) => TerminalCommand::Status,
        ("help", None) => TerminalCommand::Help,
        ("quit" | "exit", None) => TerminalCommand::Quit,
        ("load", Some(location)) => TerminalCommand::Load(location.to_string()),
        ("click", Some(index)) => TerminalCommand::Click(parse_index(index)?),
        (index, None) if index.chars().all(|c| c.is_ascii_digit()) => {
            TerminalCommand::Click(parse_index(index)?)
        }
        _ => return Err(format!("unknown command: {}", line.trim())),
    };

    if words.next().is_some() {
        return Err(format!("too many arguments: {}", line.trim()));
    }
    Ok(command)
}

fn parse_index(raw: &str) -> Result<usize, String> {
    raw.parse()
        .map_err(|_| format!("invalid item index: {raw}"))
}

fn render_notification(notification: &ConsoleNotification) -> String {
    match notification {
        ConsoleNotification::Connected => "[broker] connected".to_string(),
        ConsoleNotification::Disconnected => "[broker] disconnected".to_string(),
        ConsoleNotification::Reconnecting => "[broker] reconnecting".to_string(),
        ConsoleNotification::ReconnectIdle => "[broker] idle".to_string(),
        ConsoleNotification::Error(detail) => format!("[broker] error: {detail}"),
        ConsoleNotification::ItemMessage { index, payload } => format!("[{index}] {payload}"),
        ConsoleNotification::ItemMessageCleared(index) => format!("[{index}] -"),
        ConsoleNotification::ItemPublished(index) => format!("[{index}] published"),
        ConsoleNotification::ItemFlashCleared(index) => format!("[{index}] flash off"),
        ConsoleNotification::ItemReady(index) => format!("[{index}] ready"),
        ConsoleNotification::ItemSubscribed(index) => format!("[{index}] subscribed"),
        ConsoleNotification::ItemUnsubscribed(index) => format!("[{index}] unsubscribed"),
        ConsoleNotification::ItemFailed { index, error } => format!("[{index}] failed: {error}"),
        ConsoleNotification::ConfigLoaded { items, broker } => {
            format!("[config] {items} items\n{broker}")
        }
        ConsoleNotification::ConfigFailed(reason) => format!("[config] {reason}"),
    }
}

fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut lines = vec![format!("state: {}", snapshot.state)];
    if let Some(broker) = &snapshot.broker {
        lines.push(broker.clone());
    }
    for item in &snapshot.items {
        let kind = if item.publisher { "pub" } else { "sub" };
        let mut flags = Vec::new();
        if item.processing {
            flags.push("processing");
        }
        if item.subscribed {
            flags.push("subscribed");
        }
        lines.push(format!(
            "  {} {:<3} {:<20} {} {}",
            item.index,
            kind,
            item.name,
            item.topic,
            flags.join(",")
        ));
    }
    lines.join("\n")
}

const HELP: &str = "commands: connect | disconnect | toggle | click <i> | <i> | load <path|url> | status | quit";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(
        level_from_verbosity(cli.verbose),
        LogFormat::parse(&cli.log_format),
        cli.log_spans,
    );
    info!("Starting mqtt-console v{}", env!("CARGO_PKG_VERSION"));

    let (notifications, mut notification_rx) = mpsc::unbounded_channel::<ConsoleNotification>();
    let (console, task) = Console::spawn(RumqttcConnector::new(), notifications, Timings::default());

    if let Err(e) = console.load(ConfigSource::parse(&cli.config)).await {
        error!("Failed to start console: {}", e);
        process::exit(1);
    }

    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut auto_connect = cli.connect;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            Some(notification) = notification_rx.recv() => {
                println!("{}", render_notification(&notification));
                if auto_connect && matches!(notification, ConsoleNotification::ConfigLoaded { .. }) {
                    auto_connect = false;
                    report(console.connect().await);
                }
            }
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(TerminalCommand::Quit) => break,
                    Ok(command) => run_command(&console, command).await,
                    Err(e) => println!("{e}\n{HELP}"),
                }
            }
        }
    }

    if console.shutdown().await.is_ok() {
        let _ = task.await;
    }
    info!("Application shutdown complete");
}

async fn run_command(console: &ConsoleHandle, command: TerminalCommand) {
    match command {
        TerminalCommand::Connect => report(console.connect().await),
        TerminalCommand::Disconnect => report(console.disconnect().await),
        TerminalCommand::Toggle => report(console.toggle_connection().await),
        TerminalCommand::Click(index) => report(console.trigger(index).await),
        TerminalCommand::Load(location) => report(console.load(ConfigSource::parse(&location)).await),
        TerminalCommand::Status => match console.snapshot().await {
            Ok(snapshot) => println!("{}", render_snapshot(&snapshot)),
            Err(e) => println!("{e}"),
        },
        TerminalCommand::Help => println!("{HELP}"),
        TerminalCommand::Quit => {}
    }
}

fn report(result: mqtt_console::ConsoleResult<()>) {
    if let Err(e) = result {
        println!("{e}");
    }
}
