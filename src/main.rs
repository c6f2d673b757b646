use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

use lanchat::{Config, EventSink, InputOutcome, Node, SystemAction, VERSION};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port shared by every peer on the network
    #[arg(short, long)]
    port: Option<u16>,

    /// Nickname shown to other peers (asked for if not set)
    #[arg(short, long)]
    nick: Option<String>,

    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory received files are saved to
    #[arg(short, long)]
    download_dir: Option<PathBuf>,

    /// Join the multicast group so `mc <text>` works
    #[arg(short, long)]
    multicast: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lanchat=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(nick) = args.nick {
        config.nickname = nick;
    }
    if let Some(dir) = args.download_dir {
        config.download_dir = dir;
    }
    if args.multicast && config.multicast_group.is_none() {
        config.multicast_group = Some(Config::DEFAULT_MULTICAST_GROUP);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while config.nickname.trim().is_empty() {
        print!("Nickname: ");
        std::io::stdout().flush()?;
        match lines.next_line().await? {
            Some(line) => config.nickname = line.trim().to_string(),
            None => return Ok(()),
        }
    }
    let nickname = config.nickname.clone();
    let broadcast = config.broadcast_addr();

    let (events, mut event_rx) = EventSink::channel();
    let node = Node::start(config, events).await?;
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[{}] {}", Local::now().format("%H:%M:%S"), event);
        }
    });

    println!(
        "lanchat {} - '{}' ({}) on {}",
        VERSION,
        nickname,
        node.engine().local_peer().id,
        node.local_addr()
    );
    println!("Commands: @<target> <text> | file <target> <path> | mc <text> | peers | quit");
    node.join_chat();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match node.engine().parse_user_input(&line) {
                    Ok(InputOutcome::Continue) => {}
                    Ok(InputOutcome::Quit) => break,
                    Err(e) => node.engine().report_error(&e),
                },
                Ok(None) => {
                    node.engine().send_system(broadcast, SystemAction::Quit);
                    break;
                }
                Err(e) => {
                    error!(error = %e, "failed to read stdin");
                    node.engine().send_system(broadcast, SystemAction::Quit);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                node.engine().send_system(broadcast, SystemAction::Quit);
                break;
            }
        }
    }

    node.shutdown().await?;
    // the event channel closes once the engine is gone
    let _ = printer.await;
    Ok(())
}
