use clap::{Parser, Subcommand};
use raccoon_bridge::bridge::{Forwarder, IntegrationsClient};
use raccoon_bridge::channels::{
    is_group_jid, phone_from_jid, ChatType, InboundMessage, InboundMetadata, MemoryConnector,
    INTEGRATION_ID,
};
use raccoon_bridge::config::{self, resolve_bridge_config};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "raccoon")]
#[command(about = "Raccoon WhatsApp bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config and the credentials directory.
    Init {
        /// Config file path (default: RACCOON_CONFIG_PATH or ~/.raccoon/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the gateway: connect every WhatsApp user from the Raccoon API and serve the send endpoint.
    Gateway {
        /// Config file path (default: RACCOON_CONFIG_PATH or ~/.raccoon/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 18790)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// List the user/integration bindings known to the Raccoon API.
    Integrations {
        /// Config file path (default: RACCOON_CONFIG_PATH or ~/.raccoon/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Post a synthetic inbound message to the webhook and print the acknowledgement.
    Forward {
        /// Config file path (default: RACCOON_CONFIG_PATH or ~/.raccoon/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Raccoon user id the message belongs to.
        #[arg(long)]
        user: String,

        /// Conversation JID (e.g. 15551234567@s.whatsapp.net or 1203...@g.us).
        #[arg(long)]
        chat: String,

        #[arg(long)]
        text: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("raccoon {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Gateway { config, port }) => run_gateway(config, port).await,
        Some(Commands::Integrations { config }) => run_integrations(config).await,
        Some(Commands::Forward {
            config,
            user,
            chat,
            text,
        }) => run_forward(config, user, chat, text).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = raccoon_bridge::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        config.gateway.port
    );
    // The WhatsApp network client lives outside this crate; the in-process connector
    // records sends and never receives traffic.
    raccoon_bridge::gateway::run_gateway(config, path, Arc::new(MemoryConnector::new())).await
}

async fn run_integrations(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let client = IntegrationsClient::new(Arc::new(resolve_bridge_config(&config)));
    let integrations = client.fetch().await?;
    for i in &integrations {
        let keys = i
            .credentials
            .as_ref()
            .map(|c| c.keys().cloned().collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        let phone = i.metadata.as_ref().and_then(|m| m.phone()).unwrap_or("-");
        println!(
            "{}\t{}\tphone={}\tcredentials=[{}]",
            i.user_id, i.integration_id, phone, keys
        );
    }
    println!("{} binding(s)", integrations.len());
    Ok(())
}

async fn run_forward(
    config_path: Option<PathBuf>,
    user: String,
    chat: String,
    text: String,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let forwarder = Forwarder::new(Arc::new(resolve_bridge_config(&config)));

    let chat_type = if is_group_jid(&chat) {
        ChatType::Group
    } else {
        ChatType::Direct
    };
    let from = phone_from_jid(&chat).unwrap_or_else(|| chat.clone());
    let message = InboundMessage {
        user_id: user,
        integration_id: INTEGRATION_ID.to_string(),
        chat_id: chat.clone(),
        from,
        text,
        timestamp: chrono::Utc::now().timestamp_millis(),
        metadata: Some(InboundMetadata {
            conversation_id: chat.clone(),
            chat_type,
            sender_name: None,
            sender_id: Some(chat),
            group_subject: None,
            message_id: None,
        }),
    };

    let result = forwarder.forward(&message).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!(
            "forward failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
