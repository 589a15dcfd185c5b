#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

use liverelay::auth::{self, CredentialManager, CredentialSource, FileTokenStore};
use liverelay::bot::{ControlSurface, LoopSettings, SessionDeps, SharedState};
use liverelay::channels::{ChatClient, LineClient, Notifier, UserRegistry, YouTubeLiveChat};
use liverelay::config::Config;
use liverelay::gateway::{Gateway, GatewayContext};
use liverelay::personas::PersonaStore;
use liverelay::providers::GeminiGenerator;

/// `liverelay` relays a YouTube Live chat through Gemini, driven over LINE.
#[derive(Parser, Debug)]
#[command(name = "liverelay")]
#[command(version)]
#[command(about = "Live-chat relay bot: YouTube Live × Gemini × LINE.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway and control surface (the normal mode)
    Serve {
        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (0 = random); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Post one message into the currently active live chat and exit
    Post {
        /// Message text
        text: String,
    },

    /// List available personas
    Personas,

    /// Check configuration, credentials, and persona files
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = Config::load_or_init()?;

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Post { text } => post_once(&config, &text).await,
        Commands::Personas => {
            let store = PersonaStore::new(config.personas_dir());
            for name in store.list() {
                let marker = if name == config.bot.default_persona {
                    " (default)"
                } else {
                    ""
                };
                println!("{name}{marker}");
            }
            Ok(())
        }
        Commands::Doctor => doctor(&config),
    }
}

fn build_deps(config: &Config) -> (SessionDeps, Arc<LineClient>) {
    let line = Arc::new(LineClient::new(
        config.line.channel_access_token.clone(),
        config.line.admin_user_id.clone(),
    ));

    let chat: Arc<dyn ChatClient> = Arc::new(YouTubeLiveChat::new(&config.youtube));
    let auth: Arc<dyn CredentialSource> = Arc::new(CredentialManager::new(Arc::new(
        FileTokenStore::new(config.token_path()),
    )));
    let notifier: Arc<dyn Notifier> = line.clone();

    let deps = SessionDeps {
        state: SharedState::new(&config.bot.default_persona),
        chat,
        replies: Arc::new(GeminiGenerator::new(&config.gemini)),
        notifier,
        auth,
        personas: Arc::new(PersonaStore::new(config.personas_dir())),
        settings: LoopSettings::from_config(&config.bot),
    };

    (deps, line)
}

async fn serve(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    // Initial-deploy bootstrap: write the credential file from the env
    // before anything tries to read it.
    auth::seed_token_from_env(&config.token_path())?;

    let (deps, line) = build_deps(&config);
    let state = deps.state.clone();
    let notifier = deps.notifier.clone();
    let control = ControlSurface::new(deps);

    let ctx = Arc::new(GatewayContext {
        control,
        line,
        users: Arc::new(UserRegistry::new(config.users_path())),
        notifier,
        state,
        channel_secret: config.line.channel_secret.clone(),
        webhook_path: config.line.webhook_path.clone(),
    });

    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);

    let gateway = Gateway::bind(&host, port).await?;
    gateway.run(ctx).await
}

/// One-shot manual post: discover the active session, acquire the
/// credential, post, report. Does not need a running `serve` process.
async fn post_once(config: &Config, text: &str) -> Result<()> {
    let chat = YouTubeLiveChat::new(&config.youtube);

    let Some(chat_id) = chat.discover_active_session().await? else {
        println!("No live stream is currently active — nothing posted.");
        return Ok(());
    };

    let auth = CredentialManager::new(Arc::new(FileTokenStore::new(config.token_path())));
    let credential = match auth.get_credential().await {
        Ok(c) => c,
        Err(e) => {
            println!("Cannot post: {e}");
            return Ok(());
        }
    };

    let message_id = chat.post(&credential, &chat_id, text).await?;
    println!("Posted (message id {message_id}).");
    Ok(())
}

fn doctor(config: &Config) -> Result<()> {
    let mut problems = 0u32;

    let mut check = |ok: bool, label: &str, hint: &str| {
        if ok {
            println!("✅ {label}");
        } else {
            println!("⚠️  {label} — {hint}");
            problems += 1;
        }
    };

    check(
        config.config_path.exists(),
        "config.toml present",
        "run any command once to create it",
    );
    check(
        !config.youtube.api_key.is_empty(),
        "YouTube API key configured",
        "set [youtube] api_key or LIVERELAY_YOUTUBE_API_KEY",
    );
    check(
        !config.youtube.channel_id.is_empty(),
        "YouTube channel id configured",
        "set [youtube] channel_id",
    );
    check(
        !config.gemini.api_key.is_empty(),
        "Gemini API key configured",
        "set [gemini] api_key or LIVERELAY_GEMINI_API_KEY",
    );
    check(
        !config.line.channel_secret.is_empty() && !config.line.channel_access_token.is_empty(),
        "LINE channel credentials configured",
        "set [line] channel_secret and channel_access_token",
    );
    check(
        !config.line.admin_user_id.is_empty(),
        "LINE admin user configured",
        "set [line] admin_user_id to receive notifications",
    );

    let store = FileTokenStore::new(config.token_path());
    match liverelay::auth::TokenStore::load(&store) {
        Ok(Some(credential)) => {
            if credential.is_expired(60) {
                let refreshable = credential.refresh_token.is_some();
                check(
                    refreshable,
                    "YouTube credential expired but refreshable",
                    "re-run the OAuth flow — no refresh token stored",
                );
            } else {
                check(true, "YouTube credential valid", "");
            }
        }
        Ok(None) => check(
            false,
            "YouTube credential present",
            "seed youtube_token.json or set LIVERELAY_YOUTUBE_TOKEN_JSON",
        ),
        Err(e) => check(false, "YouTube credential readable", &e.to_string()),
    }

    let personas = PersonaStore::new(config.personas_dir());
    let names = personas.list();
    check(
        names.contains(&config.bot.default_persona),
        &format!("default persona '{}' resolves", config.bot.default_persona),
        "add the persona file or change [bot] default_persona",
    );
    println!("   personas: {}", names.join(", "));

    if problems == 0 {
        println!("\nAll checks passed.");
    } else {
        println!("\n{problems} problem(s) found.");
    }
    Ok(())
}
