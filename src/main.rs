use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voicelink::{
    create_router, AppState, AudioOutput, Config, EphemeralCredential, HttpNegotiator,
    InboundMessage, NatsConnector, NullOutput, SessionDeps, SessionEvent, SessionFactory,
    VoiceSessionClient, WavFileInput, WavFileOutput,
};

#[derive(Parser)]
#[command(name = "voicelink", version, about = "Real-time voice session client")]
struct Cli {
    /// Config file (without extension)
    #[arg(long, default_value = "config/voicelink")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one session, streaming a WAV file as the microphone
    Connect {
        /// 16-bit or float WAV at the configured sample rate
        #[arg(long)]
        input: String,

        /// Record remote audio to this WAV file
        #[arg(long)]
        output: Option<String>,

        /// Ephemeral credential (fetched from negotiation.token_url if omitted)
        #[arg(long, env = "VOICELINK_CREDENTIAL")]
        credential: Option<String>,

        /// Text message to send once connected
        #[arg(long)]
        text: Option<String>,
    },

    /// Serve the local control API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config))?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Connect {
            input,
            output,
            credential,
            text,
        } => run_session(cfg, input, output, credential, text).await,
        Command::Serve => serve(cfg).await,
    }
}

async fn run_session(
    cfg: Config,
    input: String,
    output: Option<String>,
    credential: Option<String>,
    text: Option<String>,
) -> Result<()> {
    let session_config = cfg.voice.session_config();

    let credential = match (credential, &cfg.negotiation.token_url) {
        (Some(value), _) => EphemeralCredential::new(value),
        (None, Some(token_url)) => {
            voicelink::transport::fetch_credential(&reqwest::Client::new(), token_url).await?
        }
        (None, None) => bail!("No credential given and negotiation.token_url is not set"),
    };

    let output: Arc<dyn AudioOutput> = match output {
        Some(path) => Arc::new(WavFileOutput::create(path, session_config.sample_rate)?),
        None => Arc::new(NullOutput),
    };

    let deps = SessionDeps {
        connector: Arc::new(NatsConnector::new(&cfg.nats.url)),
        negotiator: Arc::new(HttpNegotiator::new(&cfg.negotiation.url)),
        input: Arc::new(WavFileInput::new(&input, session_config.sample_rate)),
        output: Arc::clone(&output),
    };

    let (client, mut events) = VoiceSessionClient::new(session_config, deps);

    client
        .connect(credential)
        .await
        .context("Failed to connect voice session")?;

    if let Some(text) = text {
        client.send_text(&text).await?;
    }

    info!("Connected. Press Ctrl-C to hang up.");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Message { message: InboundMessage::Transcript { text, partial } }) => {
                    if partial {
                        print!("\r{}", text);
                        std::io::Write::flush(&mut std::io::stdout()).ok();
                    } else {
                        println!("\n{}", text);
                    }
                }
                Some(SessionEvent::Countdown { seconds_remaining }) => {
                    warn!("Idle: hanging up in {}s", seconds_remaining);
                }
                Some(SessionEvent::InactivityTimeout) => {
                    info!("Session timed out due to inactivity");
                    break;
                }
                Some(SessionEvent::ConnectionLost) => {
                    warn!("Connection lost");
                    break;
                }
                Some(other) => info!("{:?}", other),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    client.disconnect().await;
    output.finish()?;

    let stats = client.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

async fn serve(cfg: Config) -> Result<()> {
    let factory = SessionFactory {
        session: cfg.voice.session_config(),
        connector: Arc::new(NatsConnector::new(&cfg.nats.url)),
        negotiator: Arc::new(HttpNegotiator::new(&cfg.negotiation.url)),
        input_wav: cfg.voice.input_wav.clone(),
        output_wav: cfg.voice.output_wav.clone(),
    };

    let app = create_router(AppState::new(factory));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Control API listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
