//! # Natural-Language FHIR Query CLI
//!
//! Ask a FHIR server questions in plain English from the terminal.
//!
//! ## Command Line Options
//!
//! ```text
//!     --server <URL>            FHIR base URL [default: https://hapi.fhir.org/baseR4]
//!     --cors-proxies <LIST>     Comma-separated proxy prefixes to try after a direct failure
//!     --no-local-sample         Never fall back to built-in sample data
//!     --timeout <SECS>          Per-attempt timeout [default: 10]
//!     --smart                   Plan queries with a cloud model
//!     --provider <NAME>         openai | anthropic
//!     --api-key <KEY>           Provider API key
//!     --model <MODEL>           Provider model (defaults per provider)
//!     --log-level <LEVEL>       error, warn, info, debug, trace [default: warn]
//!
//! Commands:
//!   ask <TEXT>                  Answer one question
//!   classify <TEXT>             Show the intent a question maps to, without querying
//!   assess [--server <URL>]     Score the data on a FHIR server
//!   repl                        Interactive session
//! ```
//!
//! Every option can also be given through an `ATRIUS_QUERY_*` environment
//! variable (`ATRIUS_QUERY_SERVER`, `ATRIUS_QUERY_API_KEY`, ...).
//!
//! ## Usage Examples
//!
//! ```bash
//! atrius-query-cli ask "find patients with diabetes"
//! atrius-query-cli --server https://r4.smarthealthit.org ask "show female patients"
//! atrius-query-cli classify "patients born in the latter half of 1967"
//! atrius-query-cli assess --bands four-band
//! ATRIUS_QUERY_API_KEY=sk-... atrius-query-cli --smart --provider openai repl
//! ```

use anyhow::{Context, bail};
use atrius_fhir_query::session::ProviderCredentials;
use atrius_fhir_query::transport::DEFAULT_SERVER;
use atrius_fhir_query::{
    BandScheme, FhirAssistant, FormattedResult, Provider, ResultKind, Session, TransportConfig,
    classify,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "atrius-query-cli")]
#[command(about = "Ask FHIR servers questions in plain English")]
struct Args {
    /// FHIR base URL
    #[arg(long, global = true, env = "ATRIUS_QUERY_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    /// Comma-separated CORS proxy prefixes; giving any turns proxies on
    #[arg(long, global = true, env = "ATRIUS_QUERY_CORS_PROXIES", value_delimiter = ',')]
    cors_proxies: Vec<String>,

    /// Never fall back to built-in sample data
    #[arg(long, global = true, env = "ATRIUS_QUERY_NO_LOCAL_SAMPLE")]
    no_local_sample: bool,

    /// Per-attempt timeout in seconds
    #[arg(long, global = true, env = "ATRIUS_QUERY_TIMEOUT", default_value_t = 10)]
    timeout: u64,

    /// Plan queries with a cloud model
    #[arg(long, global = true, env = "ATRIUS_QUERY_SMART")]
    smart: bool,

    /// Cloud reasoning provider (openai, anthropic)
    #[arg(long, global = true, env = "ATRIUS_QUERY_PROVIDER")]
    provider: Option<Provider>,

    /// Provider API key
    #[arg(long, global = true, env = "ATRIUS_QUERY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Provider model
    #[arg(long, global = true, env = "ATRIUS_QUERY_MODEL")]
    model: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "ATRIUS_QUERY_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one question
    Ask {
        /// The question, e.g. "show all patients"
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Show the intent a question maps to, without querying
    Classify {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Score the data on a FHIR server
    Assess {
        /// Score distribution shown with the result
        #[arg(long, value_enum, default_value_t = Bands::TwoBand)]
        bands: Bands,

        /// Print the assessment as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive session
    Repl,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Bands {
    TwoBand,
    FourBand,
}

impl From<Bands> for BandScheme {
    fn from(bands: Bands) -> Self {
        match bands {
            Bands::TwoBand => BandScheme::TwoBand,
            Bands::FourBand => BandScheme::FourBand,
        }
    }
}

const REPL_HELP: &str = "Commands:
  :server <url>      switch FHIR server (runs a connection test)
  :smart on|off      toggle cloud planning
  :status            show the current server and data source
  :help              this text
  :quit              leave
Anything else is sent as a question.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("atrius_fhir_query={}", args.log_level).into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Command::Classify { text } = &args.command {
        let intent = classify(&text.join(" "));
        println!("{}", serde_json::to_string_pretty(&intent)?);
        return Ok(());
    }

    let assistant = build_assistant(&args)?;

    match args.command {
        Command::Ask { text } => {
            let result = assistant.process(&text.join(" ")).await;
            print_result(&result);
            if result.is_error() {
                std::process::exit(1);
            }
        }
        Command::Assess { bands, json } => {
            let assessment = assistant.executor().assess(None).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&assessment)?);
            } else {
                println!("{}", assessment.narrative(bands.into()));
            }
        }
        Command::Repl => repl(&assistant).await?,
        Command::Classify { .. } => {}
    }

    Ok(())
}

fn build_assistant(args: &Args) -> anyhow::Result<FhirAssistant> {
    let server = args.server.trim().trim_end_matches('/');
    url::Url::parse(server).with_context(|| format!("Invalid FHIR server URL '{}'", server))?;

    let mut config = TransportConfig {
        timeout: Duration::from_secs(args.timeout),
        local_sample: !args.no_local_sample,
        ..TransportConfig::default()
    };
    if !args.cors_proxies.is_empty() {
        config.cors_proxies = args.cors_proxies.clone();
        config.use_cors_proxies = true;
    }

    let session = Arc::new(Session::new(server));
    session.set_preferred_model(args.model.clone());
    if let Some(api_key) = &args.api_key {
        let Some(provider) = args.provider else {
            bail!("--provider is required with --api-key");
        };
        session.set_credentials(Some(ProviderCredentials {
            provider,
            api_key: api_key.clone(),
            model: args.model.clone(),
        }));
    }
    if args.smart {
        if session.credentials().is_none() {
            eprintln!("warning: --smart without --api-key; using pattern matching");
        }
        session.set_smart_mode(true);
    }

    Ok(FhirAssistant::with_http(session, config))
}

fn print_result(result: &FormattedResult) {
    let marker = match result.kind {
        ResultKind::Success => "✔",
        ResultKind::Warning => "⚠",
        ResultKind::Error => "✖",
        ResultKind::Info => "ℹ",
    };
    println!("{} [{}]\n{}", marker, result.kind, result.content.trim_end());
}

async fn repl(assistant: &FhirAssistant) -> anyhow::Result<()> {
    let session = assistant.session();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Connected session for {}. Type :help for commands.", session.endpoint());

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            ":quit" | ":exit" | ":q" => break,
            ":help" => println!("{}", REPL_HELP),
            ":status" => {
                println!("Server: {}", session.endpoint());
                println!("Smart mode: {}", if session.smart_mode() { "on" } else { "off" });
                println!("{}", session.status().indicator());
            }
            ":smart" => match rest.trim() {
                "on" => {
                    if session.credentials().is_none() {
                        println!("No API key configured; pattern matching stays in use.");
                    }
                    session.set_smart_mode(true);
                }
                "off" => session.set_smart_mode(false),
                _ => println!("Usage: :smart on|off"),
            },
            ":server" => {
                let server = rest.trim().trim_end_matches('/');
                if url::Url::parse(server).is_err() {
                    println!("Invalid server URL '{}'", server);
                    continue;
                }
                session.set_endpoint(server);
                let status = assistant.executor().transport().probe().await;
                println!("{}", status.indicator());
            }
            _ => {
                let result = assistant.process(line).await;
                print_result(&result);
            }
        }
    }

    Ok(())
}
