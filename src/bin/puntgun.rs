use anyhow::Result;
use clap::{Parser, Subcommand};
use puntgun::{
    client::{HttpPlatformApi, InMemoryPlatform, PlatformApi},
    config::{Settings, version},
    errors::RunError,
    runner::{Runner, describe_config_errors},
    secrets::{EnvSecretStore, PlainSecretStore, SecretStore},
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

/// Select accounts, filter them through a rule tree, block the matches.
#[derive(Parser, Debug)]
#[command(name = "puntgun", version, about)]
struct Cli {
    /// Settings file (YAML). `PUNTGUN_*` variables override it.
    #[arg(long = "settings", global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute every plan in a plan file.
    Fire {
        /// Plan file (YAML).
        #[arg(long)]
        plan: PathBuf,
        /// Plain secrets file. Without it secrets come from `PUNTGUN_*` variables.
        #[arg(long)]
        secrets: Option<PathBuf>,
        /// Report file. Defaults to `report_<run id>.json` in the report directory.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Run against a JSON fixture instead of the platform.
        #[arg(long)]
        fixture: Option<PathBuf>,
    },

    /// Validate files without contacting the platform.
    Check {
        #[command(subcommand)]
        what: CheckWhat,
    },

    /// Print templates.
    Gen {
        #[command(subcommand)]
        what: GenWhat,
    },
}

#[derive(Subcommand, Debug)]
enum CheckWhat {
    /// Parse a plan file and list every configuration error.
    Plan {
        #[arg(long)]
        plan: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum GenWhat {
    /// Default settings as YAML.
    Config,
    /// Plain secrets file template.
    #[command(name = "plain_secrets")]
    PlainSecrets,
    /// Ciphered secrets file (not supported by this build).
    Secrets,
    /// New password for ciphered secrets (not supported by this build).
    #[command(name = "new_password")]
    NewPassword,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Gen { what } = &cli.command {
        match what {
            GenWhat::Config => print!("{}", Settings::default_yaml()),
            GenWhat::PlainSecrets => print!("{}", PlainSecretStore::template()),
            GenWhat::Secrets | GenWhat::NewPassword => {
                eprintln!("ciphered secrets are not supported, use `gen plain_secrets`");
                std::process::exit(2);
            }
        }
        return Ok(());
    }

    let settings = Settings::load(cli.settings.as_deref())?;

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| format!("puntgun={}", settings.log_level.as_str())),
    );
    let fmt_layer = if std::env::var("PUNTGUN_JSON_LOGS").is_ok() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .boxed()
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    let version = version()?;
    tracing::info!(version = %version, "Starting puntgun");

    let runner = Runner::new(settings)?;
    let outcome = match cli.command {
        Commands::Check {
            what: CheckWhat::Plan { plan },
        } => runner.check(&plan).map(|plans| {
            println!("{}: {} plan(s) OK", plan.display(), plans.len());
        }),
        Commands::Fire {
            plan,
            secrets,
            report,
            fixture,
        } => {
            let api: Arc<dyn PlatformApi> = match fixture {
                Some(fixture) => Arc::new(InMemoryPlatform::load(&fixture)?),
                None => {
                    let store: Box<dyn SecretStore> = match secrets {
                        Some(path) => Box::new(PlainSecretStore::open(&path)?),
                        None => Box::new(EnvSecretStore::new()),
                    };
                    let http_client = reqwest::Client::builder()
                        .user_agent(format!("puntgun/{version}"))
                        .connect_timeout(Duration::from_secs(10))
                        .build()?;
                    Arc::new(HttpPlatformApi::new(
                        Arc::new(http_client),
                        &runner.settings().api_base,
                        &store.get_all()?,
                    )?)
                }
            };

            let token = CancellationToken::new();
            spawn_signal_handler(token.clone());

            runner
                .start(&plan, api, report.as_deref(), token)
                .await
                .map(|outcome| {
                    for (name, summary) in &outcome.plans {
                        println!(
                            "{name}: {} considered, {} matched, {} actions succeeded, {} failed",
                            summary.considered,
                            summary.matched,
                            summary.actions_succeeded,
                            summary.actions_failed
                        );
                    }
                    println!("report: {}", outcome.report_path.display());
                })
        }
        Commands::Gen { .. } => Ok(()),
    };

    if let Err(e) = outcome {
        match &e {
            RunError::Config(errors) => {
                eprintln!("{e}\n{}", describe_config_errors(errors));
            }
            _ => {
                tracing::error!(error = %e, "Run failed");
                eprintln!("{e}");
            }
        }
        std::process::exit(e.exit_code());
    }

    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = token.cancelled() => {},
            _ = terminate => {
                tracing::info!("Received SIGTERM signal, interrupting run");
            },
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C signal, interrupting run");
            },
        }

        token.cancel();
    });
}
