//! wardenctl - role-governed self-service package installation
//!
//! - `request` runs a free-text request through the full workflow
//! - `roles` prints the resolved role hierarchy
//! - `check` answers whether a role may install a package
//! - `classify` shows how a request would be understood
//! - `history` lists recorded requests and their outcomes

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_executor::PipInstaller;
use warden_guard::PackageValidator;
use warden_intent::IntentClassifier;
use warden_ledger::{AuditLog, InMemoryRequestStore, RequestStore, SqliteRequestStore};
use warden_policy::PermissionResolver;
use warden_types::{RequesterId, ResultKind, RoleId};
use warden_workflow::{StageLimits, WorkflowOrchestrator};

mod config;
mod output;

use config::{ConfigGrantSource, StorageConfig, WardenConfig, DEFAULT_CONFIG_PATH};

/// wardenctl CLI
#[derive(Parser)]
#[command(name = "wardenctl")]
#[command(about = "Warden - role-governed self-service package installation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WARDEN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (overrides the config file; RUST_LOG wins over both)
    #[arg(long, env = "WARDEN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "WARDEN_LOG_JSON")]
    log_json: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run an installation request through the workflow
    Request {
        /// Who the request is made for
        #[arg(long, env = "WARDEN_REQUESTER")]
        requester: String,

        /// Role the requester holds
        #[arg(long, env = "WARDEN_ROLE")]
        role: String,

        /// Free-text request, e.g. "please install pandas"
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// Show the role hierarchy with effective package counts
    Roles,

    /// Check whether a role may install a package
    Check {
        #[arg(long, env = "WARDEN_ROLE")]
        role: String,

        package: String,
    },

    /// Show how a request would be classified
    Classify {
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// List recorded requests, most recent first
    History {
        /// Only requests made for this requester
        #[arg(long)]
        requester: Option<String>,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Include aggregate counts
        #[arg(long)]
        stats: bool,
    },
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_resolver(config_path: &std::path::Path) -> anyhow::Result<Arc<PermissionResolver>> {
    let source = ConfigGrantSource::new(Some(config_path.to_path_buf()));
    let resolver = PermissionResolver::new(Arc::new(source))
        .context("failed to load the role hierarchy")?;
    Ok(Arc::new(resolver))
}

async fn open_store(storage: &StorageConfig) -> anyhow::Result<Arc<dyn RequestStore>> {
    match storage {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory request storage; history is lost on exit");
            Ok(Arc::new(InMemoryRequestStore::new()))
        }
        StorageConfig::Sqlite {
            path,
            max_connections,
        } => {
            let store = SqliteRequestStore::open(path, *max_connections)
                .await
                .with_context(|| format!("failed to open request database {}", path.display()))?;
            tracing::debug!(path = %path.display(), "Opened request database");
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.to_string_lossy().into_owned();
    let config = WardenConfig::load(Some(&config_path))
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level, cli.log_json || config.logging.json);

    match cli.command {
        Commands::Request {
            requester,
            role,
            text,
        } => {
            let store = open_store(&config.storage).await?;
            let orchestrator = WorkflowOrchestrator::new(
                IntentClassifier::from_config(&config.classifier),
                build_resolver(&cli.config)?,
                PackageValidator::new(&config.guard),
                Arc::new(PipInstaller::new(&config.installer)),
                Arc::new(AuditLog::new(store)),
            )
            .with_limits(StageLimits::from_config(&config.installer));

            let result = orchestrator
                .process_request(&RequesterId::new(requester), &RoleId::new(role), &text.join(" "))
                .await;
            let transitions = match &result.request_id {
                Some(id) => orchestrator.audit().journal().for_request(id)?,
                None => Vec::new(),
            };

            if cli.json {
                output::print_json(&serde_json::json!({
                    "result": result,
                    "transitions": transitions,
                }))?;
            } else {
                output::print_result(&result);
                output::print_transitions(&transitions);
            }

            if !matches!(
                result.kind,
                ResultKind::InstallationSuccess | ResultKind::NotInstall
            ) {
                std::process::exit(1);
            }
        }

        Commands::Roles => {
            let hierarchy = build_resolver(&cli.config)?.hierarchy()?;
            if cli.json {
                output::print_json(&hierarchy)?;
            } else {
                output::print_roles(&hierarchy);
            }
        }

        Commands::Check { role, package } => {
            let resolver = build_resolver(&cli.config)?;
            let role = RoleId::new(role);
            if !resolver.knows_role(&role)? {
                anyhow::bail!("unknown role '{}'", role);
            }
            let allowed = resolver.is_allowed(&role, &package)?;

            if cli.json {
                output::print_json(&serde_json::json!({
                    "role": role,
                    "package": package,
                    "allowed": allowed,
                }))?;
            } else if allowed {
                println!("{} may install {}", role, package);
            } else {
                println!("{} may not install {}", role, package);
            }

            if !allowed {
                std::process::exit(1);
            }
        }

        Commands::Classify { text } => {
            let classifier = IntentClassifier::from_config(&config.classifier);
            let intent = classifier.classify(&text.join(" ")).await;
            if cli.json {
                output::print_json(&intent)?;
            } else {
                output::print_intent(&intent);
            }
        }

        Commands::History {
            requester,
            limit,
            stats,
        } => {
            let store = open_store(&config.storage).await?;
            let records = match requester {
                Some(requester) => {
                    store
                        .list_by_requester(&RequesterId::new(requester), limit)
                        .await?
                }
                None => store.list(limit).await?,
            };
            let statistics = if stats {
                Some(store.statistics().await?)
            } else {
                None
            };

            if cli.json {
                output::print_json(&serde_json::json!({
                    "requests": records,
                    "statistics": statistics,
                }))?;
            } else {
                output::print_history(&records);
                if let Some(statistics) = &statistics {
                    output::print_statistics(statistics);
                }
            }
        }
    }

    Ok(())
}
