pub mod commands;
pub mod config;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthChangeListener, AuthFlow, ListenerHandle};
use crate::backend::{Backend, MemoryBackend};
use crate::catalog::TrainingCatalog;
use crate::config::AppConfig;
use crate::session::{AdminAllowList, SessionStore, SharedSession};

#[derive(Parser)]
#[command(name = "portal")]
#[command(about = "Training portal CLI - sign in, browse trainings and manage registrations")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(long, global = true, help = "Use a local in-process backend persisted in the config directory")]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Sign in, sign up and session status")]
    Auth {
        #[command(subcommand)]
        cmd: commands::auth::AuthCommands,
    },

    #[command(about = "Browse and manage trainings")]
    Trainings {
        #[command(subcommand)]
        cmd: commands::trainings::TrainingCommands,
    },

    #[command(about = "Browse and manage training registrations")]
    Registrations {
        #[command(subcommand)]
        cmd: commands::registrations::RegistrationCommands,
    },

    #[command(about = "Follow realtime changes and keep both lists in sync")]
    Watch(commands::watch::WatchArgs),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Everything a command needs, wired once per invocation
pub struct Context {
    pub config: AppConfig,
    pub backend: Backend,
    pub store: SharedSession,
    pub flow: AuthFlow,
    offline: Option<(Arc<MemoryBackend>, PathBuf)>,
    _listener: ListenerHandle,
}

impl Context {
    pub async fn open(mut config: AppConfig, offline: bool) -> anyhow::Result<Self> {
        let (backend, offline) = if offline {
            let path = config::offline_state_path()?;
            let memory = Arc::new(MemoryBackend::load(&path)?);
            tracing::debug!("Using offline backend at {}", path.display());
            (Backend::memory(memory.clone()), Some((memory, path)))
        } else {
            if config.auth.session_file.is_none() {
                config.auth.session_file = Some(config::session_path()?);
            }
            (Backend::remote(&config)?, None)
        };

        let store = SessionStore::new(AdminAllowList::from_csv(&config.auth.admin_emails)).shared();
        let flow = AuthFlow::new(backend.identity.clone(), store.clone(), &config);
        let restored = flow.initialize().await;
        if let Some(error) = restored.error {
            tracing::warn!("Session restore failed: {}", error);
        }
        let listener = AuthChangeListener::attach(backend.identity.as_ref(), store.clone());

        Ok(Self { config, backend, store, flow, offline, _listener: listener })
    }

    pub fn offline(&self) -> Option<&Arc<MemoryBackend>> {
        self.offline.as_ref().map(|(memory, _)| memory)
    }

    pub fn catalog(&self) -> TrainingCatalog {
        TrainingCatalog::new(self.backend.clone(), self.store.clone(), &self.config)
    }

    /// Write the offline snapshot back; no-op against a remote backend
    pub fn persist(&self) -> anyhow::Result<()> {
        if let Some((memory, path)) = &self.offline {
            memory.save(path)?;
        }
        Ok(())
    }
}

pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let ctx = Context::open(config, cli.offline).await?;

    let result = match cli.command {
        Commands::Auth { cmd } => commands::auth::handle(cmd, &ctx, output_format).await,
        Commands::Trainings { cmd } => commands::trainings::handle(cmd, &ctx, output_format).await,
        Commands::Registrations { cmd } => commands::registrations::handle(cmd, &ctx, output_format).await,
        Commands::Watch(args) => commands::watch::handle(args, &ctx, output_format).await,
    };

    ctx.persist()?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["portal", "trainings", "list", "--json", "--offline"]).unwrap();
        assert!(cli.json);
        assert!(cli.offline);
        assert!(matches!(OutputFormat::from_cli(&cli), OutputFormat::Json));
    }

    #[test]
    fn auth_login_accepts_expected_role() {
        let cli = Cli::try_parse_from(["portal", "auth", "login", "a@x.com", "--password", "pw", "--role", "admin"])
            .unwrap();
        match cli.command {
            Commands::Auth { cmd: commands::auth::AuthCommands::Login { email, role, .. } } => {
                assert_eq!(email, "a@x.com");
                assert_eq!(role, Some(crate::types::Role::Admin));
            }
            _ => panic!("expected auth login"),
        }
    }
}
