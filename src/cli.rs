//! Command line entry points. With no subcommand the HTTP server starts.

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::{app, auth::services, config::AppConfig, db, state::AppState};

#[derive(Parser, Debug)]
#[command(name = "recipebox")]
#[command(author, version, about = "Recipe management API", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API (default)
    Serve,

    /// Create a staff superuser account
    CreateSuperuser {
        #[arg(long, env = "SUPERUSER_EMAIL")]
        email: String,
        #[arg(long, env = "SUPERUSER_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Block until Postgres accepts connections, then exit
    WaitForDb {
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: String,
        #[arg(long, env = "DB_WAIT_ATTEMPTS", default_value = "30")]
        attempts: u32,
        #[arg(long, env = "DB_WAIT_INTERVAL_SECS", default_value = "1")]
        interval_secs: u64,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command.unwrap_or(Command::Serve) {
            Command::Serve => {
                let state = AppState::init(AppConfig::from_env()?).await?;
                app::serve(app::build_app(state)).await
            }
            Command::CreateSuperuser { email, password } => {
                let state = AppState::init(AppConfig::from_env()?).await?;
                let user = services::promote_to_superuser(state.store.as_ref(), &email, &password)
                    .await
                    .context("create superuser")?;
                info!(user_id = %user.id, email = %user.email, "superuser created");
                Ok(())
            }
            Command::WaitForDb {
                database_url,
                attempts,
                interval_secs,
            } => {
                db::wait_for_db(&database_url, attempts, Duration::from_secs(interval_secs)).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["recipebox"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn create_superuser_takes_flags() {
        let cli = Cli::try_parse_from([
            "recipebox",
            "create-superuser",
            "--email",
            "admin@example.com",
            "--password",
            "secret",
        ])
        .unwrap();
        match cli.command {
            Some(Command::CreateSuperuser { email, password }) => {
                assert_eq!(email, "admin@example.com");
                assert_eq!(password, "secret");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
