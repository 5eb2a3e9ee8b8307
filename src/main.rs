use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use kms::config::{validate_ttl, Cli, Command};
use kms::user_service::DEFAULT_SESSION_TTL_MS;
use kms::{telemetry, InMemoryStorage, KeyManager, PostgresStorage, SecretsConfig, UserService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    telemetry::init(&cli.log_level);

    if let Err(e) = run(cli.command).await {
        error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::GenSecrets => {
            for line in SecretsConfig::generate().to_env_lines() {
                println!("{}", line);
            }
        }

        Command::InitDb { database, secrets } => {
            // refuse to create tables for a deployment that could not start
            KeyManager::new(&secrets.to_secrets_config())?;

            info!("connecting to PostgreSQL");
            let storage = PostgresStorage::connect(&database.database_url, database.max_connections).await?;
            storage.bootstrap().await?;
        }

        Command::SignupToken { username, ttl_ms, secrets } => {
            validate_ttl("SIGNUP_TTL_MS", ttl_ms)?;
            let keys = Arc::new(KeyManager::partial(&secrets.to_secrets_config())?);

            // issuing a grant never touches storage
            let users = UserService::new(Arc::new(InMemoryStorage::new()), keys, DEFAULT_SESSION_TTL_MS);
            println!("{}", users.issue_signup_token(&username, ttl_ms)?);
        }
    }
    Ok(())
}
