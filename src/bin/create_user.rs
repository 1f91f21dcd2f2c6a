use std::io::{self, Write};
use std::sync::Arc;

use clap::Parser;
use rocket_db_pools::sqlx::postgres::PgPoolOptions;

use chirpy_api::auth::authority::normalize_email;
use chirpy_api::auth::{AuthConfig, AuthError, PgSessionRepository, SessionAuthority, StoreError};

/// Reads the same `CHIRPY_*` variables as the server, so stored digests use
/// the server's Argon2 cost parameters.
#[derive(Parser, Debug)]
#[command(name = "create_user", about = "Register a Chirpy login credential")]
struct Args {
    /// Email address for the account (case insensitive).
    #[arg(long)]
    email: String,

    /// Plaintext password to hash and store for this account.
    #[arg(long)]
    password: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let email = normalize_email(&args.email);

    if !email.contains('@') {
        writeln!(io::stderr(), "error: email must contain '@'")?;
        std::process::exit(1);
    }
    if args.password.is_empty() {
        writeln!(io::stderr(), "error: password must not be empty")?;
        std::process::exit(1);
    }

    let config = AuthConfig::from_env()?;

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;
    chirpy_api::db::run_migrations(&pool).await?;

    let authority =
        SessionAuthority::from_config(&config, Arc::new(PgSessionRepository::new(pool)))?;

    match authority.register_credential(&email, &args.password).await {
        Ok(identity) => {
            println!("Created credential '{email}' with identity {identity}");
            Ok(())
        }
        Err(AuthError::Persistence(StoreError::Conflict(_))) => {
            writeln!(
                io::stderr(),
                "error: a credential for '{email}' already exists."
            )?;
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}
