//! Administrative command handlers.
//!
//! Librarian accounts are only created from the command line; the HTTP
//! surface has no way to add one.

#![allow(
    clippy::print_stdout,
    reason = "intentional user output for CLI commands"
)]

use anyhow::{Context, Result, anyhow};
use argon2::{Algorithm, Argon2, ParamsBuilder, Version};
use super::cli::{AppConfig, Commands, CreateLibrarianArgs};
use crate::{
    credentials::hash_password,
    db::{establish_connection, identity, run_migrations},
    models::NewLibrarian,
};

/// Execute an administrative command.
///
/// # Errors
///
/// Propagates missing arguments and database failures.
pub async fn run_command(command: Commands, cfg: &AppConfig) -> Result<()> {
    match command {
        Commands::CreateLibrarian(args) => run_create_librarian(args, cfg).await,
    }
}

/// Build an Argon2 instance using the supplied configuration parameters.
///
/// # Errors
///
/// Returns any error emitted while constructing the Argon2 parameter set.
pub fn argon2_from_config(cfg: &AppConfig) -> Result<Argon2<'static>> {
    let params = ParamsBuilder::new()
        .m_cost(cfg.argon2_m_cost)
        .t_cost(cfg.argon2_t_cost)
        .p_cost(cfg.argon2_p_cost)
        .build()
        .with_context(|| {
            format!(
                "invalid Argon2 params derived from config: m_cost={}, t_cost={}, p_cost={}",
                cfg.argon2_m_cost, cfg.argon2_t_cost, cfg.argon2_p_cost
            )
        })?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

async fn run_create_librarian(args: CreateLibrarianArgs, cfg: &AppConfig) -> Result<()> {
    let username = args.username.ok_or_else(|| anyhow!("missing username"))?;
    let password = args.password.ok_or_else(|| anyhow!("missing password"))?;
    let email = args.email.ok_or_else(|| anyhow!("missing email"))?;

    let argon2 = argon2_from_config(cfg)?;
    let hashed = hash_password(&argon2, &password)?;
    let mut conn = establish_connection(&cfg.database).await?;
    run_migrations(&mut conn).await?;
    identity::create_librarian(
        &mut conn,
        &NewLibrarian {
            username: &username,
            password: &hashed,
            email: &email,
        },
    )
    .await
    .with_context(|| format!("failed to create librarian '{username}'"))?;
    println!("Librarian {username} created");
    Ok(())
}
