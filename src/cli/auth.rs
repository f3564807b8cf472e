//! Authentication CLI command handlers

use chrono::Utc;

use crate::api::auth::{LoginRequest, ProfileUpdate, RegisterRequest};
use crate::cli::commands::AuthCommand;
use crate::cli::prompt_secret;
use crate::core::context::AppContext;
use crate::core::session::{AuthPhase, Principal};
use crate::core::token_manager::TokenManager;
use crate::error::{Result, VoxtaskError};

/// Handle authentication commands
pub async fn handle_auth(ctx: &AppContext, command: AuthCommand) -> Result<()> {
    match command {
        AuthCommand::Login { email, password } => handle_login(ctx, email, password).await,
        AuthCommand::Register {
            username,
            email,
            password,
        } => handle_register(ctx, username, email, password).await,
        AuthCommand::Logout => handle_logout(ctx),
        AuthCommand::Status => handle_status(ctx).await,
        AuthCommand::Refresh => handle_refresh(ctx).await,
        AuthCommand::Profile {
            username,
            email,
            password,
        } => handle_profile(ctx, username, email, password).await,
    }
}

async fn handle_login(ctx: &AppContext, email: String, password: Option<String>) -> Result<()> {
    if ctx.session.restore().await == AuthPhase::Authenticated {
        println!("✓ Already signed in as {}.", display_name(ctx.session.principal()));
        println!();
        println!("  To switch accounts, first run: voxtask auth logout");
        return Ok(());
    }

    let password = match password {
        Some(password) => password,
        None => prompt_secret("Password: ")?,
    };
    if password.is_empty() {
        return Err(VoxtaskError::InvalidInput("No password provided".to_string()));
    }

    let (token, user) = ctx.auth.login(&LoginRequest { email, password }).await?;
    ctx.session.login(&token, user)?;

    println!("✓ Signed in as {}.", display_name(ctx.session.principal()));
    Ok(())
}

async fn handle_register(
    ctx: &AppContext,
    username: String,
    email: String,
    password: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => {
            let first = prompt_secret("Choose a password: ")?;
            let second = prompt_secret("Repeat the password: ")?;
            if first != second {
                return Err(VoxtaskError::InvalidInput("Passwords do not match".to_string()));
            }
            first
        }
    };

    let (token, user) = ctx
        .auth
        .register(&RegisterRequest {
            username,
            email,
            password,
        })
        .await?;
    ctx.session.login(&token, user)?;

    println!("✓ Account created. Signed in as {}.", display_name(ctx.session.principal()));
    Ok(())
}

fn handle_logout(ctx: &AppContext) -> Result<()> {
    ctx.session.logout()?;
    println!("✓ Signed out. Stored session removed.");
    Ok(())
}

async fn handle_status(ctx: &AppContext) -> Result<()> {
    let phase = ctx.session.restore().await;
    let session = ctx.session.snapshot();

    println!("Backend: {}", ctx.config.api_base_url);
    match (phase, session.credential, session.principal) {
        (AuthPhase::Authenticated, Some(credential), Some(user)) => {
            println!("Status:  ✓ signed in as {}", display_name(Some(user)));
            println!("Token:   {}", credential.masked());
            if let Some(expiry) = credential.expires_at() {
                let remaining = TokenManager::time_until_expiry(expiry, Utc::now());
                println!(
                    "Expires: {} (in {} min)",
                    expiry.format("%Y-%m-%d %H:%M:%S UTC"),
                    remaining.num_minutes()
                );
            }
        }
        _ => {
            println!("Status:  not signed in");
            println!();
            println!("  Run 'voxtask auth login --email <EMAIL>' to sign in.");
        }
    }
    Ok(())
}

async fn handle_refresh(ctx: &AppContext) -> Result<()> {
    require_session(ctx).await?;
    let credential = ctx.session.refresh().await?;

    match credential.expires_at() {
        Some(expiry) => println!(
            "✓ Session refreshed. Valid until {}.",
            expiry.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("✓ Session refreshed."),
    }
    Ok(())
}

async fn handle_profile(
    ctx: &AppContext,
    username: Option<String>,
    email: Option<String>,
    change_password: bool,
) -> Result<()> {
    require_session(ctx).await?;

    if username.is_none() && email.is_none() && !change_password {
        let user = ctx.auth.profile().await?;
        print_profile(&user);
        return Ok(());
    }

    let (current_password, new_password) = if change_password {
        let current = prompt_secret("Current password: ")?;
        let new = prompt_secret("New password: ")?;
        (Some(current), Some(new))
    } else {
        (None, None)
    };

    let change = ctx
        .auth
        .update_profile(&ProfileUpdate {
            username,
            email,
            new_password,
            current_password,
        })
        .await?;
    ctx.session
        .update_session(change.token.as_deref(), change.user)?;

    println!("✓ Profile updated.");
    if let Some(user) = ctx.session.principal() {
        print_profile(&user);
    }
    Ok(())
}

/// Restore the persisted session or fail with a hint to sign in
pub(crate) async fn require_session(ctx: &AppContext) -> Result<()> {
    match ctx.session.restore().await {
        AuthPhase::Authenticated => Ok(()),
        _ => Err(VoxtaskError::NotAuthenticated),
    }
}

fn print_profile(user: &Principal) {
    println!("Id:       {}", user.id);
    println!("Username: {}", user.username.as_deref().unwrap_or("-"));
    println!("Email:    {}", user.email.as_deref().unwrap_or("-"));
}

fn display_name(user: Option<Principal>) -> String {
    match user {
        Some(Principal {
            username: Some(name),
            ..
        }) => name,
        Some(Principal { email: Some(email), .. }) => email,
        Some(user) => user.id,
        None => "unknown user".to_string(),
    }
}

