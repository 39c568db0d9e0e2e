//! User account commands

use anyhow::Result;

use crate::auth::AuthManager;
use crate::config::Config;
use crate::db::{CreateUserError, Store};
use crate::models::{Role, UserUpdate};

async fn open(config: &Config) -> Result<AuthManager> {
    let store = Store::new(&config.general.database_path).await?;
    let auth = AuthManager::new(store, config.auth.clone(), &config.security);
    auth.initialize().await?;
    Ok(auth)
}

pub async fn cmd_user_list(config: &Config) -> Result<()> {
    let auth = open(config).await?;
    let users = auth.users().list_all().await?;

    println!("Users ({} total)", users.len());
    println!("{:-<70}", "");

    for user in users {
        let status = if user.active { "✓" } else { "✗" };
        println!(
            "{} [{}] {} <{}> role={} last_login={}",
            status, user.id, user.username, user.email, user.role, user.last_login
        );
    }

    let counts = auth.users().count_by_role().await?;
    println!();
    for (role, count) in counts {
        println!("  {role}: {count}");
    }

    Ok(())
}

pub async fn cmd_user_add(
    config: &Config,
    username: &str,
    email: &str,
    password: &str,
    role: &str,
) -> Result<()> {
    let role: Role = role.parse()?;
    let auth = open(config).await?;

    match auth.users().create(username, email, password, role).await {
        Ok(user) => {
            println!("✓ Created {} ({}) with ID {}", user.username, user.role, user.id);
            Ok(())
        }
        Err(CreateUserError::Conflict(_)) => {
            println!("User '{username}' already exists.");
            Ok(())
        }
        Err(CreateUserError::Storage(e)) => Err(e),
    }
}

pub async fn cmd_user_remove(config: &Config, username: &str) -> Result<()> {
    let auth = open(config).await?;

    let Some(user) = auth.get_user(username).await? else {
        println!("User '{username}' not found.");
        return Ok(());
    };

    println!("Delete user '{}' (ID: {})?", user.username, user.id);
    println!("Enter 'y' to confirm, anything else to cancel:");

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    if !input.trim().eq_ignore_ascii_case("y") {
        println!("Cancelled.");
        return Ok(());
    }

    if auth.users().delete(user.id).await? {
        println!("✓ Deleted: {}", user.username);
    } else {
        println!("User was already removed.");
    }

    Ok(())
}

pub async fn cmd_user_passwd(config: &Config, username: &str, password: &str) -> Result<()> {
    update(
        config,
        username,
        UserUpdate {
            password: Some(password.to_string()),
            ..Default::default()
        },
        "password updated",
    )
    .await
}

pub async fn cmd_user_role(config: &Config, username: &str, role: &str) -> Result<()> {
    let role: Role = role.parse()?;
    update(
        config,
        username,
        UserUpdate {
            role: Some(role),
            ..Default::default()
        },
        &format!("role set to {role}"),
    )
    .await
}

pub async fn cmd_user_set_active(config: &Config, username: &str, active: bool) -> Result<()> {
    update(
        config,
        username,
        UserUpdate {
            active: Some(active),
            ..Default::default()
        },
        if active { "enabled" } else { "disabled" },
    )
    .await
}

async fn update(config: &Config, username: &str, changes: UserUpdate, done: &str) -> Result<()> {
    let auth = open(config).await?;

    let Some(user) = auth.get_user(username).await? else {
        println!("User '{username}' not found.");
        return Ok(());
    };

    if auth.users().update(user.id, changes).await? {
        println!("✓ {}: {}", user.username, done);
    } else {
        println!("User '{username}' not found.");
    }

    Ok(())
}
