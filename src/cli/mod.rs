//! Command-line interface for Turnstile.

pub mod commands;

use clap::{Parser, Subcommand};

/// Turnstile - session login and role-based access control
#[derive(Parser)]
#[command(name = "turnstile")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the web server (default)
    #[command(alias = "web")]
    Serve,

    /// Create default config file
    #[command(alias = "--init")]
    Init,

    /// Manage user accounts
    #[command(alias = "user")]
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// List all users
    #[command(alias = "ls")]
    List,

    /// Create a user
    Add {
        username: String,
        email: String,
        #[arg(long)]
        password: String,
        /// user, manager or admin
        #[arg(long, default_value = "user")]
        role: String,
    },

    /// Delete a user
    #[command(alias = "rm")]
    Remove { username: String },

    /// Set a new password
    Passwd {
        username: String,
        #[arg(long)]
        password: String,
    },

    /// Change a user's role
    Role { username: String, role: String },

    /// Allow a user to log in again
    Enable { username: String },

    /// Block a user from logging in without deleting them
    Disable { username: String },
}
