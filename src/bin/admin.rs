use clap::Parser;
use std::{env::VarError, error::Error};

use files_manager::cleanup;
use files_manager::db;

/// Utility binary to manage the users, sessions and other useful stuff like that.
#[derive(Debug, Parser)]
#[clap(version, author, about)]
struct Opts {
    #[clap(subcommand)]
    cmd: SubCommand,
}

#[derive(Debug, Parser)]
enum SubCommand {
    /// Force a cleanup of expired sessions
    Cleanup {
        /// defaults to DATABASE_URL env variable if not provided
        #[clap(short, long)]
        database_url: Option<String>,
    },
    /// Register a user able to connect with these credentials
    GenUser {
        #[clap(short, long)]
        email: String,

        #[clap(short, long)]
        password: String,

        /// defaults to DATABASE_URL env variable if not provided
        #[clap(short, long)]
        database_url: Option<String>,
    },
    /// Apply pending database migrations
    Migrate {
        /// defaults to DATABASE_URL env variable if not provided
        #[clap(short, long)]
        database_url: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    match Opts::parse().cmd {
        SubCommand::Cleanup { database_url } => cleanup(database_url),
        SubCommand::GenUser {
            email,
            password,
            database_url,
        } => gen_user(database_url, email, password),
        SubCommand::Migrate { database_url } => {
            open(database_url)?;
            Ok(())
        }
    }
}

/// connection with every migration applied
fn open(database_url: Option<String>) -> Result<diesel::SqliteConnection, Box<dyn Error>> {
    let db_url = get_db_url(database_url)?;
    let mut conn = db::connect(&db_url)?;
    db::run_migrations(&mut conn)?;
    Ok(conn)
}

fn cleanup(database_url: Option<String>) -> Result<(), Box<dyn Error>> {
    let mut conn = open(database_url)?;
    let n = cleanup::cleanup_once(&mut conn)?;
    println!("removed {n} expired sessions");
    Ok(())
}

fn gen_user(
    database_url: Option<String>,
    email: String,
    password: String,
) -> Result<(), Box<dyn Error>> {
    let mut conn = open(database_url)?;
    let user = db::gen_user(&mut conn, &email, &password)?;
    println!("created user {} with id {}", user.email, user.id);
    Ok(())
}

fn get_db_url(database_url: Option<String>) -> Result<String, Box<dyn Error>> {
    match database_url {
        Some(x) => Ok(x),
        None => match std::env::var("DATABASE_URL") {
            Ok(x) => Ok(x),
            Err(VarError::NotPresent) => Err("DATABASE_URL env var not found".into()),
            Err(VarError::NotUnicode(_)) => Err("DATABASE_URL env var not valid unicode".into()),
        },
    }
}
