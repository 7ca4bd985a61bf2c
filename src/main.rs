mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use roundtable_core::ids::SessionId;
use roundtable_store::export::{export_session, import_session, SessionExport};
use roundtable_store::messages::MessageRepo;
use roundtable_store::sessions::{SessionRepo, SessionStatus};
use roundtable_store::Database;

#[derive(Parser)]
#[command(name = "roundtable", about = "Multi-model group-chat session store")]
struct Args {
    /// Path to the SQLite database. Defaults to ~/.roundtable/sessions.db.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List sessions, newest first.
    Sessions {
        /// Show archived sessions instead of active ones.
        #[arg(long)]
        archived: bool,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Search message content.
    Search {
        query: String,
        /// Restrict to one session.
        #[arg(long)]
        session: Option<String>,
    },
    /// Export a session as JSON to stdout or a file.
    Export {
        session: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import a previously exported session.
    Import { file: PathBuf },
    /// Archive a session (soft delete).
    Archive { session: String },
    /// Print the default configuration as JSON.
    Config,
}

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(args) {
        tracing::error!(error = %err, "command failed");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Command::Config = args.command {
        let defaults = config::RoundtableConfig::default();
        println!("{}", serde_json::to_string_pretty(&defaults)?);
        return Ok(());
    }

    let db_path = match args.db_path {
        Some(path) => path,
        None => default_db_path()?,
    };
    let db = Database::open(&db_path)?;

    match args.command {
        Command::Sessions { archived, limit } => {
            let status = if archived {
                SessionStatus::Archived
            } else {
                SessionStatus::Active
            };
            let sessions = SessionRepo::new(db).list(Some(&status), limit, 0)?;
            if sessions.is_empty() {
                println!("no {status} sessions");
                return Ok(());
            }
            for session in sessions {
                println!(
                    "{}  {}  {}",
                    session.id,
                    session.updated_at,
                    session.name.as_deref().unwrap_or("(unnamed)")
                );
            }
        }
        Command::Search { query, session } => {
            let session_id = session.map(SessionId::from_raw);
            let hits = MessageRepo::new(db).search(session_id.as_ref(), &query)?;
            for msg in hits {
                let author = msg
                    .author
                    .as_ref()
                    .map(|a| format!(" [{a}]"))
                    .unwrap_or_default();
                println!("{} {}{}: {}", msg.session_id, msg.role, author, msg.content);
            }
        }
        Command::Export { session, out } => {
            let export = export_session(&db, &SessionId::from_raw(session))?;
            let json = serde_json::to_string_pretty(&export)?;
            match out {
                Some(path) => std::fs::write(&path, json)?,
                None => println!("{json}"),
            }
        }
        Command::Import { file } => {
            let json = std::fs::read_to_string(&file)?;
            let export: SessionExport = serde_json::from_str(&json)?;
            let new_id = import_session(&db, &export)?;
            println!("{new_id}");
        }
        Command::Archive { session } => {
            SessionRepo::new(db).archive(&SessionId::from_raw(session))?;
        }
        Command::Config => unreachable!("handled above"),
    }
    Ok(())
}

fn default_db_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let home = std::env::var("HOME").map_err(|_| "HOME is not set; pass --db-path")?;
    Ok(PathBuf::from(home).join(".roundtable").join("sessions.db"))
}
