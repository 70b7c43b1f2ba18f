use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use lending_core::*;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "lendctl")]
#[command(about = "Book inventory and lending ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Snapshot file to use instead of <data_dir>/<file_name>
    #[arg(long, global = true, env = "LENDING_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/lending/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Indent JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Log more to stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Report liveness and counts
    Health,

    /// Manage the book catalog
    #[command(subcommand)]
    Books(BookCommands),

    /// Lend and return copies
    #[command(subcommand)]
    Loans(LoanCommands),

    /// Write books.csv and loans.csv
    Export {
        /// Destination directory
        #[arg(long)]
        out: PathBuf,
    },

    /// Write the effective configuration to the config file
    InitConfig {
        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum BookCommands {
    /// List books, newest first
    List {
        /// Case-insensitive match on title, author, or category
        #[arg(long)]
        search: Option<String>,
    },

    /// Show one book
    Show { id: BookId },

    /// Add a title to the catalog
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        category: Option<String>,
        /// Copies owned (defaults to 1)
        #[arg(long, allow_negative_numbers = true)]
        copies: Option<i64>,
    },

    /// Change fields of a book
    Edit {
        id: BookId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Pass an empty string to clear
        #[arg(long)]
        category: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        copies: Option<i64>,
    },

    /// Delete a book without active loans
    Delete { id: BookId },
}

#[derive(Subcommand)]
enum LoanCommands {
    /// List loans, most recent first
    List {
        /// borrowed or returned
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one loan
    Show { id: LoanId },

    /// Lend one copy of a book
    Borrow {
        #[arg(long)]
        book_id: BookId,
        /// Borrower name
        #[arg(long)]
        name: String,
        /// Borrower email
        #[arg(long)]
        email: Option<String>,
        /// Due date (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_due_date)]
        due: Option<DateTime<Utc>>,
    },

    /// Return a borrowed copy
    Return { id: LoanId },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    lending_core::logging::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_caller_facing() {
                tracing::debug!("Request rejected: {}", e);
            } else {
                tracing::error!("Command failed: {}", e);
            }
            eprintln!("error: {}", e);
            ExitCode::from(exit_code(e.kind()))
        }
    }
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidArgument => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Conflict => 4,
        ErrorKind::StorageFailure | ErrorKind::Configuration => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = cli.data_dir {
        config.data.data_dir = dir;
    }

    if let Commands::InitConfig { force } = cli.command {
        let path = cli
            .config
            .or_else(Config::default_config_path)
            .ok_or_else(|| Error::Config("no config directory for this platform".into()))?;
        if path.exists() && !force {
            return Err(Error::Conflict(format!(
                "config file {:?} already exists (use --force to replace it)",
                path
            )));
        }
        config.save_to(&path)?;
        return print_json(&serde_json::json!({ "config": path }), cli.pretty);
    }

    let mode = if cli.command.is_read_only() {
        AccessMode::ReadOnly
    } else {
        AccessMode::ReadWrite
    };
    let store = match cli.db_path {
        Some(path) => JsonFileStore::open(path, mode, config.storage.lock_timeout())?
            .with_pretty(config.storage.pretty),
        None => JsonFileStore::from_config(&config, mode)?,
    };
    let library = Library::open(store)?;
    let pretty = cli.pretty;

    match cli.command {
        Commands::Health => print_json(&library.health(), pretty),
        Commands::Export { out } => {
            print_json(&lending_core::export::export_all(&library, &out)?, pretty)
        }
        Commands::InitConfig { .. } => Ok(()),
        Commands::Books(cmd) => cmd_books(&library, cmd, pretty),
        Commands::Loans(cmd) => cmd_loans(&library, cmd, pretty),
    }
}

impl Commands {
    fn is_read_only(&self) -> bool {
        matches!(
            self,
            Commands::Health
                | Commands::Export { .. }
                | Commands::Books(BookCommands::List { .. } | BookCommands::Show { .. })
                | Commands::Loans(LoanCommands::List { .. } | LoanCommands::Show { .. })
        )
    }
}

fn cmd_books(library: &Library<JsonFileStore>, cmd: BookCommands, pretty: bool) -> Result<()> {
    match cmd {
        BookCommands::List { search } => print_json(&library.list_books(search.as_deref()), pretty),
        BookCommands::Show { id } => print_json(&library.get_book(id)?, pretty),
        BookCommands::Add {
            title,
            author,
            category,
            copies,
        } => {
            let book = library.create_book(NewBook {
                title,
                author,
                category,
                copies_total: copies,
            })?;
            print_json(&book, pretty)
        }
        BookCommands::Edit {
            id,
            title,
            author,
            category,
            copies,
        } => {
            let book = library.update_book(
                id,
                BookUpdate {
                    title,
                    author,
                    category,
                    copies_total: copies,
                },
            )?;
            print_json(&book, pretty)
        }
        BookCommands::Delete { id } => {
            library.delete_book(id)?;
            print_json(&serde_json::json!({ "deleted": id }), pretty)
        }
    }
}

fn cmd_loans(library: &Library<JsonFileStore>, cmd: LoanCommands, pretty: bool) -> Result<()> {
    match cmd {
        LoanCommands::List { status } => {
            let status = status
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(str::parse::<LoanStatus>)
                .transpose()?;
            print_json(&library.list_loans(status), pretty)
        }
        LoanCommands::Show { id } => print_json(&library.get_loan(id)?, pretty),
        LoanCommands::Borrow {
            book_id,
            name,
            email,
            due,
        } => {
            let loan = library.borrow(BorrowRequest {
                book_id,
                borrower_name: name,
                borrower_email: email,
                due_date: due,
            })?;
            print_json(&loan, pretty)
        }
        LoanCommands::Return { id } => print_json(&library.return_loan(id)?, pretty),
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}

fn parse_due_date(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("'{}' is not an RFC 3339 timestamp or YYYY-MM-DD date", s))
}
