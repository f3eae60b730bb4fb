use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use ops_import::config::{DatePolicy, ImportConfig};
use ops_import::error::ImportError;
use ops_import::import::orchestrator::{self, ImportOrchestrator};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Parser, Debug)]
#[command(
    name = "ops-import",
    about = "Import a legacy operations export into PostgreSQL"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse, map, and load a document into the database
    Run {
        /// Path to the export document
        file: PathBuf,

        /// JSON plan file overriding the built-in entity plan
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Rows per upsert batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Abort on the first unparseable date instead of nulling it
        #[arg(long)]
        strict_dates: bool,

        /// Apply schema migrations before importing
        #[arg(long)]
        migrate: bool,
    },
    /// Parse and map a document without writing to the database
    Inspect {
        /// Path to the export document
        file: PathBuf,

        /// JSON plan file overriding the built-in entity plan
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Abort on the first unparseable date instead of nulling it
        #[arg(long)]
        strict_dates: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let code = match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err}");
            1
        }
    };
    process::exit(code);
}

async fn execute(cli: Cli) -> Result<i32, ImportError> {
    match cli.command {
        Commands::Run {
            file,
            plan,
            batch_size,
            strict_dates,
            migrate,
        } => {
            let config = load_config(plan.as_deref(), batch_size, strict_dates)?;
            let document = read_document(&file)?;

            let database_url =
                std::env::var("DATABASE_URL").map_err(|_| ImportError::MissingDatabaseUrl)?;
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await?;

            if migrate {
                MIGRATOR.run(&pool).await?;
                log::info!("schema migrations applied");
            }

            let report = ImportOrchestrator::new(&config, &pool).run(&document).await?;
            println!("{report}");

            Ok(if report.failed_batches() > 0 { 2 } else { 0 })
        }
        Commands::Inspect {
            file,
            plan,
            strict_dates,
        } => {
            let config = load_config(plan.as_deref(), None, strict_dates)?;
            let document = read_document(&file)?;

            let report = orchestrator::inspect(&config, &document)?;
            println!("{report}");
            Ok(0)
        }
    }
}

fn load_config(
    plan: Option<&Path>,
    batch_size: Option<usize>,
    strict_dates: bool,
) -> Result<ImportConfig, ImportError> {
    let mut config = match plan {
        Some(path) => ImportConfig::from_json_file(path)?,
        None => ImportConfig::default_plan(),
    };
    if let Some(size) = batch_size {
        config.batch_size = size;
    }
    if strict_dates {
        config.date_policy = DatePolicy::Strict;
    }
    config.validated()
}

fn read_document(path: &Path) -> Result<String, ImportError> {
    std::fs::read_to_string(path).map_err(|source| ImportError::DocumentRead {
        path: path.to_path_buf(),
        source,
    })
}
