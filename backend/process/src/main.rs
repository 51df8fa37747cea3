use anyhow::Result;
use clap::{Parser, Subcommand};
use server::{config::Config, database::init_pool, query::TimeRange, subject::SubjectId};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recount every like counter from the edge table
    Rebuild,

    /// Most liked wallpapers
    Top {
        #[arg(long, default_value_t = 10)]
        limit: u32,

        /// all, week or month
        #[arg(long, default_value = "all")]
        range: TimeRange,
    },

    /// Site-wide like totals
    Stats,

    /// Audit trail of one wallpaper, newest first
    History {
        subject: String,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let config = Config::load()?;
    let pool = init_pool(&config.database_url, config.max_connections).await?;

    match args.command {
        Command::Rebuild => {
            let report = process::rebuild(&pool).await?;

            println!("Checked: {}", report.checked);
            println!("Corrected: {}", report.corrected);
            println!("Failed: {}", report.failed);
        }
        Command::Top { limit, range } => process::print_top(&pool, limit, range).await?,
        Command::Stats => process::print_stats(&pool).await?,
        Command::History { subject, limit } => {
            let subject = SubjectId::parse(&subject)?;
            process::print_history(&pool, &subject, limit).await?;
        }
    }

    pool.close().await;

    Ok(())
}
