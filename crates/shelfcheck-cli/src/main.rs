mod adapters;
mod probe;
mod shutdown;
mod watch;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use probe::ProbeCommands;

#[derive(Debug, Parser)]
#[command(name = "shelfcheck-cli")]
#[command(about = "Storefront availability prober")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Probe storefront availability
    Probe {
        #[command(subcommand)]
        command: ProbeCommands,
    },
    /// List the configured storefront registry
    Storefronts,
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check that the database is reachable
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("shelfcheck-cli: no command given (try --help)");
        return Ok(());
    };

    let config = shelfcheck_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match command {
        Commands::Storefronts => {
            let registry = shelfcheck_core::load_storefronts(&config.storefronts_path)?;
            for line in storefront_lines(&registry.storefronts) {
                println!("{line}");
            }
        }
        Commands::Db { command } => {
            let pool = connect(&config).await?;
            match command {
                DbCommands::Ping => {
                    shelfcheck_db::health_check(&pool).await?;
                    println!("database reachable");
                }
                DbCommands::Migrate => {
                    let applied = shelfcheck_db::run_migrations(&pool).await?;
                    println!("applied {applied} migration(s)");
                }
            }
        }
        Commands::Probe { command } => probe::run(command, &config).await?,
    }

    Ok(())
}

pub(crate) async fn connect(config: &shelfcheck_core::AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool_config = shelfcheck_db::PoolConfig::from_app_config(config);
    let pool = shelfcheck_db::connect_pool(&config.database_url, pool_config).await?;
    Ok(pool)
}

fn storefront_lines(storefronts: &[shelfcheck_core::Storefront]) -> Vec<String> {
    storefronts
        .iter()
        .map(|s| {
            let channels: Vec<&str> = s.sales_channels.iter().map(|c| c.id.as_str()).collect();
            format!(
                "{:<24} {:<8} mode={:<8} rule={:<9} channels=[{}] {}",
                s.slug,
                if s.enabled { "enabled" } else { "disabled" },
                s.fulfillment_mode.to_string(),
                s.availability_rule.to_string(),
                channels.join(","),
                s.base_url
            )
        })
        .collect()
}
