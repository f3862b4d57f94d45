use clap::{Parser, Subcommand};
use sea_orm::Database;
use migration::MigratorTrait;

#[derive(Debug, Parser)]
#[command(name = "migration", about = "Manage the bank linking schema")]
struct Args {
    /// Database URL.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:./banklink.db?mode=rwc")]
    database_url: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations (default).
    Up,
    /// Roll back the last migration.
    Down,
    /// Drop everything and re-apply all migrations.
    Fresh,
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let db = Database::connect(&args.database_url).await?;

    match args.command.unwrap_or(Command::Up) {
        Command::Up => migration::Migrator::up(&db, None).await?,
        Command::Down => migration::Migrator::down(&db, Some(1)).await?,
        Command::Fresh => migration::Migrator::fresh(&db).await?,
        Command::Status => migration::Migrator::status(&db).await?,
    }

    Ok(())
}
