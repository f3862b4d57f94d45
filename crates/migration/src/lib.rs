pub use sea_orm_migration::prelude::*;

mod m20261010_000001_bank_connections;
mod m20261010_000002_bank_accounts;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261010_000001_bank_connections::Migration),
            Box::new(m20261010_000002_bank_accounts::Migration),
        ]
    }
}
