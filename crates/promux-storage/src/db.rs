use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};

use crate::entities;

pub async fn connect(dsn: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(dsn).await
}

/// Idempotent entity-first schema sync for the machine database.
pub async fn init_machine_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    create_table(db, entities::machines::Entity).await
}

/// Idempotent entity-first schema sync for the observability database.
pub async fn init_observability_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    create_table(db, entities::request_details::Entity).await?;
    create_table(db, entities::usage_records::Entity).await
}

async fn create_table<E>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr>
where
    E: sea_orm::EntityTrait,
{
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}
