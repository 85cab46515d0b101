use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait};
use time::OffsetDateTime;
use tracing::warn;

use promux_common::{MachineData, ProviderConnection};

use crate::entities::machines;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Document store keyed by machine id. The runtime treats the document as
/// the source of truth and writes it back whole; concurrent health writes
/// are last-write-wins by design.
#[derive(Clone)]
pub struct MachineStore {
    db: DatabaseConnection,
}

impl MachineStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn load(&self, machine_id: &str) -> StorageResult<Option<MachineData>> {
        let row = machines::Entity::find_by_id(machine_id.to_string())
            .one(&self.db)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(row.data)?))
    }

    pub async fn save(&self, machine_id: &str, data: &MachineData) -> StorageResult<()> {
        let model = machines::ActiveModel {
            machine_id: Set(machine_id.to_string()),
            data: Set(serde_json::to_value(data)?),
            updated_at: Set(OffsetDateTime::now_utc()),
        };
        machines::Entity::insert(model)
            .on_conflict(
                OnConflict::column(machines::Column::MachineId)
                    .update_columns([machines::Column::Data, machines::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Load-modify-save of one connection. Races between health writers are
    /// acceptable: cooldown drift of one write is bounded and self-corrects.
    pub async fn update_connection<F>(
        &self,
        machine_id: &str,
        connection_id: &str,
        mutate: F,
    ) -> StorageResult<bool>
    where
        F: FnOnce(&mut ProviderConnection),
    {
        let Some(mut data) = self.load(machine_id).await? else {
            warn!(machine_id, "connection update against unknown machine");
            return Ok(false);
        };
        let Some(conn) = data.providers.get_mut(connection_id) else {
            warn!(machine_id, connection_id, "connection update against unknown connection");
            return Ok(false);
        };
        mutate(conn);
        self.save(machine_id, &data).await?;
        Ok(true)
    }
}
