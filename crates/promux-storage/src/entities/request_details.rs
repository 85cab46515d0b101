use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_details")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub trace_id: String,
    pub machine_id: String,
    pub provider: String,
    pub model: String,
    pub connection_id: Option<String>,
    pub source_format: String,
    pub target_format: String,
    pub streaming: bool,
    pub status: i32,
    pub started_at: TimeDateTimeWithTimeZone,
    pub ttft_ms: Option<i64>,
    pub duration_ms: Option<i64>,
    pub content_len: i64,
    pub thinking_len: i64,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub usage_estimated: bool,
    pub error: Option<String>,
    pub detail: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
