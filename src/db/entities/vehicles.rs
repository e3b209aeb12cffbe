use crate::db::types::Attachments;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "vehicles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub serie: String,
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub color: String,
    #[sea_orm(unique)]
    pub plates: String,
    pub owner_user_id: i64,
    #[sea_orm(column_type = "Json")]
    pub photos: Attachments,
    pub policy_number: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
