use crate::db::types::{Attachments, Payments, PolicyStatus, Services};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "policies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub number: String,
    pub holder: String,
    pub phone: Option<String>,
    pub insurer: String,
    pub agent: Option<String>,
    pub issue_date: Option<Date>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub color: Option<String>,
    pub serie: Option<String>,
    pub plates: Option<String>,
    pub status: PolicyStatus,
    pub deletion_reason: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub payments: Payments,
    #[sea_orm(column_type = "Json")]
    pub services: Services,
    #[sea_orm(column_type = "Json")]
    pub files: Attachments,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
