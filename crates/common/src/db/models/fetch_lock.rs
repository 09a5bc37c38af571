//! Fetch lock entity: the single row that serializes fetch cycles

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Primary key of the only row in `fetch_lock`
pub const LOCK_ROW_ID: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fetch_lock")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,

    pub busy: bool,

    /// Unix millis of the last false -> true transition of `busy`
    pub last_started_at_ms: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
