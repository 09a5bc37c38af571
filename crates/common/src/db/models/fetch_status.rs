//! Fetch status entity: advisory progress record for pollers

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Primary key of the only row in `fetch_status`
pub const STATUS_ROW_ID: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fetch_status")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,

    pub current_country: String,

    pub current_subreddit: String,

    pub is_fetching: bool,

    pub last_updated: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
