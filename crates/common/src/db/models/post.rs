//! Post entity: one subreddit submission owned by a country

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "posts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub country_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    pub permalink: String,

    pub score: i32,

    pub num_comments: i32,

    pub author: String,

    /// Creation time reported by the source
    pub created_utc: DateTimeUtc,

    /// Source-side identifier, unique across every country
    #[sea_orm(unique)]
    pub reddit_id: String,

    pub fetched_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::country::Entity",
        from = "Column::CountryId",
        to = "super::country::Column::Id",
        on_delete = "Cascade"
    )]
    Country,
}

impl Related<super::country::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Country.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
