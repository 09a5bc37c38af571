//! Country entity: one tracked subject with its own subreddit feed

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sentiment score assigned to countries that were never scored
pub const NEUTRAL_SCORE: i32 = 5;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "countries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub name: String,

    pub subreddit: String,

    /// When the last fetch cycle for this country finished (success or not)
    pub last_updated: Option<DateTimeUtc>,

    /// Cached number of posts currently owned by this country
    pub post_count: i32,

    /// Aggregate sentiment, 1 (grim) to 10 (euphoric)
    pub emotion_score: i32,
}

impl Model {
    /// Whether the country has ever completed a fetch cycle
    pub fn is_fetched(&self) -> bool {
        self.last_updated.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::post::Entity")]
    Posts,

    #[sea_orm(has_many = "super::user_mood::Entity")]
    UserMoods,
}

impl Related<super::post::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Posts.def()
    }
}

impl Related<super::user_mood::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserMoods.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
