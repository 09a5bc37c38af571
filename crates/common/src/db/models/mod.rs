//! SeaORM entity models
//!
//! Database entities for MoodMap

mod country;
mod post;
mod fetch_lock;
mod fetch_status;
mod user_mood;

pub use country::{
    Entity as CountryEntity,
    Model as Country,
    ActiveModel as CountryActiveModel,
    Column as CountryColumn,
    NEUTRAL_SCORE,
};

pub use post::{
    Entity as PostEntity,
    Model as Post,
    ActiveModel as PostActiveModel,
    Column as PostColumn,
};

pub use fetch_lock::{
    Entity as FetchLockEntity,
    Model as FetchLockRow,
    ActiveModel as FetchLockActiveModel,
    Column as FetchLockColumn,
    LOCK_ROW_ID,
};

pub use fetch_status::{
    Entity as FetchStatusEntity,
    Model as FetchStatusRow,
    ActiveModel as FetchStatusActiveModel,
    Column as FetchStatusColumn,
    STATUS_ROW_ID,
};

pub use user_mood::{
    Entity as UserMoodEntity,
    Model as UserMood,
    ActiveModel as UserMoodActiveModel,
    Column as UserMoodColumn,
};
