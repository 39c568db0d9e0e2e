//! Server-side session records.
//!
//! The table is created with the schema but login state currently lives in the
//! cookie-backed session layer, so no code path reads or writes these rows.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub token: String,

    /// Weak reference to `users.id`; deleting a user does not cascade.
    pub user_id: i32,

    pub created_at: String,

    pub expires_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
