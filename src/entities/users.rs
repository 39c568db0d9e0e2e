use sea_orm::entity::prelude::*;

use crate::models::Role;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Case-sensitive and never renamed.
    #[sea_orm(unique)]
    pub username: String,

    pub email: String,

    /// Argon2 PHC string
    pub password_hash: String,

    pub role: Role,

    /// Inactive users cannot log in and lose existing sessions.
    pub active: bool,

    pub created_at: String,

    pub last_login: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
