use anyhow::{Context, Result};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};

use crate::entities::tokens::{self, TokenType};

pub struct TokenRepository {
    conn: DatabaseConnection,
}

impl TokenRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// All tokens for a user that are neither expired nor revoked.
    pub async fn find_valid_for_user(&self, user_id: i32) -> Result<Vec<tokens::Model>> {
        let rows = tokens::Entity::find()
            .filter(tokens::Column::UserId.eq(user_id))
            .filter(tokens::Column::Expired.eq(false))
            .filter(tokens::Column::Revoked.eq(false))
            .all(&self.conn)
            .await
            .context("Failed to query valid tokens for user")?;

        Ok(rows)
    }

    /// Lookup by the literal signed token string.
    pub async fn find_by_token(&self, token: &str) -> Result<Option<tokens::Model>> {
        let row = tokens::Entity::find()
            .filter(tokens::Column::Token.eq(token))
            .one(&self.conn)
            .await
            .context("Failed to query token by string")?;

        Ok(row)
    }

    /// Persist a newly issued token as valid.
    pub async fn insert(&self, user_id: i32, token: &str) -> Result<tokens::Model> {
        Self::insert_on(&self.conn, user_id, token).await
    }

    /// Soft-revoke every currently-valid token of a user.
    /// Returns the number of tokens revoked; no-op when none are valid.
    pub async fn revoke_all_for_user(&self, user_id: i32) -> Result<u64> {
        Self::revoke_all_on(&self.conn, user_id).await
    }

    /// Supersede a user's token set: revoke everything currently valid,
    /// then persist the replacement, in one transaction. The revoke
    /// happens-before the insert so no window exists where the old and
    /// new token are both valid after commit.
    pub async fn replace_for_user(&self, user_id: i32, token: &str) -> Result<tokens::Model> {
        let txn = self.conn.begin().await?;

        Self::revoke_all_on(&txn, user_id).await?;
        let saved = Self::insert_on(&txn, user_id, token).await?;

        txn.commit().await?;
        Ok(saved)
    }

    async fn revoke_all_on<C: ConnectionTrait>(conn: &C, user_id: i32) -> Result<u64> {
        let res = tokens::Entity::update_many()
            .col_expr(tokens::Column::Expired, Expr::value(true))
            .col_expr(tokens::Column::Revoked, Expr::value(true))
            .filter(tokens::Column::UserId.eq(user_id))
            .filter(tokens::Column::Expired.eq(false))
            .filter(tokens::Column::Revoked.eq(false))
            .exec(conn)
            .await
            .context("Failed to revoke tokens for user")?;

        Ok(res.rows_affected)
    }

    async fn insert_on<C: ConnectionTrait>(
        conn: &C,
        user_id: i32,
        token: &str,
    ) -> Result<tokens::Model> {
        let active = tokens::ActiveModel {
            user_id: Set(user_id),
            token: Set(token.to_string()),
            token_type: Set(TokenType::Bearer),
            expired: Set(false),
            revoked: Set(false),
            ..Default::default()
        };

        let model = active
            .insert(conn)
            .await
            .context("Failed to insert token")?;

        Ok(model)
    }
}
