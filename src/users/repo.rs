use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{User, USER_COLUMNS, USER_SCHEMA};
use crate::{error::AppError, query::{sql, QuerySpec}};

pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub role: &'a str,
    pub photo: Option<&'a str>,
    pub password_hash: &'a str,
}

#[derive(Debug, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub photo: Option<String>,
    pub role: Option<String>,
}

impl User {
    /// Find a user by email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Looks up the owner of a reset digest. Expiry is checked by the caller.
    pub async fn find_by_reset_hash(db: &PgPool, hash: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE password_reset_token = $1"
        ))
        .bind(hash)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new user with hashed password.
    pub async fn create(db: &PgPool, new: NewUser<'_>) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, role, photo, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(new.name)
        .bind(new.email)
        .bind(new.role)
        .bind(new.photo)
        .bind(new.password_hash)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    pub async fn list(db: &PgPool, spec: &QuerySpec) -> Result<Vec<serde_json::Value>, AppError> {
        let mut qb = sql::select_documents(&USER_SCHEMA, spec, None)?;
        let docs = qb.build_query_scalar::<serde_json::Value>().fetch_all(db).await?;
        Ok(docs)
    }

    pub async fn update(db: &PgPool, id: Uuid, changes: UserChanges) -> Result<Option<User>, AppError> {
        let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new("UPDATE users SET ");
        let mut set = qb.separated(", ");
        let mut touched = false;
        for (column, value) in [
            ("name", changes.name),
            ("email", changes.email),
            ("photo", changes.photo),
            ("role", changes.role),
        ] {
            if let Some(value) = value {
                set.push(format!("{column} = "));
                set.push_bind_unseparated(value);
                touched = true;
            }
        }
        if !touched {
            return User::find_by_id(db, id).await;
        }
        qb.push(" WHERE id = ");
        qb.push_bind(id);
        qb.push(format!(" RETURNING {USER_COLUMNS}"));

        let user = qb.build_query_as::<User>().fetch_optional(db).await?;
        Ok(user)
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn set_reset_token(
        db: &PgPool,
        id: Uuid,
        hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET password_reset_token = $2, password_reset_expires = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(hash)
        .bind(expires_at)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn clear_reset_token(db: &PgPool, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET password_reset_token = NULL, password_reset_expires = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Redeems a reset digest. The new hash lands only while the digest is
    /// still stored and unexpired, and the same statement clears it, so a
    /// token works once even under concurrent requests.
    pub async fn redeem_reset_token(
        db: &PgPool,
        reset_hash: &str,
        password_hash: &str,
        changed_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&redeem_reset_sql())
            .bind(reset_hash)
            .bind(password_hash)
            .bind(changed_at)
            .bind(now)
            .fetch_optional(db)
            .await?;
        Ok(user)
    }

    /// Sets a new hash, stamps the change time and drops any pending reset,
    /// all in one statement.
    pub async fn update_password(
        db: &PgPool,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET password_hash = $2,
                   password_changed_at = $3,
                   password_reset_token = NULL,
                   password_reset_expires = NULL
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .fetch_one(db)
        .await?;
        Ok(user)
    }
}

fn redeem_reset_sql() -> String {
    format!(
        "UPDATE users \
            SET password_hash = $2, password_changed_at = $3, \
                password_reset_token = NULL, password_reset_expires = NULL \
          WHERE password_reset_token = $1 AND password_reset_expires > $4 \
         RETURNING {USER_COLUMNS}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeem_is_guarded_by_digest_and_expiry() {
        let sql = redeem_reset_sql();
        assert!(sql.contains("WHERE password_reset_token = $1 AND password_reset_expires > $4"));
        assert!(sql.contains("password_reset_token = NULL, password_reset_expires = NULL"));
        assert!(!sql.contains("WHERE id"));
    }
}
