use crate::models::{FlagModel, Owner, ResultUpdate, StatusCount};
use crate::types::{Flag, FlagStatus};

#[derive(Clone)]
pub struct Db {
    conn: sqlx::Pool<sqlx::Sqlite>,
}

impl Db {
    pub fn wrap(conn: sqlx::Pool<sqlx::Sqlite>) -> Self {
        Self { conn }
    }

    /// Creates the table if it is missing, a NOP otherwise
    pub async fn init_schema(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flags (
                value TEXT PRIMARY KEY,
                sploit TEXT NOT NULL,
                team TEXT NOT NULL,
                discovered_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                checksystem_response TEXT,
                sent_cycle INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.conn)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS flags_status_time ON flags (status, discovered_at)")
            .execute(&self.conn)
            .await?;

        Ok(())
    }

    // == ingestion ==

    // ignores conflicts, returns true if the flag was new
    pub async fn add_flag(&self, flag: &Flag) -> Result<bool, DbError> {
        let FlagModel {
            value,
            sploit,
            team,
            discovered_at,
            status,
            checksystem_response,
            sent_cycle,
        } = flag.clone().to_model();

        let res = sqlx::query(
            "INSERT INTO flags (value, sploit, team, discovered_at, status, checksystem_response, sent_cycle) VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT (value) DO NOTHING",
        )
        .bind(value)
        .bind(sploit)
        .bind(team)
        .bind(discovered_at)
        .bind(status)
        .bind(checksystem_response)
        .bind(sent_cycle)
        .execute(&self.conn)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    // == flags ==

    pub async fn flag(&self, value: &str) -> Result<Option<Flag>, DbError> {
        Ok(
            sqlx::query_as::<_, FlagModel>("SELECT * FROM flags WHERE value = ?")
                .bind(value)
                .fetch_optional(&self.conn)
                .await?
                .map(Flag::from_model),
        )
    }

    pub async fn flags_with_status(&self, status: &FlagStatus) -> Result<Vec<Flag>, DbError> {
        Ok(
            sqlx::query_as::<_, FlagModel>("SELECT * FROM flags WHERE status = ?")
                .bind(status.as_str())
                .fetch_all(&self.conn)
                .await?
                .into_iter()
                .map(Flag::from_model)
                .collect(),
        )
    }

    /// Marks every queued flag discovered before `deadline` as skipped, in
    /// one transaction. Returns who the expired flags belonged to.
    pub async fn skip_expired(&self, deadline: i64, reason: &str) -> Result<Vec<Owner>, DbError> {
        let mut tx = self.conn.begin().await?;

        let owners = sqlx::query_as::<_, Owner>(
            r#"
            UPDATE flags
            SET status = ?, checksystem_response = ?
            WHERE status = ? AND discovered_at < ?
            RETURNING sploit, team
            "#,
        )
        .bind(FlagStatus::Skipped.as_str())
        .bind(reason)
        .bind(FlagStatus::Queued.as_str())
        .bind(deadline)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(owners)
    }

    /// Writes back the outcome of a cycle. Either every row is updated or
    /// none is.
    pub async fn persist_results(&self, updates: &[ResultUpdate], cycle: i64) -> Result<(), DbError> {
        let mut tx = self.conn.begin().await?;

        for update in updates {
            sqlx::query(
                r#"
                UPDATE flags
                SET status = ?,
                    checksystem_response = ?,
                    sent_cycle = CASE WHEN ? THEN ? ELSE sent_cycle END
                WHERE value = ?
                "#,
            )
            .bind(&update.status)
            .bind(&update.checksystem_response)
            .bind(update.stamp)
            .bind(cycle)
            .bind(&update.value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    // == aggregates ==

    /// Highest cycle any flag was processed in, 0 on a fresh database
    pub async fn last_cycle(&self) -> Result<i64, DbError> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(sent_cycle), 0) FROM flags")
                .fetch_one(&self.conn)
                .await?,
        )
    }

    pub async fn count_with_status(&self, status: &FlagStatus) -> Result<i64, DbError> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM flags WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(&self.conn)
                .await?,
        )
    }

    /// Counts of every flag that has left the queue
    pub async fn processed_counts(&self) -> Result<Vec<StatusCount>, DbError> {
        Ok(sqlx::query_as::<_, StatusCount>(
            r#"
            SELECT status, sploit, team, COUNT(*) AS count
            FROM flags
            WHERE status != ?
            GROUP BY status, sploit, team
            "#,
        )
        .bind(FlagStatus::Queued.as_str())
        .fetch_all(&self.conn)
        .await?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("sqlx error")]
    Sqlx(#[from] sqlx::Error),
}
