use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Pool, Sqlite};
use std::{env, str::FromStr};

pub type Db = Pool<Sqlite>;

pub async fn connect() -> Result<Db> {
    let url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://studystreak.db".into());
    let opts = SqliteConnectOptions::from_str(&url)?
        .journal_mode(SqliteJournalMode::Wal)
        .create_if_missing(true);
    Ok(Db::connect_with(opts).await?)
}
