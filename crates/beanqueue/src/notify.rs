//! The LISTEN/NOTIFY wakeup bridge.
//!
//! Notifications carry no payload that matters: their only job is to wake a
//! worker so it re-queries the database, which remains the source of truth.

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgNotification};

/// A wakeup signal observed on a subscribed channel.
#[derive(Clone, Debug)]
pub enum WakeEvent {
    /// A `NOTIFY` was received on one of the subscribed channels.
    Notification { channel: String },

    /// The notification connection's buffer overflowed and some
    /// notifications may have been dropped. Treat this the same as receiving
    /// a notification on every subscribed channel: re-check everything.
    Lagged,
}

/// A source of wakeup events a worker can poll while idle.
#[async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> Result<WakeEvent, sqlx::Error>;
}

/// Bridges PostgreSQL's `LISTEN`/`NOTIFY` to [`WakeEvent`]s.
pub struct PgEventSource {
    listener: PgListener,
}

impl PgEventSource {
    /// Open a new listener connection and subscribe to `channels`.
    pub async fn connect(
        pool: &sqlx::PgPool,
        channels: &[String],
    ) -> Result<Self, sqlx::Error> {
        let mut listener = PgListener::connect_with(pool).await?;
        let channels: Vec<&str> = channels.iter().map(String::as_str).collect();
        listener.listen_all(channels).await?;

        Ok(Self { listener })
    }

    fn to_event(notification: PgNotification) -> WakeEvent {
        WakeEvent::Notification {
            channel: notification.channel().to_owned(),
        }
    }
}

#[async_trait]
impl EventSource for PgEventSource {
    async fn next(&mut self) -> Result<WakeEvent, sqlx::Error> {
        match self.listener.try_recv().await? {
            Some(notification) => Ok(Self::to_event(notification)),
            None => Ok(WakeEvent::Lagged),
        }
    }
}

/// Emit a `NOTIFY` on `channel` using the given executor.
///
/// Uses `pg_notify()` rather than literal `NOTIFY channel` so that the
/// channel name is a bound parameter instead of something we have to quote
/// as an identifier ourselves.
pub async fn notify<'e, E>(executor: E, channel: &str) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query("SELECT pg_notify($1, '')")
        .bind(channel)
        .execute(executor)
        .await?;

    Ok(())
}
