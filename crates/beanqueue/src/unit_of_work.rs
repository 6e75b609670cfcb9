//! A transaction wrapper that dedupes outgoing channel notifications.
//!
//! Producers and the dispatch/worker services all write through a
//! `UnitOfWork` rather than a bare `sqlx::Transaction`. Any number of calls to
//! [`UnitOfWork::notify`] for the same channel within one unit of work result
//! in exactly one `NOTIFY` being sent, immediately before commit.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::notify;

pub struct UnitOfWork<'c> {
    tx: Transaction<'c, Postgres>,
    pending_notifications: HashSet<String>,
}

impl<'c> UnitOfWork<'c> {
    /// Start a new unit of work backed by a fresh top-level transaction.
    pub async fn begin(pool: &PgPool) -> Result<UnitOfWork<'static>, sqlx::Error> {
        let tx = pool.begin().await?;
        Ok(UnitOfWork {
            tx,
            pending_notifications: HashSet::new(),
        })
    }

    /// Open a savepoint within this unit of work's transaction.
    ///
    /// Rolling the returned transaction back undoes only writes made within
    /// it, leaving the outer unit of work free to still commit its own
    /// bookkeeping writes.
    pub async fn begin_nested(&mut self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        use sqlx::Acquire;
        self.tx.begin().await
    }

    /// Mark `channel` to be notified when this unit of work commits.
    ///
    /// Safe to call repeatedly for the same channel within one unit of work:
    /// only one `NOTIFY` is ever emitted per distinct channel.
    pub fn notify(&mut self, channel: impl Into<String>) {
        self.pending_notifications.insert(channel.into());
    }

    /// Flush the pending notifications and commit the underlying transaction.
    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        for channel in self.pending_notifications.drain() {
            notify::notify(&mut *self.tx, &channel).await?;
        }

        self.tx.commit().await
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}

impl<'c> Deref for UnitOfWork<'c> {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

impl<'c> DerefMut for UnitOfWork<'c> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tx
    }
}
