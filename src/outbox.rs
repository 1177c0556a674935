use crate::db;
use crate::notify::{Notification, Notifier};
use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Deliver the earliest due notification. Returns false when nothing was due.
#[instrument(skip_all)]
pub async fn process_next_task(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    max_backoff_secs: i64,
    now: i64,
) -> Result<bool> {
    let Some(task) = db::next_due_notification(pool, now).await? else {
        return Ok(false);
    };

    let notification: Notification = match serde_json::from_str(&task.payload) {
        Ok(n) => n,
        Err(err) => {
            warn!(?err, id = task.id, kind = %task.kind, "undecodable outbox payload; dropping");
            db::delete_outbox(pool, task.id).await?;
            return Ok(true);
        }
    };

    let chat = match db::find_chat_for_user(pool, task.user_id).await? {
        Some(chat) => chat,
        None => {
            debug!(id = task.id, user_id = task.user_id, "no linked chat; dropping");
            db::delete_outbox(pool, task.id).await?;
            return Ok(true);
        }
    };
    if !chat.settings().allows(notification.topic()) {
        debug!(id = task.id, chat_id = chat.chat_id, kind = %task.kind, "muted; dropping");
        db::delete_outbox(pool, task.id).await?;
        return Ok(true);
    }

    match notifier.send(chat.chat_id, &notification.render()).await {
        Ok(()) => {
            db::delete_outbox(pool, task.id).await?;
            info!(id = task.id, kind = %task.kind, chat_id = chat.chat_id, "notification delivered");
        }
        Err(err) => {
            warn!(
                ?err,
                id = task.id,
                kind = %task.kind,
                attempt = task.attempt,
                "notification failed; backoff"
            );
            db::backoff_outbox_with_cap(pool, task.id, task.attempt, max_backoff_secs, now).await?;
        }
    }
    Ok(true)
}

/// Drain the outbox forever, sleeping `poll` whenever it is empty.
pub async fn run_worker<N>(pool: SqlitePool, notifier: N, poll: Duration, max_backoff_secs: i64)
where
    N: Notifier,
{
    info!(poll_ms = poll.as_millis() as u64, "notification worker started");
    loop {
        match process_next_task(&pool, &notifier, max_backoff_secs, Utc::now().timestamp()).await
        {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(poll).await,
            Err(err) => {
                error!(?err, "outbox worker error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
