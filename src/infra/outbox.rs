//! Transactional outbox: events are written in the same database
//! transaction as the state change that produced them, then relayed to the
//! broker (or straight to the in-process dispatch hub) by a background task.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use lapin::Channel;
use serde::Serialize;

use crate::{
    domain::OutboxStatus,
    infra::{app_state::AppState, rmq},
    models::{CreateOutboxEntity, OutboxEntity},
    schema::outbox,
};

pub async fn publish<T: Serialize>(
    conn: &mut AsyncPgConnection,
    event_type: String,
    payload: T,
) -> Result<()> {
    let payload = serde_json::to_string(&payload).context("Failed to serialize outbox payload")?;

    diesel::insert_into(outbox::table)
        .values(CreateOutboxEntity {
            event_type,
            payload,
            status: OutboxStatus::Pending,
        })
        .execute(conn)
        .await
        .context("Failed to insert outbox event")?;

    Ok(())
}

/// Where relayed events go.
#[derive(Clone)]
pub enum RelayTarget {
    /// Publish to the AMQP exchange; every instance's consumer feeds its own hub.
    Broker { channel: Channel, exchange: String },
    /// Single-instance mode: feed the local dispatch hub directly.
    Local,
}

const PURGE_EVERY: Duration = Duration::from_secs(60 * 60);

/// Drains pending outbox rows forever, one batch per poll interval. Sent
/// rows past the retention window are purged about once an hour.
pub async fn run_relay(state: Arc<AppState>, target: RelayTarget) {
    let interval = Duration::from_millis(state.config.outbox.poll_interval_ms);
    let mut last_purge: Option<tokio::time::Instant> = None;
    loop {
        match relay_batch(&state, &target).await {
            Ok(0) => {}
            Ok(sent) => tracing::debug!("Relayed {} outbox events", sent),
            Err(err) => tracing::warn!("Outbox relay failed: {:?}", err),
        }

        if last_purge.is_none_or(|at| at.elapsed() >= PURGE_EVERY) {
            let cutoff = retention_cutoff(Utc::now(), state.config.outbox.retention_days);
            match purge_sent(&state, cutoff).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!("Purged {} sent outbox events", purged),
                Err(err) => tracing::warn!("Outbox purge failed: {:?}", err),
            }
            last_purge = Some(tokio::time::Instant::now());
        }

        tokio::time::sleep(interval).await;
    }
}

pub fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - chrono::Duration::days(i64::from(retention_days))
}

/// Deletes sent rows last touched before `cutoff`. Pending rows are never removed.
async fn purge_sent(state: &AppState, cutoff: DateTime<Utc>) -> Result<usize> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    diesel::delete(
        outbox::table
            .filter(outbox::status.eq(OutboxStatus::Sent))
            .filter(outbox::updated_at.lt(cutoff)),
    )
    .execute(conn)
    .await
    .context("Failed to purge sent outbox events")
}

async fn relay_batch(state: &AppState, target: &RelayTarget) -> Result<usize> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let pending: Vec<OutboxEntity> = outbox::table
        .filter(outbox::status.eq(OutboxStatus::Pending))
        .order_by(outbox::id.asc())
        .limit(state.config.outbox.batch_size)
        .select(OutboxEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to load pending outbox events")?;

    let mut sent = 0;
    for event in pending {
        match target {
            RelayTarget::Broker { channel, exchange } => {
                rmq::publish(channel, exchange, &event.event_type, event.payload.as_bytes())
                    .await
                    .with_context(|| format!("Failed to publish outbox event #{}", event.id))?;
            }
            RelayTarget::Local => {
                if let Err(err) = state
                    .dispatch
                    .forward(&event.event_type, event.payload.as_bytes())
                {
                    // A payload that cannot be decoded will never succeed; drop it.
                    tracing::warn!("Dropping undeliverable outbox event #{}: {:?}", event.id, err);
                }
            }
        }

        diesel::update(outbox::table.find(event.id))
            .set(outbox::status.eq(OutboxStatus::Sent))
            .execute(conn)
            .await
            .context("Failed to mark outbox event as sent")?;
        sent += 1;
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn cutoff_is_retention_days_before_now() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(
            retention_cutoff(now, 7),
            Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap()
        );
        assert_eq!(retention_cutoff(now, 0), now);
    }
}
