use anyhow::{Context, Result};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::{domain::NotificationKind, models::CreateNotificationEntity, schema::notifications};

/// Writes an in-app notification. Call inside the same transaction as the
/// state change it reports.
pub async fn notify(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    kind: NotificationKind,
    title: impl Into<String>,
    message: impl Into<String>,
) -> Result<()> {
    diesel::insert_into(notifications::table)
        .values(CreateNotificationEntity {
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
        })
        .execute(conn)
        .await
        .context("Failed to create notification")?;
    Ok(())
}
