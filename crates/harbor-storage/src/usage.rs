use crate::storage::{now, parse_datetime, parse_enum, parse_uuid, timestamp};
use crate::{Storage, StorageError};
use chrono::{DateTime, Utc};
use harbor_core::{PlanTier, PushSubscription};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

impl Storage {
    // -- usage ----------------------------------------------------------------

    pub async fn record_usage_event(
        &self,
        user_id: Uuid,
        feature: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO usage_events (id, user_id, feature, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(Uuid::new_v4().to_string())
            .bind(user_id.to_string())
            .bind(feature)
            .bind(timestamp(at))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Events in the half-open window `[since, until)`.
    pub async fn count_usage_events(
        &self,
        user_id: Uuid,
        feature: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM usage_events
            WHERE user_id = ?1 AND feature = ?2 AND created_at >= ?3 AND created_at < ?4
            "#,
        )
        .bind(user_id.to_string())
        .bind(feature)
        .bind(timestamp(since))
        .bind(timestamp(until))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("total")? as u64)
    }

    /// Users without a row are on the free tier.
    pub async fn get_user_plan(&self, user_id: Uuid) -> Result<PlanTier, StorageError> {
        let row = sqlx::query("SELECT tier FROM user_plans WHERE user_id = ?1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => parse_enum(&row.try_get::<String, _>("tier")?, "user_plans.tier"),
            None => Ok(PlanTier::default()),
        }
    }

    pub async fn set_user_plan(&self, user_id: Uuid, tier: PlanTier) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO user_plans (user_id, tier, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET tier = excluded.tier, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id.to_string())
        .bind(tier.as_str())
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -- organizations --------------------------------------------------------

    pub async fn increment_seats(&self, organization_id: Uuid) -> Result<u32, StorageError> {
        let row = sqlx::query(
            r#"
            INSERT INTO organizations (id, seats_used, updated_at) VALUES (?1, 1, ?2)
            ON CONFLICT(id) DO UPDATE SET
              seats_used = organizations.seats_used + 1,
              updated_at = excluded.updated_at
            RETURNING seats_used
            "#,
        )
        .bind(organization_id.to_string())
        .bind(now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("seats_used")? as u32)
    }

    /// Decrements seat usage in one statement; the count floors at zero.
    pub async fn decrement_seats(&self, organization_id: Uuid) -> Result<u32, StorageError> {
        sqlx::query(
            r#"
            UPDATE organizations
            SET seats_used = seats_used - 1, updated_at = ?2
            WHERE id = ?1 AND seats_used > 0
            "#,
        )
        .bind(organization_id.to_string())
        .bind(now())
        .execute(&self.pool)
        .await?;

        self.seats_used(organization_id).await
    }

    pub async fn seats_used(&self, organization_id: Uuid) -> Result<u32, StorageError> {
        let row = sqlx::query("SELECT seats_used FROM organizations WHERE id = ?1")
            .bind(organization_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get::<i64, _>("seats_used")? as u32),
            None => Ok(0),
        }
    }

    // -- push subscriptions ---------------------------------------------------

    pub async fn upsert_push_subscription(&self, subscription: &PushSubscription) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO push_subscriptions (
              account_id, subscription_id, resource, expires_at, client_state, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(account_id, subscription_id) DO UPDATE SET
              resource = excluded.resource,
              expires_at = excluded.expires_at,
              client_state = excluded.client_state,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(subscription.account_id.to_string())
        .bind(&subscription.subscription_id)
        .bind(&subscription.resource)
        .bind(timestamp(subscription.expires_at))
        .bind(&subscription.client_state)
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_push_subscriptions(&self, account_id: Uuid) -> Result<Vec<PushSubscription>, StorageError> {
        let rows = sqlx::query("SELECT * FROM push_subscriptions WHERE account_id = ?1")
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_push_subscription).collect()
    }

    pub async fn push_subscriptions_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<PushSubscription>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM push_subscriptions WHERE expires_at < ?1 ORDER BY expires_at ASC",
        )
        .bind(timestamp(deadline))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_push_subscription).collect()
    }

    pub async fn delete_push_subscription(
        &self,
        account_id: Uuid,
        subscription_id: &str,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM push_subscriptions WHERE account_id = ?1 AND subscription_id = ?2")
            .bind(account_id.to_string())
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn row_to_push_subscription(row: SqliteRow) -> Result<PushSubscription, StorageError> {
        let account_raw: String = row.try_get("account_id")?;
        let expires_raw: String = row.try_get("expires_at")?;

        Ok(PushSubscription {
            account_id: parse_uuid(&account_raw, "push_subscriptions.account_id")?,
            subscription_id: row.try_get("subscription_id")?,
            resource: row.try_get("resource")?,
            expires_at: parse_datetime(&expires_raw, "push_subscriptions.expires_at")?,
            client_state: row.try_get("client_state")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::account;
    use chrono::Duration;

    #[tokio::test]
    async fn seat_usage_never_goes_negative() {
        let storage = Storage::in_memory().await.expect("storage");
        let org = Uuid::new_v4();

        assert_eq!(storage.decrement_seats(org).await.expect("empty decrement"), 0);
        assert_eq!(storage.increment_seats(org).await.expect("increment"), 1);
        assert_eq!(storage.increment_seats(org).await.expect("increment"), 2);
        assert_eq!(storage.decrement_seats(org).await.expect("decrement"), 1);
        assert_eq!(storage.decrement_seats(org).await.expect("decrement"), 0);
        assert_eq!(storage.decrement_seats(org).await.expect("floor"), 0);
    }

    #[tokio::test]
    async fn usage_window_is_half_open() {
        let storage = Storage::in_memory().await.expect("storage");
        let user_id = Uuid::new_v4();
        let start = Utc::now() - Duration::hours(2);
        let end = start + Duration::hours(1);

        storage.record_usage_event(user_id, "ai_compose_daily", start).await.expect("at start");
        storage.record_usage_event(user_id, "ai_compose_daily", end).await.expect("at end");
        storage.record_usage_event(user_id, "ai_summary_daily", start).await.expect("other feature");

        let counted = storage
            .count_usage_events(user_id, "ai_compose_daily", start, end)
            .await
            .expect("count");
        assert_eq!(counted, 1);
    }

    #[tokio::test]
    async fn plans_default_to_free() {
        let storage = Storage::in_memory().await.expect("storage");
        let user_id = Uuid::new_v4();
        assert_eq!(storage.get_user_plan(user_id).await.expect("plan"), PlanTier::Free);

        storage.set_user_plan(user_id, PlanTier::Pro).await.expect("upgrade");
        assert_eq!(storage.get_user_plan(user_id).await.expect("plan"), PlanTier::Pro);
    }

    #[tokio::test]
    async fn expiring_subscriptions_are_listed() {
        let storage = Storage::in_memory().await.expect("storage");
        let owner = account(Uuid::new_v4(), true);
        storage.insert_account(&owner).await.expect("account");

        for (id, hours) in [("soon", 2), ("later", 72)] {
            storage
                .upsert_push_subscription(&PushSubscription {
                    account_id: owner.id,
                    subscription_id: id.to_string(),
                    resource: "me/mailFolders('inbox')/messages".to_string(),
                    expires_at: Utc::now() + Duration::hours(hours),
                    client_state: Some("secret".to_string()),
                })
                .await
                .expect("subscription");
        }

        let expiring = storage
            .push_subscriptions_expiring_before(Utc::now() + Duration::hours(24))
            .await
            .expect("query");
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].subscription_id, "soon");
    }
}
