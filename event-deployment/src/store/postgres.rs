use async_trait::async_trait;
use event_common::model::{DeploymentIndex, EventDesc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::info;

use super::{DeploymentIndexStore, EventDescStore};
use crate::error::StoreError;

/// Both conditional event stores on one Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and bring the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("conditional event store ready");
        Ok(Self::new_from_pool(pool))
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_descriptions(
        &self,
        query: &'static str,
        key: &str,
    ) -> Result<Vec<EventDesc>, StoreError> {
        let rows: Vec<(Json<EventDesc>,)> = sqlx::query_as(query)
            .bind(key)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(Json(desc),)| desc).collect())
    }
}

#[async_trait]
impl EventDescStore for PgStore {
    async fn set(&self, desc: &EventDesc) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO event_descriptions
    (deployment_id, event_id, device_group_id, device_id, service_id, import_id, user_id, description)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (deployment_id, event_id, device_id, service_id, import_id) DO UPDATE
SET
    device_group_id = EXCLUDED.device_group_id,
    user_id = EXCLUDED.user_id,
    description = EXCLUDED.description
            "#,
        )
        .bind(&desc.deployment_id)
        .bind(&desc.event_id)
        .bind(&desc.device_group_id)
        .bind(&desc.device_id)
        .bind(&desc.service_id)
        .bind(&desc.import_id)
        .bind(&desc.user_id)
        .bind(Json(desc))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_by_deployment(&self, deployment_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM event_descriptions WHERE deployment_id = $1")
            .bind(deployment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn by_event(&self, event_id: &str) -> Result<Vec<EventDesc>, StoreError> {
        self.fetch_descriptions(
            "SELECT description FROM event_descriptions WHERE event_id = $1 ORDER BY created_at",
            event_id,
        )
        .await
    }

    async fn by_device_group(&self, device_group_id: &str) -> Result<Vec<EventDesc>, StoreError> {
        self.fetch_descriptions(
            "SELECT description FROM event_descriptions WHERE device_group_id = $1 ORDER BY created_at",
            device_group_id,
        )
        .await
    }

    async fn by_deployment(&self, deployment_id: &str) -> Result<Vec<EventDesc>, StoreError> {
        self.fetch_descriptions(
            "SELECT description FROM event_descriptions WHERE deployment_id = $1 ORDER BY created_at",
            deployment_id,
        )
        .await
    }
}

#[async_trait]
impl DeploymentIndexStore for PgStore {
    async fn set(&self, index: &DeploymentIndex) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO deployment_index (id, user_id, deployment, device_groups)
VALUES ($1, $2, $3, $4)
ON CONFLICT (id) DO UPDATE
SET
    user_id = EXCLUDED.user_id,
    deployment = EXCLUDED.deployment,
    device_groups = EXCLUDED.device_groups,
    updated_at = NOW()
            "#,
        )
        .bind(&index.id)
        .bind(&index.user_id)
        .bind(Json(&index.deployment))
        .bind(&index.device_groups)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, deployment_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM deployment_index WHERE id = $1")
            .bind(deployment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn by_device_group(
        &self,
        device_group_id: &str,
    ) -> Result<Vec<DeploymentIndex>, StoreError> {
        let rows: Vec<(String, String, Json<serde_json::Value>, Vec<String>)> = sqlx::query_as(
            r#"
SELECT id, user_id, deployment, device_groups
FROM deployment_index
WHERE device_groups @> ARRAY[$1]::TEXT[]
ORDER BY id
            "#,
        )
        .bind(device_group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, user_id, Json(deployment), device_groups)| {
                Ok::<_, StoreError>(DeploymentIndex {
                    id,
                    user_id,
                    deployment: serde_json::from_value(deployment)?,
                    device_groups,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_common::model::{ConditionalEvent, Deployment, Element, Selection};

    fn desc(deployment_id: &str, event_id: &str, device_id: &str) -> EventDesc {
        EventDesc {
            user_id: "user-1".to_owned(),
            deployment_id: deployment_id.to_owned(),
            device_group_id: "g1".to_owned(),
            device_id: device_id.to_owned(),
            service_id: "s1".to_owned(),
            script: "x == 42".to_owned(),
            event_id: event_id.to_owned(),
            ..Default::default()
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn descriptions_are_replaced_and_removed_per_deployment(db: PgPool) {
        let store = PgStore::new_from_pool(db);
        for desc in [
            desc("dep-1", "ev-1", "d1"),
            desc("dep-1", "ev-1", "d2"),
            desc("dep-2", "ev-2", "d1"),
        ] {
            EventDescStore::set(&store, &desc).await.unwrap();
        }

        let mut changed = desc("dep-1", "ev-1", "d1");
        changed.script = "x > 10".to_owned();
        EventDescStore::set(&store, &changed).await.unwrap();

        let stored = store.by_deployment("dep-1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.contains(&changed));
        assert_eq!(store.by_event("ev-1").await.unwrap().len(), 2);
        assert_eq!(
            EventDescStore::by_device_group(&store, "g1")
                .await
                .unwrap()
                .len(),
            3
        );

        store.remove_by_deployment("dep-1").await.unwrap();
        assert!(store.by_event("ev-1").await.unwrap().is_empty());
        assert_eq!(store.by_deployment("dep-2").await.unwrap().len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn index_is_found_by_any_of_its_groups(db: PgPool) {
        let store = PgStore::new_from_pool(db);
        let conditional = |group: &str| Element {
            conditional_event: Some(ConditionalEvent {
                selection: Selection {
                    selected_device_group_id: Some(group.to_owned()),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        let deployment = Deployment {
            version: 3,
            id: "dep-1".to_owned(),
            elements: vec![conditional("g1"), conditional("g2")],
            ..Default::default()
        };
        let index = DeploymentIndex::new("user-1", &deployment);
        DeploymentIndexStore::set(&store, &index).await.unwrap();

        assert_eq!(
            DeploymentIndexStore::by_device_group(&store, "g2")
                .await
                .unwrap(),
            vec![index.clone()]
        );
        assert!(DeploymentIndexStore::by_device_group(&store, "g3")
            .await
            .unwrap()
            .is_empty());

        DeploymentIndexStore::remove(&store, "dep-1").await.unwrap();
        assert!(DeploymentIndexStore::by_device_group(&store, "g1")
            .await
            .unwrap()
            .is_empty());
    }
}
