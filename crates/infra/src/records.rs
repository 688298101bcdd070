//! Tenant-isolated document storage for business records, with a typed
//! repository on top.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use aquaops_core::{OrganizationId, PlantId, RecordId};

use crate::store::{Store, StoreError, StoreResult};

/// Raw stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantRecord {
    pub id: RecordId,
    pub organization_id: OrganizationId,
    pub kind: String,
    pub plant_id: Option<PlantId>,
    pub body: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A business type stored as a tenant record.
pub trait RecordKind: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;

    /// Plant the record belongs to, used for plant-scoped listing.
    fn plant_id(&self, id: RecordId) -> Option<PlantId>;
}

/// Decoded record plus its storage metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    pub id: RecordId,
    pub value: T,
    pub plant_id: Option<PlantId>,
    pub created_at: DateTime<Utc>,
}

/// Typed, tenant-scoped repository over [`crate::store::TenantRecordStore`].
pub struct TenantRepo<T> {
    store: Arc<dyn Store>,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for TenantRepo<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _kind: PhantomData,
        }
    }
}

impl<T: RecordKind> TenantRepo<T> {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    pub async fn insert(
        &self,
        organization_id: OrganizationId,
        id: RecordId,
        value: T,
        at: DateTime<Utc>,
    ) -> StoreResult<Stored<T>> {
        let body = serde_json::to_value(&value).map_err(|e| StoreError::Backend(e.to_string()))?;
        let plant_id = value.plant_id(id);
        let record = TenantRecord {
            id,
            organization_id,
            kind: T::KIND.to_string(),
            plant_id,
            body,
            created_at: at,
            updated_at: at,
        };
        self.store.insert_record(&record).await?;
        Ok(Stored {
            id,
            value,
            plant_id,
            created_at: at,
        })
    }

    pub async fn get(&self, organization_id: OrganizationId, id: RecordId) -> StoreResult<Option<Stored<T>>> {
        self.store
            .get_record(organization_id, T::KIND, id)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn list(&self, organization_id: OrganizationId, plant: Option<PlantId>) -> StoreResult<Vec<Stored<T>>> {
        self.store
            .list_records(organization_id, T::KIND, plant)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn count(&self, organization_id: OrganizationId) -> StoreResult<usize> {
        self.store.count_records(organization_id, T::KIND).await
    }

    pub async fn delete(&self, organization_id: OrganizationId, id: RecordId) -> StoreResult<bool> {
        self.store.delete_record(organization_id, T::KIND, id).await
    }
}

fn decode<T: RecordKind>(record: TenantRecord) -> StoreResult<Stored<T>> {
    let value = serde_json::from_value(record.body)
        .map_err(|e| StoreError::Backend(format!("corrupt {} record {}: {e}", T::KIND, record.id)))?;
    Ok(Stored {
        id: record.id,
        value,
        plant_id: record.plant_id,
        created_at: record.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pump {
        plant: PlantId,
        label: String,
    }

    impl RecordKind for Pump {
        const KIND: &'static str = "pump";

        fn plant_id(&self, _id: RecordId) -> Option<PlantId> {
            Some(self.plant)
        }
    }

    #[tokio::test]
    async fn records_are_invisible_across_tenants() {
        let repo: TenantRepo<Pump> = TenantRepo::new(Arc::new(InMemoryStore::new()));
        let a = OrganizationId::new();
        let b = OrganizationId::new();
        let id = RecordId::new();
        let pump = Pump {
            plant: PlantId::new(),
            label: "P-101".into(),
        };

        repo.insert(a, id, pump.clone(), Utc::now()).await.unwrap();

        assert_eq!(repo.get(a, id).await.unwrap().unwrap().value, pump);
        assert!(repo.get(b, id).await.unwrap().is_none());
        assert!(!repo.delete(b, id).await.unwrap());
        assert_eq!(repo.count(a).await.unwrap(), 1);
        assert_eq!(repo.count(b).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_narrows_by_plant() {
        let repo: TenantRepo<Pump> = TenantRepo::new(Arc::new(InMemoryStore::new()));
        let org = OrganizationId::new();
        let north = PlantId::new();
        let south = PlantId::new();
        for (plant, label) in [(north, "N-1"), (south, "S-1"), (north, "N-2")] {
            repo.insert(org, RecordId::new(), Pump { plant, label: label.into() }, Utc::now())
                .await
                .unwrap();
        }

        assert_eq!(repo.list(org, None).await.unwrap().len(), 3);
        let labels: Vec<String> = repo
            .list(org, Some(north))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.value.label)
            .collect();
        assert_eq!(labels, vec!["N-1".to_string(), "N-2".to_string()]);
    }
}
