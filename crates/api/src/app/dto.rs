use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aquaops_auth::{ApiKey, Role, User};
use aquaops_core::{Organization, PlantId, RecordId, UserId};
use aquaops_infra::{RecordKind, Stored};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub organization_name: String,
    pub slug: String,
    pub owner_email: String,
    pub owner_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub organization_slug: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub plant_id: Option<PlantId>,
    /// Omitted: the user is created as invited.
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub scopes: Vec<String>,
    pub rate_limit_per_minute: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlantRequest {
    pub name: String,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub plant_id: PlantId,
    pub title: String,
    pub description: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub capability: String,
}

#[derive(Debug, Deserialize)]
pub struct ImpersonateRequest {
    pub organization_id: String,
    /// Defaults to the organization's owner.
    pub user_id: Option<UserId>,
}

// -------------------------
// Business records
// -------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plant {
    pub name: String,
    pub location: Option<String>,
}

impl RecordKind for Plant {
    const KIND: &'static str = "plant";

    fn plant_id(&self, id: RecordId) -> Option<PlantId> {
        Some(PlantId::from_uuid(*id.as_uuid()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceTask {
    pub plant_id: PlantId,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub due_at: Option<DateTime<Utc>>,
}

impl RecordKind for MaintenanceTask {
    const KIND: &'static str = "maintenance_task";

    fn plant_id(&self, _id: RecordId) -> Option<PlantId> {
        Some(self.plant_id)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub organization: Organization,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct CreatedApiKeyResponse {
    pub api_key: ApiKey,
    /// Shown once.
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct PlantResponse {
    pub id: PlantId,
    pub name: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Stored<Plant>> for PlantResponse {
    fn from(stored: Stored<Plant>) -> Self {
        Self {
            id: PlantId::from_uuid(*stored.id.as_uuid()),
            name: stored.value.name,
            location: stored.value.location,
            created_at: stored.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: RecordId,
    #[serde(flatten)]
    pub task: MaintenanceTask,
    pub created_at: DateTime<Utc>,
}

impl From<Stored<MaintenanceTask>> for TaskResponse {
    fn from(stored: Stored<MaintenanceTask>) -> Self {
        Self {
            id: stored.id,
            task: stored.value,
            created_at: stored.created_at,
        }
    }
}
