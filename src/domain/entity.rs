//! The generic entity abstraction shared by every content kind.
//!
//! Each kind supplies its draft type (the payload an admin submits), its
//! validation rules, its list ordering and which list filters it honours. The
//! store and the content API are written once against this trait.

use std::cmp::Ordering;
use std::fmt::Debug;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::DomainError;
use super::types::{AppointmentStatus, EntityKind};

pub trait Entity:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: EntityKind;

    /// Everything about a record except its server-assigned id.
    type Draft: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn id(&self) -> Uuid;

    fn validate(draft: &Self::Draft) -> Result<(), DomainError>;

    /// Build the committed record. `now` fills server-side stamps the draft left open.
    fn commit(id: Uuid, draft: Self::Draft, now: OffsetDateTime) -> Self;

    fn to_draft(&self) -> Self::Draft;

    /// Kind-appropriate list order.
    fn compare(a: &Self, b: &Self) -> Ordering;

    fn matches(&self, _filter: &ListFilter) -> bool {
        true
    }

    /// Whether an anonymous caller may see this record.
    fn is_public(&self) -> bool {
        Self::KIND.is_public()
    }
}

/// Optional list filters. Filters that do not apply to a kind are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread: Option<bool>,
}

impl ListFilter {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.published.is_none() && self.unread.is_none()
    }

    pub fn with_status(status: AppointmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_published(published: bool) -> Self {
        Self {
            published: Some(published),
            ..Self::default()
        }
    }

    pub fn with_unread(unread: bool) -> Self {
        Self {
            unread: Some(unread),
            ..Self::default()
        }
    }
}

/// Apply an RFC 7386 JSON merge patch to `target`.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                let slot = target_map.entry(key.clone()).or_insert(Value::Null);
                apply_merge_patch(slot, value);
            }
        }
    }
}

/// Re-shape a draft through a merge patch, reporting decode failures as validation errors.
pub fn merge_draft<E: Entity>(draft: &E::Draft, patch: &Value) -> Result<E::Draft, DomainError> {
    let mut value = serde_json::to_value(draft)
        .map_err(|err| DomainError::invariant(format!("draft encode failed: {err}")))?;
    apply_merge_patch(&mut value, patch);
    serde_json::from_value(value).map_err(|err| DomainError::validation("patch", err.to_string()))
}
