//! Cache key definitions.

use std::fmt::{Display, Formatter};

use uuid::Uuid;

use crate::application::content::Audience;
use crate::domain::{EntityKind, ListFilter};

/// What a cached query reads within one kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryScope {
    /// A filtered list.
    List(ListFilter),
    /// A single record by id.
    Record(Uuid),
}

/// Identifies one cached query. Every key belongs to exactly one kind, which
/// is what invalidation operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: EntityKind,
    pub audience: Audience,
    pub scope: QueryScope,
}

impl CacheKey {
    pub fn list(kind: EntityKind, audience: Audience, filter: ListFilter) -> Self {
        Self {
            kind,
            audience,
            scope: QueryScope::List(filter),
        }
    }

    pub fn record(kind: EntityKind, audience: Audience, id: Uuid) -> Self {
        Self {
            kind,
            audience,
            scope: QueryScope::Record(id),
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            QueryScope::List(filter) if filter.is_empty() => {
                write!(f, "{}:{}:list", self.audience, self.kind)
            }
            QueryScope::List(filter) => write!(
                f,
                "{}:{}:list?{}",
                self.audience,
                self.kind,
                serde_json::to_string(filter).unwrap_or_default()
            ),
            QueryScope::Record(id) => write!(f, "{}:{}:{id}", self.audience, self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::domain::AppointmentStatus;

    #[test]
    fn audience_and_filter_separate_keys() {
        let mut keys = HashSet::new();
        keys.insert(CacheKey::list(
            EntityKind::BlogPost,
            Audience::Public,
            ListFilter::default(),
        ));
        keys.insert(CacheKey::list(
            EntityKind::BlogPost,
            Audience::Admin,
            ListFilter::default(),
        ));
        keys.insert(CacheKey::list(
            EntityKind::BlogPost,
            Audience::Admin,
            ListFilter::with_published(false),
        ));
        keys.insert(CacheKey::list(
            EntityKind::BlogPost,
            Audience::Admin,
            ListFilter::default(),
        ));
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn display_is_readable_in_logs() {
        let key = CacheKey::list(
            EntityKind::Appointment,
            Audience::Admin,
            ListFilter::with_status(AppointmentStatus::Pending),
        );
        assert_eq!(
            key.to_string(),
            r#"admin:appointment:list?{"status":"pending"}"#
        );
        let plain = CacheKey::list(EntityKind::Service, Audience::Public, ListFilter::default());
        assert_eq!(plain.to_string(), "public:service:list");
    }
}
