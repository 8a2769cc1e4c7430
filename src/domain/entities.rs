//! Content records and their drafts.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::entity::{Entity, ListFilter};
use super::error::{DomainError, ensure_email, ensure_non_empty};
use super::types::{AppointmentStatus, EntityKind, PublishStatus};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub rank: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: String,
    pub image_url: Option<String>,
    pub rank: i32,
}

impl Entity for ServiceRecord {
    const KIND: EntityKind = EntityKind::Service;
    type Draft = ServiceDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(draft: &ServiceDraft) -> Result<(), DomainError> {
        ensure_non_empty(&draft.name, "name")?;
        ensure_non_empty(&draft.price, "price")?;
        if draft.rank < 0 {
            return Err(DomainError::validation("rank", "must not be negative"));
        }
        Ok(())
    }

    fn commit(id: Uuid, draft: ServiceDraft, _now: OffsetDateTime) -> Self {
        Self {
            id,
            name: draft.name,
            description: draft.description,
            price: draft.price,
            image_url: draft.image_url,
            rank: draft.rank,
        }
    }

    fn to_draft(&self) -> ServiceDraft {
        ServiceDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price.clone(),
            image_url: self.image_url.clone(),
            rank: self.rank,
        }
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        a.rank
            .cmp(&b.rank)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    }
}

// ============================================================================
// Portfolio
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioItemDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub image_url: String,
    #[serde(with = "iso_date")]
    pub completed_on: Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioItemRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub image_url: String,
    #[serde(with = "iso_date")]
    pub completed_on: Date,
}

impl Entity for PortfolioItemRecord {
    const KIND: EntityKind = EntityKind::PortfolioItem;
    type Draft = PortfolioItemDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(draft: &PortfolioItemDraft) -> Result<(), DomainError> {
        ensure_non_empty(&draft.title, "title")?;
        ensure_non_empty(&draft.image_url, "imageUrl")?;
        Ok(())
    }

    fn commit(id: Uuid, draft: PortfolioItemDraft, _now: OffsetDateTime) -> Self {
        Self {
            id,
            title: draft.title,
            description: draft.description,
            image_url: draft.image_url,
            completed_on: draft.completed_on,
        }
    }

    fn to_draft(&self) -> PortfolioItemDraft {
        PortfolioItemDraft {
            title: self.title.clone(),
            description: self.description.clone(),
            image_url: self.image_url.clone(),
            completed_on: self.completed_on,
        }
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        b.completed_on
            .cmp(&a.completed_on)
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.id.cmp(&b.id))
    }
}

// ============================================================================
// Appointment
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDraft {
    /// Soft reference to a service; never checked against the service table.
    #[serde(default)]
    pub service_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRecord {
    pub id: Uuid,
    pub service_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
}

impl Entity for AppointmentRecord {
    const KIND: EntityKind = EntityKind::Appointment;
    type Draft = AppointmentDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(draft: &AppointmentDraft) -> Result<(), DomainError> {
        ensure_non_empty(&draft.customer_name, "customerName")?;
        ensure_email(&draft.customer_email, "customerEmail")?;
        Ok(())
    }

    fn commit(id: Uuid, draft: AppointmentDraft, _now: OffsetDateTime) -> Self {
        Self {
            id,
            service_id: draft.service_id,
            customer_name: draft.customer_name,
            customer_email: draft.customer_email,
            customer_phone: draft.customer_phone,
            requested_at: draft.requested_at,
            notes: draft.notes,
            status: draft.status,
        }
    }

    fn to_draft(&self) -> AppointmentDraft {
        AppointmentDraft {
            service_id: self.service_id,
            customer_name: self.customer_name.clone(),
            customer_email: self.customer_email.clone(),
            customer_phone: self.customer_phone.clone(),
            requested_at: self.requested_at,
            notes: self.notes.clone(),
            status: self.status,
        }
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        a.requested_at
            .cmp(&b.requested_at)
            .then_with(|| a.id.cmp(&b.id))
    }

    fn matches(&self, filter: &ListFilter) -> bool {
        filter.status.is_none_or(|status| self.status == status)
    }
}

// ============================================================================
// Inquiry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryDraft {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    /// Left empty by callers that want the commit time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub received_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl Entity for InquiryRecord {
    const KIND: EntityKind = EntityKind::Inquiry;
    type Draft = InquiryDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(draft: &InquiryDraft) -> Result<(), DomainError> {
        ensure_non_empty(&draft.name, "name")?;
        ensure_email(&draft.email, "email")?;
        ensure_non_empty(&draft.message, "message")?;
        Ok(())
    }

    fn commit(id: Uuid, draft: InquiryDraft, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: draft.name,
            email: draft.email,
            phone: draft.phone,
            message: draft.message,
            read: draft.read,
            received_at: draft.received_at.unwrap_or(now),
        }
    }

    fn to_draft(&self) -> InquiryDraft {
        InquiryDraft {
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            message: self.message.clone(),
            read: self.read,
            received_at: Some(self.received_at),
        }
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        b.received_at
            .cmp(&a.received_at)
            .then_with(|| a.id.cmp(&b.id))
    }

    fn matches(&self, filter: &ListFilter) -> bool {
        filter.unread.is_none_or(|unread| self.read != unread)
    }
}

// ============================================================================
// Blog
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPostDraft {
    pub title: String,
    pub body: String,
    pub author: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub status: PublishStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPostRecord {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub author: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    pub status: PublishStatus,
}

impl Entity for BlogPostRecord {
    const KIND: EntityKind = EntityKind::BlogPost;
    type Draft = BlogPostDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(draft: &BlogPostDraft) -> Result<(), DomainError> {
        ensure_non_empty(&draft.title, "title")?;
        ensure_non_empty(&draft.body, "body")?;
        ensure_non_empty(&draft.author, "author")?;
        Ok(())
    }

    fn commit(id: Uuid, draft: BlogPostDraft, now: OffsetDateTime) -> Self {
        let published_at = match draft.status {
            PublishStatus::Published => Some(draft.published_at.unwrap_or(now)),
            PublishStatus::Draft => draft.published_at,
        };
        Self {
            id,
            title: draft.title,
            body: draft.body,
            author: draft.author,
            published_at,
            status: draft.status,
        }
    }

    fn to_draft(&self) -> BlogPostDraft {
        BlogPostDraft {
            title: self.title.clone(),
            body: self.body.clone(),
            author: self.author.clone(),
            published_at: self.published_at,
            status: self.status,
        }
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        // Dated posts first, newest first; undated drafts trail.
        match (a.published_at, b.published_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.id.cmp(&b.id))
    }

    fn matches(&self, filter: &ListFilter) -> bool {
        filter
            .published
            .is_none_or(|published| (self.status == PublishStatus::Published) == published)
    }

    fn is_public(&self) -> bool {
        self.status == PublishStatus::Published
    }
}

// ============================================================================
// Testimonial
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestimonialDraft {
    pub author_name: String,
    #[serde(default)]
    pub role: Option<String>,
    pub quote: String,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestimonialRecord {
    pub id: Uuid,
    pub author_name: String,
    pub role: Option<String>,
    pub quote: String,
    pub display_order: i32,
}

impl Entity for TestimonialRecord {
    const KIND: EntityKind = EntityKind::Testimonial;
    type Draft = TestimonialDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(draft: &TestimonialDraft) -> Result<(), DomainError> {
        ensure_non_empty(&draft.author_name, "authorName")?;
        ensure_non_empty(&draft.quote, "quote")?;
        Ok(())
    }

    fn commit(id: Uuid, draft: TestimonialDraft, _now: OffsetDateTime) -> Self {
        Self {
            id,
            author_name: draft.author_name,
            role: draft.role,
            quote: draft.quote,
            display_order: draft.display_order,
        }
    }

    fn to_draft(&self) -> TestimonialDraft {
        TestimonialDraft {
            author_name: self.author_name.clone(),
            role: self.role.clone(),
            quote: self.quote.clone(),
            display_order: self.display_order,
        }
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.author_name.cmp(&b.author_name))
            .then_with(|| a.id.cmp(&b.id))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::{date, datetime};

    use super::*;

    fn service(name: &str, rank: i32) -> ServiceRecord {
        ServiceRecord::commit(
            Uuid::new_v4(),
            ServiceDraft {
                name: name.to_string(),
                description: String::new(),
                price: "$10".to_string(),
                image_url: None,
                rank,
            },
            OffsetDateTime::now_utc(),
        )
    }

    #[test]
    fn service_requires_name_and_price() {
        let mut draft = service("Hedge trimming", 0).to_draft();
        assert!(ServiceRecord::validate(&draft).is_ok());

        draft.price = "  ".to_string();
        assert_eq!(
            ServiceRecord::validate(&draft),
            Err(DomainError::validation("price", "must not be empty"))
        );

        draft.price = "$5".to_string();
        draft.name.clear();
        assert!(matches!(
            ServiceRecord::validate(&draft),
            Err(DomainError::Validation { field, .. }) if field == "name"
        ));
    }

    #[test]
    fn services_order_by_rank_then_name() {
        let mut items = vec![service("Weeding", 2), service("Mulching", 1), service("Edging", 1)];
        items.sort_by(ServiceRecord::compare);
        let names: Vec<_> = items.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Edging", "Mulching", "Weeding"]);
    }

    #[test]
    fn portfolio_orders_newest_first_and_uses_plain_dates() {
        let older: PortfolioItemDraft = serde_json::from_value(json!({
            "title": "Rose bed",
            "imageUrl": "/img/rose.jpg",
            "completedOn": "2023-05-01"
        }))
        .expect("decode draft");
        assert_eq!(older.completed_on, date!(2023 - 05 - 01));

        let mut newer = older.clone();
        newer.title = "Patio".to_string();
        newer.completed_on = date!(2024 - 07 - 12);

        let now = OffsetDateTime::now_utc();
        let mut items = vec![
            PortfolioItemRecord::commit(Uuid::new_v4(), older, now),
            PortfolioItemRecord::commit(Uuid::new_v4(), newer, now),
        ];
        items.sort_by(PortfolioItemRecord::compare);
        assert_eq!(items[0].title, "Patio");

        let encoded = serde_json::to_value(&items[1]).expect("encode");
        assert_eq!(encoded["completedOn"], "2023-05-01");
    }

    #[test]
    fn appointment_filter_matches_status() {
        let record = AppointmentRecord::commit(
            Uuid::new_v4(),
            AppointmentDraft {
                service_id: None,
                customer_name: "Ada".to_string(),
                customer_email: "ada@example.com".to_string(),
                customer_phone: None,
                requested_at: datetime!(2024-04-02 09:00 UTC),
                notes: None,
                status: AppointmentStatus::Pending,
            },
            OffsetDateTime::now_utc(),
        );
        assert!(record.matches(&ListFilter::default()));
        assert!(record.matches(&ListFilter::with_status(AppointmentStatus::Pending)));
        assert!(!record.matches(&ListFilter::with_status(AppointmentStatus::Confirmed)));
    }

    #[test]
    fn appointment_rejects_bad_email() {
        let draft: AppointmentDraft = serde_json::from_value(json!({
            "customerName": "Ada",
            "customerEmail": "not-an-email",
            "requestedAt": "2024-04-02T09:00:00Z"
        }))
        .expect("decode draft");
        assert_eq!(draft.status, AppointmentStatus::Pending);
        assert!(matches!(
            AppointmentRecord::validate(&draft),
            Err(DomainError::Validation { field, .. }) if field == "customerEmail"
        ));
    }

    #[test]
    fn inquiry_stamps_receipt_time_when_missing() {
        let now = datetime!(2024-03-03 12:00 UTC);
        let record = InquiryRecord::commit(
            Uuid::new_v4(),
            InquiryDraft {
                name: "Bo".to_string(),
                email: "bo@example.com".to_string(),
                phone: None,
                message: "Do you prune apple trees?".to_string(),
                read: false,
                received_at: None,
            },
            now,
        );
        assert_eq!(record.received_at, now);
        assert!(record.matches(&ListFilter::with_unread(true)));
        assert!(!record.matches(&ListFilter::with_unread(false)));
    }

    #[test]
    fn publishing_stamps_date_and_exposes_post() {
        let now = datetime!(2024-06-01 08:30 UTC);
        let draft = BlogPostDraft {
            title: "Spring pruning".to_string(),
            body: "Cut back before buds swell.".to_string(),
            author: "Kim".to_string(),
            published_at: None,
            status: PublishStatus::Draft,
        };
        let hidden = BlogPostRecord::commit(Uuid::new_v4(), draft.clone(), now);
        assert_eq!(hidden.published_at, None);
        assert!(!hidden.is_public());

        let published = BlogPostRecord::commit(
            Uuid::new_v4(),
            BlogPostDraft {
                status: PublishStatus::Published,
                ..draft
            },
            now,
        );
        assert_eq!(published.published_at, Some(now));
        assert!(published.is_public());
        assert!(published.matches(&ListFilter::with_published(true)));
    }

    #[test]
    fn undated_posts_sort_last() {
        let now = OffsetDateTime::now_utc();
        let base = BlogPostDraft {
            title: "A".to_string(),
            body: "b".to_string(),
            author: "c".to_string(),
            published_at: None,
            status: PublishStatus::Draft,
        };
        let draft = BlogPostRecord::commit(Uuid::new_v4(), base.clone(), now);
        let dated = BlogPostRecord::commit(
            Uuid::new_v4(),
            BlogPostDraft {
                title: "Z".to_string(),
                published_at: Some(now),
                ..base
            },
            now,
        );
        assert_eq!(BlogPostRecord::compare(&dated, &draft), Ordering::Less);
    }

    #[test]
    fn round_trip_through_draft_keeps_fields() {
        let record = service("Lawn Mowing", 3);
        let again = ServiceRecord::commit(record.id, record.to_draft(), OffsetDateTime::now_utc());
        assert_eq!(record, again);
    }
}
