//! Domain layer types and invariants.

pub mod entities;
pub mod entity;
pub mod error;
pub mod types;

pub use entities::{
    AppointmentDraft, AppointmentRecord, BlogPostDraft, BlogPostRecord, InquiryDraft,
    InquiryRecord, PortfolioItemDraft, PortfolioItemRecord, ServiceDraft, ServiceRecord,
    TestimonialDraft, TestimonialRecord,
};
pub use entity::{Entity, ListFilter};
pub use types::{AppointmentStatus, EntityKind, PublishStatus, Revision};
