//! Shared domain enumerations.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Monotonic per-kind counter bumped on every committed write.
pub type Revision = u64;

/// The six kinds of content an admin manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Service,
    PortfolioItem,
    Appointment,
    Inquiry,
    BlogPost,
    Testimonial,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Service,
        EntityKind::PortfolioItem,
        EntityKind::Appointment,
        EntityKind::Inquiry,
        EntityKind::BlogPost,
        EntityKind::Testimonial,
    ];

    /// Stable identifier used for storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::PortfolioItem => "portfolio_item",
            Self::Appointment => "appointment",
            Self::Inquiry => "inquiry",
            Self::BlogPost => "blog_post",
            Self::Testimonial => "testimonial",
        }
    }

    /// Path segment used by the HTTP surface (`/api/admin/{slug}`).
    pub fn route_slug(self) -> &'static str {
        match self {
            Self::Service => "services",
            Self::PortfolioItem => "portfolio",
            Self::Appointment => "appointments",
            Self::Inquiry => "inquiries",
            Self::BlogPost => "blog",
            Self::Testimonial => "testimonials",
        }
    }

    /// JSON key wrapping a list of this kind.
    pub fn collection_key(self) -> &'static str {
        match self {
            Self::Service => "services",
            Self::PortfolioItem => "portfolioItems",
            Self::Appointment => "appointments",
            Self::Inquiry => "inquiries",
            Self::BlogPost => "posts",
            Self::Testimonial => "testimonials",
        }
    }

    /// JSON key wrapping a single record of this kind.
    pub fn record_key(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::PortfolioItem => "portfolioItem",
            Self::Appointment => "appointment",
            Self::Inquiry => "inquiry",
            Self::BlogPost => "post",
            Self::Testimonial => "testimonial",
        }
    }

    /// Whether anonymous callers may list this kind.
    pub fn is_public(self) -> bool {
        matches!(
            self,
            Self::Service | Self::PortfolioItem | Self::BlogPost | Self::Testimonial
        )
    }

    pub fn index(self) -> usize {
        match self {
            Self::Service => 0,
            Self::PortfolioItem => 1,
            Self::Appointment => 2,
            Self::Inquiry => 3,
            Self::BlogPost => 4,
            Self::Testimonial => 5,
        }
    }

    pub fn from_route_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.route_slug() == slug)
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    #[default]
    Draft,
    Published,
}

impl PublishStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }
}
