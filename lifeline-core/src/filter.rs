//! Timeline query filters and keyset pagination.

use crate::{
    EventId, EventType, JournalCategory, SortOrder, TimelineCategory, TimelineEvent, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Predicate over timeline events. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EventFilter {
    /// Restrict to these types. Empty means all.
    #[serde(default)]
    pub event_types: Vec<EventType>,
    pub category: Option<TimelineCategory>,
    /// Only meaningful together with journal entries.
    pub journal_category: Option<JournalCategory>,
    /// Inclusive lower bound on `event_time`.
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub from: Option<Timestamp>,
    /// Exclusive upper bound on `event_time`.
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub until: Option<Timestamp>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_types.push(event_type);
        self
    }

    pub fn with_category(mut self, category: TimelineCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_journal_category(mut self, category: JournalCategory) -> Self {
        self.journal_category = Some(category);
        self
    }

    pub fn with_window(mut self, from: Option<Timestamp>, until: Option<Timestamp>) -> Self {
        self.from = from;
        self.until = until;
        self
    }

    pub fn matches(&self, event: &TimelineEvent) -> bool {
        let event_type = event.event_type();
        if !self.event_types.is_empty() && !self.event_types.contains(&event_type) {
            return false;
        }
        if let Some(category) = self.category {
            if event_type.category() != category {
                return false;
            }
        }
        if let Some(wanted) = self.journal_category {
            if event.details.journal_category() != Some(wanted) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.event_time < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.event_time >= until {
                return false;
            }
        }
        true
    }
}

/// Position after the last event of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EventCursor {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub event_time: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub event_id: EventId,
}

impl EventCursor {
    pub fn of(event: &TimelineEvent) -> Self {
        Self {
            event_time: event.event_time,
            event_id: event.event_id,
        }
    }

    /// Whether `event` comes strictly after this cursor in `order`.
    pub fn precedes(&self, event: &TimelineEvent, order: SortOrder) -> bool {
        compare_events(
            (self.event_time, self.event_id),
            (event.event_time, event.event_id),
            order,
        ) == Ordering::Less
    }
}

/// Total order used for listing: `event_time`, ties broken by `event_id`.
pub fn timeline_order(a: &TimelineEvent, b: &TimelineEvent, order: SortOrder) -> Ordering {
    compare_events((a.event_time, a.event_id), (b.event_time, b.event_id), order)
}

fn compare_events(
    a: (Timestamp, EventId),
    b: (Timestamp, EventId),
    order: SortOrder,
) -> Ordering {
    match order {
        SortOrder::Asc => a.cmp(&b),
        SortOrder::Desc => b.cmp(&a),
    }
}

/// A page request against the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EventQuery {
    #[serde(default)]
    pub filter: EventFilter,
    #[serde(default)]
    pub order: SortOrder,
    /// Clamped by the service to its configured page bounds.
    pub limit: Option<usize>,
    pub cursor: Option<EventCursor>,
}

impl EventQuery {
    pub fn new(filter: EventFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: EventCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// One page of events plus the cursor for the next page, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EventPage {
    pub events: Vec<TimelineEvent>,
    pub next_cursor: Option<EventCursor>,
}

impl EventPage {
    pub fn empty() -> Self {
        Self {
            events: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}
