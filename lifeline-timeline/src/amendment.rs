//! Amendment resolver.
//!
//! Reads the amendment chain for one event and folds the latest amendment
//! onto it. Nothing here writes.

use crate::event_log::{ensure_amendable, EventLog};
use lifeline_core::{
    CurrentView, DomainError, EventCursor, EventId, EventQuery, EventType, LifelineResult,
    TimelineConfig, TimelineEvent, UserId,
};
use lifeline_storage::StorageTrait;
use serde::Serialize;
use std::sync::Arc;

/// One page of current views. The cursor pages over the underlying log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentViewPage {
    pub views: Vec<CurrentView>,
    pub next_cursor: Option<EventCursor>,
}

#[derive(Debug)]
pub struct AmendmentResolver<S> {
    storage: Arc<S>,
    log: EventLog<S>,
    scan_limit: usize,
    summary_max_chars: usize,
}

impl<S> Clone for AmendmentResolver<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            log: self.log.clone(),
            scan_limit: self.scan_limit,
            summary_max_chars: self.summary_max_chars,
        }
    }
}

impl<S: StorageTrait> AmendmentResolver<S> {
    pub fn new(storage: Arc<S>, log: EventLog<S>, config: &TimelineConfig) -> Self {
        Self {
            storage,
            log,
            scan_limit: config.amendment_scan_limit,
            summary_max_chars: config.summary_max_chars,
        }
    }

    /// Current view of `event_id`.
    ///
    /// A chain longer than the scan limit fails with `TooManyAmendments`
    /// rather than folding a truncated chain.
    pub fn current_view(&self, user_id: UserId, event_id: EventId) -> LifelineResult<CurrentView> {
        let original = self.log.get(user_id, event_id)?;
        self.resolve(user_id, original)
    }

    fn resolve(&self, user_id: UserId, original: TimelineEvent) -> LifelineResult<CurrentView> {
        if !original.event_type().is_amendable() {
            return Ok(CurrentView::unamended(original));
        }

        let amendments = self.storage.event_list_amendments(
            user_id,
            original.event_id,
            self.scan_limit.saturating_add(1),
        )?;
        if amendments.len() > self.scan_limit {
            tracing::warn!(
                user_id = %user_id,
                event_id = %original.event_id,
                limit = self.scan_limit,
                "Amendment chain exceeds scan limit"
            );
            return Err(DomainError::TooManyAmendments {
                event_id: original.event_id,
                limit: self.scan_limit,
            }
            .into());
        }

        let count = amendments.len();
        Ok(CurrentView::fold(
            original,
            amendments.first(),
            count,
            self.summary_max_chars,
        ))
    }

    /// Load `event_id` and check that it may be amended.
    pub fn amendable_target(&self, user_id: UserId, event_id: EventId) -> LifelineResult<TimelineEvent> {
        let target = self.log.get(user_id, event_id)?;
        ensure_amendable(&target)?;
        Ok(target)
    }

    /// One page of the timeline with amendments folded in.
    ///
    /// Amendment events themselves are left out of `views`, so a page can
    /// hold fewer views than the requested limit.
    pub fn list_current_views(
        &self,
        user_id: UserId,
        query: &EventQuery,
    ) -> LifelineResult<CurrentViewPage> {
        let page = self.log.list(user_id, query)?;
        let views = page
            .events
            .into_iter()
            .filter(|e| e.event_type() != EventType::EventAmended)
            .map(|e| self.resolve(user_id, e))
            .collect::<LifelineResult<Vec<_>>>()?;
        Ok(CurrentViewPage {
            views,
            next_cursor: page.next_cursor,
        })
    }
}
