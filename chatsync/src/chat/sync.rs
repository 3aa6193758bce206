//! Sync engine: catch-up over server-recorded actions.
//!
//! Actions recorded while this client was offline (or whose broadcast it
//! missed) are fetched, replayed through the same [`EventRouter`] handlers
//! as live events, and then acknowledged so the server-side cursor moves
//! past them. Runs are serialized; overlapping triggers queue behind the
//! running one and then usually find nothing left to do.

use parking_lot::Mutex;
use serde_json::{Map, Value};

use chatsync_proto::event::ServerEvent;
use chatsync_proto::request::{
    AckSyncActionsRequest, FetchSyncActionsResponse, OkResponse, RequestKind,
};

use super::ack::AckTracker;
use super::router::{EventRouter, FollowUp};
use super::store::ConversationStore;
use crate::transport::{self, RequestChannel, RequestError};

/// Errors from a sync run. Both are retried on the next trigger.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The outstanding actions could not be fetched.
    #[error("fetching sync actions failed: {0}")]
    Fetch(#[source] RequestError),

    /// Actions were applied but the acknowledgement failed; they will be
    /// delivered (and harmlessly re-applied) again.
    #[error("acknowledging sync actions failed: {0}")]
    Ack(#[source] RequestError),
}

/// Outcome of one sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Actions replayed through the router.
    pub applied: usize,
    /// Actions skipped as unknown, malformed, or nested nudges.
    pub skipped: usize,
    /// Follow-ups produced by the replayed events.
    pub follow_ups: Vec<FollowUp>,
}

/// Serialized fetch-apply-ack cycle.
#[derive(Debug, Default)]
pub struct SyncEngine {
    running: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    /// Create an idle engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch outstanding actions, apply them, then acknowledge them.
    ///
    /// Safe to call redundantly: application is idempotent and an empty
    /// batch makes no acknowledgement call.
    ///
    /// # Errors
    ///
    /// [`SyncError::Fetch`] if nothing could be fetched (nothing applied),
    /// [`SyncError::Ack`] if the batch was applied but not acknowledged.
    pub async fn fetch_and_apply<C: RequestChannel>(
        &self,
        channel: &C,
        store: &Mutex<ConversationStore>,
        router: &EventRouter,
        acks: &AckTracker,
    ) -> Result<SyncReport, SyncError> {
        let _guard = self.running.lock().await;

        let response = channel
            .request(RequestKind::FetchSyncActions, Value::Object(Map::new()))
            .await
            .map_err(SyncError::Fetch)?;
        let FetchSyncActionsResponse { actions } = serde_json::from_value(response)
            .map_err(|e| SyncError::Fetch(RequestError::Decode(e.to_string())))?;
        if actions.is_empty() {
            tracing::debug!("no sync actions outstanding");
            return Ok(SyncReport::default());
        }

        let mut report = SyncReport::default();
        {
            let mut store = store.lock();
            for action in &actions {
                match action.to_event() {
                    Ok(Some(ServerEvent::SyncAction(_))) => report.skipped += 1,
                    Ok(Some(event)) => {
                        report
                            .follow_ups
                            .extend(router.apply(&mut store, acks, &event));
                        report.applied += 1;
                    }
                    Ok(None) => {
                        tracing::debug!(action_id = %action.action_id, kind = %action.kind, "skipping unknown sync action");
                        report.skipped += 1;
                    }
                    Err(e) => {
                        tracing::warn!(action_id = %action.action_id, err = %e, "skipping malformed sync action");
                        report.skipped += 1;
                    }
                }
            }
        }

        let request = AckSyncActionsRequest {
            action_ids: actions.into_iter().map(|a| a.action_id).collect(),
        };
        let _: OkResponse = transport::call(channel, RequestKind::AckSyncActions, &request)
            .await
            .map_err(SyncError::Ack)?;

        tracing::info!(
            applied = report.applied,
            skipped = report.skipped,
            "sync actions applied"
        );
        Ok(report)
    }
}
