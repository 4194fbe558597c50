//! Subscription manager: the single lock in front of the engine.

use super::engine::SubscriptionEngine;
use super::types::{
    ChannelMetadata, ChannelPartition, ChannelStreamingCallbacks, ChannelSubscriptionOptions,
    NotificationCallback, RangeQuery, StartIndex, SubscriptionInfo,
};
use crate::error::Result;
use crate::model::{DomainModel, ObjectSpec};
use crate::session::SessionObserver;
use crate::types::{ActiveStatus, ChannelId, DataItem, DataValue, IndexValue, SessionId, Uuid};
use parking_lot::Mutex;

/// Serializes every engine operation and every domain mutation.
///
/// Handlers, the data generator and session teardown all go through
/// [`SubscriptionManager::execute_with_lock`], so a domain event reaches
/// every affected session before any other operation runs.
pub struct SubscriptionManager {
    engine: Mutex<SubscriptionEngine>,
}

impl SubscriptionManager {
    pub fn new(model: DomainModel) -> Self {
        Self {
            engine: Mutex::new(SubscriptionEngine::new(model)),
        }
    }

    /// Run `f` with exclusive access to the engine.
    ///
    /// Callbacks invoked from inside must not call back into the manager.
    pub fn execute_with_lock<R>(&self, f: impl FnOnce(&mut SubscriptionEngine) -> R) -> R {
        let mut engine = self.engine.lock();
        f(&mut engine)
    }

    // --- Channel subscriptions ---

    pub fn start_channel_subscription(
        &self,
        session: SessionId,
        options: ChannelSubscriptionOptions,
        callbacks: ChannelStreamingCallbacks,
    ) -> bool {
        self.execute_with_lock(|e| e.start_channel_subscription(session, options, callbacks))
    }

    pub fn add_channel_subscription_channel_scope(
        &self,
        session: SessionId,
        info: SubscriptionInfo,
    ) -> Result<Vec<ChannelMetadata>> {
        self.execute_with_lock(|e| e.add_channel_subscription_channel_scope(session, info))
    }

    pub fn has_channel_subscription_scope(&self, session: SessionId, info: &SubscriptionInfo) -> bool {
        self.execute_with_lock(|e| e.has_channel_subscription_scope(session, info))
    }

    pub fn validate_channel_ids(
        &self,
        session: SessionId,
        ids: impl IntoIterator<Item = ChannelId>,
    ) -> ChannelPartition {
        self.execute_with_lock(|e| e.validate_channel_ids(session, ids))
    }

    pub fn start_channel_streaming(
        &self,
        session: SessionId,
        channel: ChannelId,
        receive_change_notification: bool,
        start: StartIndex,
    ) -> bool {
        self.execute_with_lock(|e| {
            e.start_channel_streaming(session, channel, receive_change_notification, start)
        })
    }

    pub fn stop_channel_streaming(&self, session: SessionId, channel: ChannelId) -> bool {
        self.execute_with_lock(|e| e.stop_channel_streaming(session, channel))
    }

    pub fn stop_channel_subscription(&self, session: SessionId, reason: &str) -> bool {
        self.execute_with_lock(|e| e.stop_channel_subscription(session, reason))
    }

    /// Collect range data while holding the lock.
    pub fn get_channel_data_ranges(&self, session: SessionId, queries: &[RangeQuery]) -> Vec<DataItem> {
        self.execute_with_lock(|e| e.get_channel_data_ranges(session, queries).cloned().collect())
    }

    pub fn release_session(&self, session: SessionId, reason: &str) {
        self.execute_with_lock(|e| e.release_session(session, reason))
    }

    pub fn channel_subscription_count(&self) -> usize {
        self.execute_with_lock(|e| e.channel_subscription_count())
    }

    // --- Notification subscriptions ---

    pub fn subscribe_notifications(
        &self,
        session: SessionId,
        request_uuid: Uuid,
        info: SubscriptionInfo,
        callback: NotificationCallback,
    ) -> Result<()> {
        self.execute_with_lock(|e| e.subscribe_notifications(session, request_uuid, info, callback))
    }

    pub fn unsubscribe_notifications(&self, session: SessionId, request_uuid: Uuid) -> Result<()> {
        self.execute_with_lock(|e| e.unsubscribe_notifications(session, request_uuid))
    }

    // --- Domain mutations ---

    pub fn create_object(&self, spec: ObjectSpec) -> Result<Uuid> {
        self.execute_with_lock(|e| e.create_object(spec))
    }

    pub fn update_object(&self, uuid: Uuid, name: &str) -> Result<()> {
        self.execute_with_lock(|e| e.update_object(uuid, name))
    }

    pub fn join_object(&self, uuid: Uuid, container: Uuid) -> Result<()> {
        self.execute_with_lock(|e| e.join_object(uuid, container))
    }

    pub fn unjoin_object(&self, uuid: Uuid, container: Uuid) -> Result<()> {
        self.execute_with_lock(|e| e.unjoin_object(uuid, container))
    }

    pub fn delete_object(&self, uuid: Uuid) -> Result<()> {
        self.execute_with_lock(|e| e.delete_object(uuid))
    }

    pub fn restore_object(&self, uuid: Uuid) -> Result<()> {
        self.execute_with_lock(|e| e.restore_object(uuid))
    }

    pub fn set_active_status(&self, uuid: Uuid, status: ActiveStatus) -> Result<()> {
        self.execute_with_lock(|e| e.set_active_status(uuid, status))
    }

    pub fn append_data(&self, channel: ChannelId, index: IndexValue, value: DataValue) -> Result<()> {
        self.execute_with_lock(|e| e.append_data(channel, index, value))
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(DomainModel::default())
    }
}

/// Releases a session's subscriptions when it closes, however it closes.
impl SessionObserver for SubscriptionManager {
    fn session_closed(&self, session_id: SessionId, reason: &str) {
        self.release_session(session_id, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelSpec;
    use crate::types::{ContextScope, IndexKind};
    use crate::uri::EtpUri;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_is_shared_across_threads() {
        let manager = Arc::new(SubscriptionManager::default());
        let well = manager.create_object(ObjectSpec::well("Well 01")).unwrap();
        let channel = ChannelSpec::new("ROPA", "m/h", IndexKind::Time);
        manager.create_object(ObjectSpec::channel(well, channel)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                thread::spawn(move || {
                    let session = SessionId::new();
                    assert!(manager.start_channel_subscription(
                        session,
                        ChannelSubscriptionOptions::default(),
                        ChannelStreamingCallbacks::new(),
                    ));
                    let info = SubscriptionInfo::new(
                        EtpUri::parse("eml://witsml20/Well").unwrap(),
                        ContextScope::SourcesOrSelf,
                        4,
                    );
                    let added = manager.add_channel_subscription_channel_scope(session, info).unwrap();
                    assert_eq!(added.len(), 1);
                    session
                })
            })
            .collect();

        let sessions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(manager.channel_subscription_count(), 4);

        for session in sessions {
            manager.session_closed(session, "done");
        }
        assert_eq!(manager.channel_subscription_count(), 0);
    }
}
