//! Subscription state and fan-out. Only reachable through the manager lock.

use super::types::{
    ChannelDataBatch, ChannelMetadata, ChannelPartition, ChannelStreamingCallbacks,
    ChannelStreamingState, ChannelSubscriptionOptions, NotificationCallback, PartitionKind,
    RangeQuery, StartIndex, StreamingStatus, SubscriptionInfo,
};
use crate::error::{EtpError, Result};
use crate::model::{DataObject, DomainModel, ObjectEvent, ObjectSpec};
use crate::types::{
    ActiveStatus, ChannelId, DataItem, DataValue, EtpVersion, IndexValue, SessionId, Uuid,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

/// One session's channel subscription.
struct ChannelSubscription {
    options: ChannelSubscriptionOptions,
    callbacks: ChannelStreamingCallbacks,
    scopes: Vec<SubscriptionInfo>,
    channels: BTreeMap<ChannelId, ChannelStreamingState>,
}

impl ChannelSubscription {
    fn metadata(&self, model: &DomainModel, id: ChannelId) -> Option<ChannelMetadata> {
        channel_metadata(model, self.options.version, id)
    }

    /// Invoke the data callback in chunks of at most `max_data_items`.
    fn deliver(&self, session: SessionId, items: &[DataItem]) {
        let callback = match &self.callbacks.on_data_appended {
            Some(callback) => callback,
            None => return,
        };
        for chunk in items.chunks(self.options.max_data_items.max(1)) {
            callback(session, ChannelDataBatch::from_items(self.options.version, chunk));
        }
    }
}

/// A notification subscription, keyed by its request UUID.
struct NotificationSubscription {
    info: SubscriptionInfo,
    callback: NotificationCallback,
}

/// Metadata of a channel in a given wire version.
pub(crate) fn channel_metadata(
    model: &DomainModel,
    version: EtpVersion,
    id: ChannelId,
) -> Option<ChannelMetadata> {
    let object = model.channel(id)?;
    let uri = model.uri(object.uuid)?.to_string();
    match version {
        EtpVersion::V11 => object.metadata_v11(&uri).map(ChannelMetadata::V11),
        EtpVersion::V12 => object.metadata_v12(&uri).map(ChannelMetadata::V12),
    }
}

/// The subscription engine.
///
/// Owns the domain model and all per-session state. Every method assumes the
/// caller holds the manager lock, so a domain mutation and its fan-out to
/// every session happen as one step.
pub struct SubscriptionEngine {
    model: DomainModel,
    channel_subscriptions: HashMap<SessionId, ChannelSubscription>,
    notifications: HashMap<SessionId, BTreeMap<Uuid, NotificationSubscription>>,
}

impl SubscriptionEngine {
    pub fn new(model: DomainModel) -> Self {
        Self {
            model,
            channel_subscriptions: HashMap::new(),
            notifications: HashMap::new(),
        }
    }

    pub fn model(&self) -> &DomainModel {
        &self.model
    }

    /// Direct model access. Mutations made here are not fanned out.
    pub fn model_mut(&mut self) -> &mut DomainModel {
        &mut self.model
    }

    pub fn channel_subscription_count(&self) -> usize {
        self.channel_subscriptions.len()
    }

    pub fn has_channel_subscription(&self, session: SessionId) -> bool {
        self.channel_subscriptions.contains_key(&session)
    }

    /// Options of a session's channel subscription.
    pub fn channel_subscription_options(&self, session: SessionId) -> Option<&ChannelSubscriptionOptions> {
        self.channel_subscriptions.get(&session).map(|s| &s.options)
    }

    /// State of one channel, if in the session's subscription.
    pub fn channel_state(&self, session: SessionId, channel: ChannelId) -> Option<&ChannelStreamingState> {
        self.channel_subscriptions
            .get(&session)
            .and_then(|s| s.channels.get(&channel))
    }

    /// Channels in the session's subscription, any status.
    pub fn subscribed_channels(&self, session: SessionId) -> Vec<ChannelId> {
        self.channel_subscriptions
            .get(&session)
            .map(|s| s.channels.keys().copied().collect())
            .unwrap_or_default()
    }

    // --- Channel subscriptions ---

    /// Make a session eligible for channel data.
    ///
    /// Returns false when the session already subscribed with a different
    /// version or bulk flag. Starting again with the same mode keeps the
    /// existing state and callbacks.
    pub fn start_channel_subscription(
        &mut self,
        session: SessionId,
        options: ChannelSubscriptionOptions,
        callbacks: ChannelStreamingCallbacks,
    ) -> bool {
        if let Some(existing) = self.channel_subscriptions.get(&session) {
            let compatible = existing.options.version == options.version
                && existing.options.bulk_mode == options.bulk_mode;
            if !compatible {
                debug!(
                    session = %session,
                    version = %options.version,
                    bulk = options.bulk_mode,
                    "incompatible channel subscription"
                );
            }
            return compatible;
        }

        debug!(
            session = %session,
            version = %options.version,
            bulk = options.bulk_mode,
            "channel subscription started"
        );
        self.channel_subscriptions.insert(
            session,
            ChannelSubscription {
                options,
                callbacks,
                scopes: Vec::new(),
                channels: BTreeMap::new(),
            },
        );
        true
    }

    /// Add a scope and return metadata for the channels it newly brings in.
    ///
    /// Adding an identical scope again succeeds with nothing added. In bulk
    /// mode new channels start streaming from the latest index right away.
    pub fn add_channel_subscription_channel_scope(
        &mut self,
        session: SessionId,
        info: SubscriptionInfo,
    ) -> Result<Vec<ChannelMetadata>> {
        let subscription = self
            .channel_subscriptions
            .get_mut(&session)
            .ok_or_else(|| EtpError::InvalidState(format!("no channel subscription for {}", session)))?;

        if subscription.scopes.contains(&info) {
            return Ok(Vec::new());
        }
        let in_scope = self.model.channels_in_scope(&info.uri, info.scope, info.depth)?;
        subscription.scopes.push(info);

        let mut added = Vec::new();
        for id in in_scope {
            if subscription.channels.contains_key(&id) {
                continue;
            }
            subscription.channels.insert(id, initial_state(&subscription.options));
            if let Some(metadata) = subscription.metadata(&self.model, id) {
                added.push(metadata);
            }
        }
        trace!(session = %session, added = added.len(), "scope added");
        Ok(added)
    }

    pub fn has_channel_subscription_scope(&self, session: SessionId, info: &SubscriptionInfo) -> bool {
        self.channel_subscriptions
            .get(&session)
            .map_or(false, |s| s.scopes.contains(info))
    }

    /// Partition ids into started, stopped, closed and invalid.
    pub fn validate_channel_ids(
        &self,
        session: SessionId,
        ids: impl IntoIterator<Item = ChannelId>,
    ) -> ChannelPartition {
        let subscription = self.channel_subscriptions.get(&session);
        let mut partition = ChannelPartition::default();

        for id in ids {
            let state = match (self.model.channel(id), subscription) {
                (Some(_), Some(subscription)) => subscription.channels.get(&id),
                _ => None,
            };
            let kind = match state.map(|s| s.status) {
                Some(StreamingStatus::Started) => PartitionKind::Started,
                Some(StreamingStatus::Stopped) => PartitionKind::Stopped,
                Some(StreamingStatus::Closed) => PartitionKind::Closed,
                None => PartitionKind::Invalid,
            };
            partition.insert(id, kind);
        }
        partition
    }

    /// Stopped to started. Delivers the requested backlog before returning.
    ///
    /// The backlog never reaches back further than `max_index_count` points.
    pub fn start_channel_streaming(
        &mut self,
        session: SessionId,
        channel: ChannelId,
        receive_change_notification: bool,
        start: StartIndex,
    ) -> bool {
        let subscription = match self.channel_subscriptions.get_mut(&session) {
            Some(subscription) => subscription,
            None => return false,
        };
        let growing = match self.model.channel(channel).and_then(|o| o.channel.as_ref()) {
            Some(growing) => growing,
            None => return false,
        };
        let limit = subscription.options.max_index_count.max(1);

        let (start_index, backlog): (Option<IndexValue>, &[DataItem]) = match start {
            StartIndex::Latest => (None, &growing.points()[growing.len()..]),
            StartIndex::IndexCount(count) => {
                let backlog = growing.latest(count.min(limit));
                (backlog.first().map(|p| p.index), backlog)
            }
            StartIndex::Index(index) => {
                if index.kind() != growing.index_kind {
                    return false;
                }
                let from = growing.from_index(index);
                (Some(index), &from[from.len().saturating_sub(limit)..])
            }
        };

        let state = match subscription.channels.get_mut(&channel) {
            Some(state) if state.status == StreamingStatus::Stopped => state,
            _ => return false,
        };
        state.status = StreamingStatus::Started;
        state.receive_change_notification = receive_change_notification;
        state.start_index = start_index;
        state.last_delivered = backlog.last().map(|p| p.index).or(state.last_delivered);

        debug!(
            session = %session,
            channel = %channel,
            backlog = backlog.len(),
            "channel streaming started"
        );
        if !backlog.is_empty() {
            subscription.deliver(session, backlog);
        }
        true
    }

    /// Started to stopped.
    pub fn stop_channel_streaming(&mut self, session: SessionId, channel: ChannelId) -> bool {
        let state = match self
            .channel_subscriptions
            .get_mut(&session)
            .and_then(|s| s.channels.get_mut(&channel))
        {
            Some(state) if state.status == StreamingStatus::Started => state,
            _ => return false,
        };
        state.status = StreamingStatus::Stopped;
        debug!(session = %session, channel = %channel, "channel streaming stopped");
        true
    }

    /// Drop a session's channel subscription. Returns false if there was none.
    pub fn stop_channel_subscription(&mut self, session: SessionId, reason: &str) -> bool {
        match self.channel_subscriptions.remove(&session) {
            Some(subscription) => {
                if let Some(callback) = &subscription.callbacks.on_subscription_ended {
                    callback(session, reason);
                }
                debug!(
                    session = %session,
                    channels = subscription.channels.len(),
                    reason,
                    "channel subscription stopped"
                );
                true
            }
            None => false,
        }
    }

    /// Release everything a session holds.
    pub fn release_session(&mut self, session: SessionId, reason: &str) {
        self.stop_channel_subscription(session, reason);
        if let Some(subscriptions) = self.notifications.remove(&session) {
            debug!(
                session = %session,
                notifications = subscriptions.len(),
                "notification subscriptions released"
            );
        }
    }

    /// Data satisfying each query, produced lazily.
    ///
    /// Queries on channels outside the session's subscription, or closed,
    /// yield nothing. A started channel's start index clips the range.
    pub fn get_channel_data_ranges<'a>(
        &'a self,
        session: SessionId,
        queries: &'a [RangeQuery],
    ) -> impl Iterator<Item = &'a DataItem> + 'a {
        let subscription = self.channel_subscriptions.get(&session);
        queries
            .iter()
            .filter_map(move |query| {
                let state = subscription?.channels.get(&query.channel_id)?;
                if state.status == StreamingStatus::Closed {
                    return None;
                }
                let growing = self.model.channel(query.channel_id)?.channel.as_ref()?;
                if query.start.kind() != growing.index_kind || query.end.kind() != growing.index_kind {
                    return None;
                }
                let start = match state.start_index {
                    Some(low) if low > query.start => low,
                    _ => query.start,
                };
                Some(growing.range(start, query.end))
            })
            .flatten()
    }

    // --- Notification subscriptions ---

    /// Subscribe to object events within a scope.
    pub fn subscribe_notifications(
        &mut self,
        session: SessionId,
        request_uuid: Uuid,
        info: SubscriptionInfo,
        callback: NotificationCallback,
    ) -> Result<()> {
        self.model.resolve(&info.uri)?;
        let subscriptions = self.notifications.entry(session).or_default();
        if subscriptions.contains_key(&request_uuid) {
            return Err(EtpError::RequestUuidRejected(request_uuid));
        }
        subscriptions.insert(request_uuid, NotificationSubscription { info, callback });
        Ok(())
    }

    pub fn unsubscribe_notifications(&mut self, session: SessionId, request_uuid: Uuid) -> Result<()> {
        self.notifications
            .get_mut(&session)
            .and_then(|s| s.remove(&request_uuid))
            .map(|_| ())
            .ok_or_else(|| EtpError::NotFound(format!("notification subscription {}", request_uuid)))
    }

    pub fn notification_count(&self, session: SessionId) -> usize {
        self.notifications.get(&session).map_or(0, |s| s.len())
    }

    // --- Domain mutations ---

    pub fn create_object(&mut self, spec: ObjectSpec) -> Result<Uuid> {
        let event = self.model.create(spec)?;
        let uuid = event.uuid();
        self.fan_out(&event);
        Ok(uuid)
    }

    pub fn update_object(&mut self, uuid: Uuid, name: &str) -> Result<()> {
        let event = self.model.update(uuid, name)?;
        self.fan_out(&event);
        Ok(())
    }

    pub fn join_object(&mut self, uuid: Uuid, container: Uuid) -> Result<()> {
        let event = self.model.join(uuid, container)?;
        self.fan_out(&event);
        Ok(())
    }

    pub fn unjoin_object(&mut self, uuid: Uuid, container: Uuid) -> Result<()> {
        let event = self.model.unjoin(uuid, container)?;
        self.fan_out(&event);
        Ok(())
    }

    pub fn delete_object(&mut self, uuid: Uuid) -> Result<()> {
        // Notification scopes are matched before the object disappears.
        let watchers = self.notification_watchers(uuid);
        let event = self.model.delete(uuid)?;
        self.notify(&watchers, &event);
        self.fan_out_channels(&event);
        Ok(())
    }

    pub fn restore_object(&mut self, uuid: Uuid) -> Result<()> {
        let event = self.model.restore(uuid)?;
        self.fan_out(&event);
        Ok(())
    }

    pub fn set_active_status(&mut self, uuid: Uuid, status: ActiveStatus) -> Result<()> {
        if let Some(event) = self.model.set_active_status(uuid, status)? {
            self.fan_out(&event);
        }
        Ok(())
    }

    pub fn append_data(&mut self, channel: ChannelId, index: IndexValue, value: DataValue) -> Result<()> {
        let event = self.model.append(channel, index, value)?;
        self.fan_out(&event);
        Ok(())
    }

    // --- Fan-out ---

    fn fan_out(&mut self, event: &ObjectEvent) {
        let watchers = self.notification_watchers(event.uuid());
        self.notify(&watchers, event);
        self.fan_out_channels(event);
    }

    fn fan_out_channels(&mut self, event: &ObjectEvent) {
        match event {
            ObjectEvent::Created { .. } | ObjectEvent::Updated { .. } => self.rescope(false),
            ObjectEvent::Restored { uuid } => {
                self.reopen_restored(*uuid);
                self.rescope(false);
            }
            ObjectEvent::Joined { .. } => self.rescope(true),
            ObjectEvent::Unjoined { .. } => self.drop_out_of_scope(),
            ObjectEvent::Deleted { uuid } => self.close_deleted(*uuid),
            ObjectEvent::ActiveStatusChanged { uuid, status } => {
                self.active_status_changed(*uuid, *status)
            }
            ObjectEvent::DataAppended { items, .. } => self.data_appended(items),
        }
    }

    /// Channels every scope of a subscription currently covers.
    fn covered_channels(model: &DomainModel, scopes: &[SubscriptionInfo]) -> BTreeSet<ChannelId> {
        scopes
            .iter()
            .filter_map(|info| model.channels_in_scope(&info.uri, info.scope, info.depth).ok())
            .flatten()
            .collect()
    }

    /// Bring channels that entered a session's scope into its subscription.
    fn rescope(&mut self, joined: bool) {
        for (session, subscription) in self.channel_subscriptions.iter_mut() {
            if subscription.scopes.is_empty() {
                continue;
            }
            let covered = Self::covered_channels(&self.model, &subscription.scopes);
            for id in covered {
                if subscription.channels.contains_key(&id) {
                    continue;
                }
                subscription.channels.insert(id, initial_state(&subscription.options));
                let callback = if joined {
                    &subscription.callbacks.on_channel_joined
                } else {
                    &subscription.callbacks.on_channel_created
                };
                if let (Some(callback), Some(metadata)) = (callback, subscription.metadata(&self.model, id)) {
                    callback(*session, &metadata);
                }
                trace!(session = %session, channel = %id, joined, "channel entered scope");
            }
        }
    }

    /// A restored channel is back in play for sessions that saw it closed.
    fn reopen_restored(&mut self, uuid: Uuid) {
        let id = match self.model.get(uuid).and_then(DataObject::channel_id) {
            Some(id) => id,
            None => return,
        };
        for (session, subscription) in self.channel_subscriptions.iter_mut() {
            let closed = subscription
                .channels
                .get(&id)
                .map_or(false, |s| s.status == StreamingStatus::Closed);
            if !closed {
                continue;
            }
            subscription.channels.insert(id, initial_state(&subscription.options));
            if let (Some(callback), Some(metadata)) = (
                &subscription.callbacks.on_channel_created,
                subscription.metadata(&self.model, id),
            ) {
                callback(*session, &metadata);
            }
        }
    }

    /// Remove channels no scope covers any more.
    fn drop_out_of_scope(&mut self) {
        for (session, subscription) in self.channel_subscriptions.iter_mut() {
            if subscription.scopes.is_empty() {
                continue;
            }
            let covered = Self::covered_channels(&self.model, &subscription.scopes);
            let gone: Vec<ChannelId> = subscription
                .channels
                .iter()
                .filter(|(id, state)| state.status != StreamingStatus::Closed && !covered.contains(id))
                .map(|(id, _)| *id)
                .collect();
            for id in gone {
                subscription.channels.remove(&id);
                if let Some(callback) = &subscription.callbacks.on_channel_unjoined {
                    callback(*session, id);
                }
                trace!(session = %session, channel = %id, "channel left scope");
            }
        }
    }

    /// Close a deleted channel for every session holding it.
    fn close_deleted(&mut self, uuid: Uuid) {
        let id = match self.model.get(uuid).and_then(DataObject::channel_id) {
            Some(id) => id,
            None => {
                // Deleting a container can take channels out of scope.
                self.drop_out_of_scope();
                return;
            }
        };
        for (session, subscription) in self.channel_subscriptions.iter_mut() {
            let state = match subscription.channels.get_mut(&id) {
                Some(state) if state.status != StreamingStatus::Closed => state,
                _ => continue,
            };
            state.status = StreamingStatus::Closed;
            if let Some(callback) = &subscription.callbacks.on_channel_deleted {
                callback(*session, id);
            }
            debug!(session = %session, channel = %id, "channel closed");
        }
    }

    fn active_status_changed(&mut self, uuid: Uuid, status: ActiveStatus) {
        let id = match self.model.get(uuid).and_then(DataObject::channel_id) {
            Some(id) => id,
            None => return,
        };
        for (session, subscription) in &self.channel_subscriptions {
            let notify = subscription
                .channels
                .get(&id)
                .map_or(false, |s| s.status != StreamingStatus::Closed && s.receive_change_notification);
            if !notify {
                continue;
            }
            if let Some(callback) = &subscription.callbacks.on_active_status_changed {
                callback(*session, id, status);
            }
        }
    }

    /// Deliver appended points to every session streaming the channel.
    fn data_appended(&mut self, items: &[DataItem]) {
        for (session, subscription) in self.channel_subscriptions.iter_mut() {
            let mut batch = Vec::new();
            for item in items {
                let state = match subscription.channels.get_mut(&item.channel_id) {
                    Some(state) if state.status == StreamingStatus::Started => state,
                    _ => continue,
                };
                if state.start_index.map_or(false, |start| item.index < start) {
                    continue;
                }
                state.last_delivered = Some(item.index);
                batch.push(item.clone());
            }
            if !batch.is_empty() {
                subscription.deliver(*session, &batch);
            }
        }
    }

    /// Notification subscriptions whose scope covers `uuid`.
    fn notification_watchers(&self, uuid: Uuid) -> Vec<(SessionId, Uuid)> {
        let mut watchers = Vec::new();
        for (session, subscriptions) in &self.notifications {
            for (request_uuid, subscription) in subscriptions {
                let info = &subscription.info;
                let covered = self
                    .model
                    .scope(&info.uri, info.scope, info.depth)
                    .map_or(false, |scope| scope.contains(&uuid));
                if covered {
                    watchers.push((*session, *request_uuid));
                }
            }
        }
        watchers
    }

    fn notify(&self, watchers: &[(SessionId, Uuid)], event: &ObjectEvent) {
        for (session, request_uuid) in watchers {
            if let Some(subscription) = self
                .notifications
                .get(session)
                .and_then(|s| s.get(request_uuid))
            {
                (subscription.callback)(*session, event);
            }
        }
    }
}

fn initial_state(options: &ChannelSubscriptionOptions) -> ChannelStreamingState {
    let mut state = ChannelStreamingState::stopped();
    if options.bulk_mode {
        state.status = StreamingStatus::Started;
        state.receive_change_notification = true;
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelSpec;
    use crate::types::{ContextScope, IndexKind};
    use crate::uri::EtpUri;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn engine_with_ropa() -> (SubscriptionEngine, Uuid) {
        let mut engine = SubscriptionEngine::new(DomainModel::default());
        let well = engine.create_object(ObjectSpec::well("Well 01")).unwrap();
        let bore = engine
            .create_object(ObjectSpec::wellbore("Wellbore 01", well))
            .unwrap();
        let ropa = engine
            .create_object(ObjectSpec::channel(bore, ChannelSpec::new("ROPA", "m/h", IndexKind::Time)))
            .unwrap();
        (engine, ropa)
    }

    fn wells() -> SubscriptionInfo {
        SubscriptionInfo::new(
            EtpUri::parse("eml://witsml20/Well").unwrap(),
            ContextScope::SourcesOrSelf,
            8,
        )
    }

    #[test]
    fn test_incompatible_restart_rejected() {
        let (mut engine, _) = engine_with_ropa();
        let session = SessionId::new();
        let options = ChannelSubscriptionOptions::default();

        assert!(engine.start_channel_subscription(session, options.clone(), Default::default()));
        assert!(engine.start_channel_subscription(session, options.clone(), Default::default()));

        let bulk = ChannelSubscriptionOptions {
            bulk_mode: true,
            ..options.clone()
        };
        assert!(!engine.start_channel_subscription(session, bulk, Default::default()));
        let v11 = ChannelSubscriptionOptions {
            version: EtpVersion::V11,
            ..options
        };
        assert!(!engine.start_channel_subscription(session, v11, Default::default()));
    }

    #[test]
    fn test_backlog_clamped_and_chunked() {
        let (mut engine, _) = engine_with_ropa();
        for t in 1..=10 {
            engine
                .append_data(ChannelId(1), IndexValue::Time(t), DataValue::Double(t as f64))
                .unwrap();
        }

        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let session = SessionId::new();
        let options = ChannelSubscriptionOptions {
            max_data_items: 2,
            max_index_count: 5,
            ..Default::default()
        };
        engine.start_channel_subscription(
            session,
            options,
            ChannelStreamingCallbacks::new().data_appended(move |_, batch| sink.lock().push(batch.len())),
        );
        engine.add_channel_subscription_channel_scope(session, wells()).unwrap();

        assert!(engine.start_channel_streaming(session, ChannelId(1), false, StartIndex::IndexCount(8)));
        // Eight asked for, five allowed, two per batch.
        assert_eq!(*batches.lock(), vec![2, 2, 1]);
        let state = engine.channel_state(session, ChannelId(1)).unwrap();
        assert_eq!(state.start_index, Some(IndexValue::Time(6)));
        assert_eq!(state.last_delivered, Some(IndexValue::Time(10)));
    }

    #[test]
    fn test_append_respects_start_index() {
        let (mut engine, _) = engine_with_ropa();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        let session = SessionId::new();
        engine.start_channel_subscription(
            session,
            ChannelSubscriptionOptions::default(),
            ChannelStreamingCallbacks::new().data_appended(move |_, batch| {
                if let ChannelDataBatch::V12(items) = batch {
                    sink.lock().extend(items.into_iter().map(|i| i.indexes[0]));
                }
            }),
        );
        engine.add_channel_subscription_channel_scope(session, wells()).unwrap();

        engine
            .append_data(ChannelId(1), IndexValue::Time(1), DataValue::Double(1.0))
            .unwrap();
        assert!(delivered.lock().is_empty());

        assert!(engine.start_channel_streaming(
            session,
            ChannelId(1),
            false,
            StartIndex::Index(IndexValue::Time(5))
        ));
        engine
            .append_data(ChannelId(1), IndexValue::Time(3), DataValue::Double(3.0))
            .unwrap();
        engine
            .append_data(ChannelId(1), IndexValue::Time(7), DataValue::Double(7.0))
            .unwrap();
        assert_eq!(*delivered.lock(), vec![IndexValue::Time(7)]);
    }

    #[test]
    fn test_ranges_skip_closed_and_unknown() {
        let (mut engine, ropa) = engine_with_ropa();
        for t in 1..=5 {
            engine
                .append_data(ChannelId(1), IndexValue::Time(t), DataValue::Long(t))
                .unwrap();
        }
        let session = SessionId::new();
        engine.start_channel_subscription(session, Default::default(), Default::default());
        engine.add_channel_subscription_channel_scope(session, wells()).unwrap();

        let queries = [
            RangeQuery {
                channel_id: ChannelId(1),
                start: IndexValue::Time(2),
                end: IndexValue::Time(4),
            },
            RangeQuery {
                channel_id: ChannelId(99),
                start: IndexValue::Time(0),
                end: IndexValue::Time(10),
            },
        ];
        assert_eq!(engine.get_channel_data_ranges(session, &queries).count(), 3);

        engine.delete_object(ropa).unwrap();
        assert_eq!(engine.get_channel_data_ranges(session, &queries).count(), 0);
    }

    #[test]
    fn test_notifications_follow_scope() {
        let (mut engine, ropa) = engine_with_ropa();
        let session = SessionId::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let request = Uuid::new_v4();

        engine
            .subscribe_notifications(
                session,
                request,
                wells(),
                Box::new(move |_, event| sink.lock().push(event.clone())),
            )
            .unwrap();
        assert!(matches!(
            engine.subscribe_notifications(session, request, wells(), Box::new(|_, _| {})),
            Err(EtpError::RequestUuidRejected(_))
        ));

        engine.update_object(ropa, "Rate of penetration").unwrap();
        engine.delete_object(ropa).unwrap();
        assert_eq!(events.lock().len(), 2);
        assert_eq!(events.lock()[1], ObjectEvent::Deleted { uuid: ropa });

        engine.release_session(session, "closed");
        assert_eq!(engine.notification_count(session), 0);
        assert!(matches!(
            engine.unsubscribe_notifications(session, request),
            Err(EtpError::NotFound(_))
        ));
    }
}
