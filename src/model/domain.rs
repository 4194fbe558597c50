//! The object graph: resolution, scope queries and mutations.

use super::objects::{DataObject, GrowingChannel, ObjectKind};
use crate::error::{EtpError, Result};
use crate::types::{
    ActiveStatus, ChannelId, ContextScope, DataItem, DataValue, IndexKind, IndexValue, Timestamp,
    Uuid,
};
use crate::uri::EtpUri;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::trace;

/// Default data family of the model.
pub const DEFAULT_FAMILY: &str = "witsml20";

/// A change to the object graph.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectEvent {
    Created { uuid: Uuid },
    Updated { uuid: Uuid },
    Joined { uuid: Uuid, container: Uuid },
    Unjoined { uuid: Uuid, container: Uuid },
    Deleted { uuid: Uuid },
    Restored { uuid: Uuid },
    ActiveStatusChanged { uuid: Uuid, status: ActiveStatus },
    DataAppended { uuid: Uuid, items: Vec<DataItem> },
}

impl ObjectEvent {
    pub fn uuid(&self) -> Uuid {
        match self {
            ObjectEvent::Created { uuid }
            | ObjectEvent::Updated { uuid }
            | ObjectEvent::Joined { uuid, .. }
            | ObjectEvent::Unjoined { uuid, .. }
            | ObjectEvent::Deleted { uuid }
            | ObjectEvent::Restored { uuid }
            | ObjectEvent::ActiveStatusChanged { uuid, .. }
            | ObjectEvent::DataAppended { uuid, .. } => *uuid,
        }
    }
}

/// Channel part of a new object.
#[derive(Clone, Debug)]
pub struct ChannelSpec {
    pub mnemonic: String,
    pub uom: String,
    pub data_type: String,
    pub index_kind: IndexKind,
}

impl ChannelSpec {
    pub fn new(mnemonic: impl Into<String>, uom: impl Into<String>, index_kind: IndexKind) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            uom: uom.into(),
            data_type: "double".to_string(),
            index_kind,
        }
    }
}

/// Everything needed to create an object.
#[derive(Clone, Debug)]
pub struct ObjectSpec {
    pub kind: ObjectKind,
    pub name: String,
    pub parent: Option<Uuid>,
    pub channel: Option<ChannelSpec>,
}

impl ObjectSpec {
    pub fn well(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Well,
            name: name.into(),
            parent: None,
            channel: None,
        }
    }

    pub fn wellbore(name: impl Into<String>, well: Uuid) -> Self {
        Self {
            kind: ObjectKind::Wellbore,
            name: name.into(),
            parent: Some(well),
            channel: None,
        }
    }

    pub fn channel_set(name: impl Into<String>, wellbore: Uuid) -> Self {
        Self {
            kind: ObjectKind::ChannelSet,
            name: name.into(),
            parent: Some(wellbore),
            channel: None,
        }
    }

    pub fn channel(parent: Uuid, channel: ChannelSpec) -> Self {
        Self {
            kind: ObjectKind::Channel,
            name: channel.mnemonic.clone(),
            parent: Some(parent),
            channel: Some(channel),
        }
    }
}

type ObjectObserver = Box<dyn Fn(&ObjectEvent) + Send>;

/// In-memory object graph.
///
/// Edges point from an object to its targets (parent and joined containers).
/// Sources of an object are the objects pointing at it. Deleted objects stay
/// in the graph, flagged, so they can be restored.
pub struct DomainModel {
    family: String,
    objects: HashMap<Uuid, DataObject>,
    channels: HashMap<ChannelId, Uuid>,
    next_channel_id: i64,
    observers: Vec<ObjectObserver>,
}

impl Default for DomainModel {
    fn default() -> Self {
        Self::new(DEFAULT_FAMILY)
    }
}

impl DomainModel {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            objects: HashMap::new(),
            channels: HashMap::new(),
            next_channel_id: 1,
            observers: Vec::new(),
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Observe every mutation, synchronously.
    pub fn add_observer(&mut self, observer: impl Fn(&ObjectEvent) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    // --- Lookup ---

    pub fn get(&self, uuid: Uuid) -> Option<&DataObject> {
        self.objects.get(&uuid)
    }

    /// The channel object with this id, deleted or not.
    pub fn channel(&self, id: ChannelId) -> Option<&DataObject> {
        self.channels.get(&id).and_then(|uuid| self.objects.get(uuid))
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.keys().copied()
    }

    pub fn find_channel(&self, mnemonic: &str) -> Option<&DataObject> {
        self.objects.values().find(|o| {
            o.channel
                .as_ref()
                .map_or(false, |c| c.mnemonic == mnemonic)
        })
    }

    /// Canonical URI, built from the parent chain.
    pub fn uri(&self, uuid: Uuid) -> Option<EtpUri> {
        let mut chain = Vec::new();
        let mut current = Some(uuid);
        while let Some(id) = current {
            let object = self.objects.get(&id)?;
            chain.push((object.kind, id));
            current = object.parent;
            if chain.len() > self.objects.len() {
                return None;
            }
        }
        let mut uri = EtpUri::family(self.family.clone());
        for (kind, id) in chain.into_iter().rev() {
            uri = uri.child(kind.type_name(), id);
        }
        Some(uri)
    }

    /// Objects a URI names.
    ///
    /// - `eml://` or `eml://family`: every live top-level object
    /// - `.../Type(uuid)`: that object, which must exist
    /// - `.../Type` folder: live objects of that type under the preceding
    ///   object, or top-level objects when there is none
    pub fn resolve(&self, uri: &EtpUri) -> Result<Vec<Uuid>> {
        if let Some(family) = uri.data_family() {
            if family != self.family {
                return Err(EtpError::InvalidUri(format!(
                    "{} is not in data family {}",
                    uri, self.family
                )));
            }
        }

        let last = match uri.last() {
            None => {
                return Ok(self
                    .live()
                    .filter(|o| o.parent.is_none())
                    .map(|o| o.uuid)
                    .collect())
            }
            Some(last) => last,
        };

        let kind = ObjectKind::from_type_name(&last.object_type)
            .ok_or_else(|| EtpError::InvalidUri(format!("unknown object type in {}", uri)))?;

        if let Some(id) = last.id {
            return match self.objects.get(&id) {
                Some(object) if object.kind == kind && !object.deleted => Ok(vec![id]),
                _ => Err(EtpError::NotFound(uri.to_string())),
            };
        }

        let segments = uri.segments();
        let container = segments[..segments.len() - 1]
            .iter()
            .rev()
            .find_map(|s| s.id);
        if let Some(container) = container {
            if !self.objects.contains_key(&container) {
                return Err(EtpError::NotFound(uri.to_string()));
            }
        }

        Ok(self
            .live()
            .filter(|o| o.kind == kind)
            .filter(|o| match container {
                Some(container) => o.refers_to(container),
                None => o.parent.is_none(),
            })
            .map(|o| o.uuid)
            .collect())
    }

    /// Objects reachable from a URI within `depth` steps in the scope's
    /// direction, sorted.
    pub fn scope(&self, uri: &EtpUri, scope: ContextScope, depth: u32) -> Result<BTreeSet<Uuid>> {
        let roots = self.resolve(uri)?;
        Ok(self.walk(&roots, scope, depth))
    }

    /// Live channels reachable from a URI.
    pub fn channels_in_scope(
        &self,
        uri: &EtpUri,
        scope: ContextScope,
        depth: u32,
    ) -> Result<BTreeSet<ChannelId>> {
        Ok(self
            .scope(uri, scope, depth)?
            .into_iter()
            .filter_map(|uuid| self.objects.get(&uuid))
            .filter(|o| !o.deleted)
            .filter_map(DataObject::channel_id)
            .collect())
    }

    fn walk(&self, roots: &[Uuid], scope: ContextScope, depth: u32) -> BTreeSet<Uuid> {
        let mut found = BTreeSet::new();
        if scope.includes_self() {
            found.extend(roots.iter().copied());
        }

        let mut seen: BTreeSet<Uuid> = roots.iter().copied().collect();
        let mut queue: VecDeque<(Uuid, u32)> = roots.iter().map(|r| (*r, 0)).collect();

        while let Some((uuid, distance)) = queue.pop_front() {
            if distance >= depth {
                continue;
            }
            let next: Vec<Uuid> = if scope.includes_sources() {
                self.live()
                    .filter(|o| o.refers_to(uuid))
                    .map(|o| o.uuid)
                    .collect()
            } else if scope.includes_targets() {
                self.objects
                    .get(&uuid)
                    .map(|o| o.targets().collect())
                    .unwrap_or_default()
            } else {
                Vec::new()
            };

            for id in next {
                let live = self.objects.get(&id).map_or(false, |o| !o.deleted);
                if live && seen.insert(id) {
                    found.insert(id);
                    queue.push_back((id, distance + 1));
                }
            }
        }
        found
    }

    fn live(&self) -> impl Iterator<Item = &DataObject> + '_ {
        self.objects.values().filter(|o| !o.deleted)
    }

    // --- Mutations ---

    /// Create an object. Channels are assigned the next channel id.
    pub fn create(&mut self, spec: ObjectSpec) -> Result<ObjectEvent> {
        if let Some(parent) = spec.parent {
            match self.objects.get(&parent) {
                Some(p) if !p.deleted => {}
                _ => return Err(EtpError::NotFound(format!("parent {}", parent))),
            }
        }
        if spec.kind == ObjectKind::Channel && spec.channel.is_none() {
            return Err(EtpError::InvalidArgument(
                "a channel needs channel metadata".to_string(),
            ));
        }

        let mut object = DataObject::new(spec.kind, spec.name, spec.parent);
        if let Some(channel) = spec.channel {
            let id = ChannelId(self.next_channel_id);
            self.next_channel_id += 1;
            object.channel = Some(GrowingChannel::new(
                id,
                channel.mnemonic,
                channel.uom,
                channel.data_type,
                channel.index_kind,
            ));
            self.channels.insert(id, object.uuid);
        }

        let uuid = object.uuid;
        self.objects.insert(uuid, object);
        Ok(self.emit(ObjectEvent::Created { uuid }))
    }

    pub fn update(&mut self, uuid: Uuid, name: impl Into<String>) -> Result<ObjectEvent> {
        let object = self.live_mut(uuid)?;
        object.name = name.into();
        object.last_update = Timestamp::now();
        Ok(self.emit(ObjectEvent::Updated { uuid }))
    }

    /// Add `container` as an extra container of `uuid`.
    pub fn join(&mut self, uuid: Uuid, container: Uuid) -> Result<ObjectEvent> {
        if uuid == container || self.objects.get(&container).map_or(true, |c| c.deleted) {
            return Err(EtpError::NotFound(format!("container {}", container)));
        }
        let object = self.live_mut(uuid)?;
        if object.parent == Some(container) || !object.joined.insert(container) {
            return Err(EtpError::InvalidState(format!(
                "{} already belongs to {}",
                uuid, container
            )));
        }
        object.last_update = Timestamp::now();
        Ok(self.emit(ObjectEvent::Joined { uuid, container }))
    }

    pub fn unjoin(&mut self, uuid: Uuid, container: Uuid) -> Result<ObjectEvent> {
        let object = self.live_mut(uuid)?;
        if !object.joined.remove(&container) {
            return Err(EtpError::NotFound(format!(
                "{} is not joined to {}",
                uuid, container
            )));
        }
        object.last_update = Timestamp::now();
        Ok(self.emit(ObjectEvent::Unjoined { uuid, container }))
    }

    /// Soft delete.
    pub fn delete(&mut self, uuid: Uuid) -> Result<ObjectEvent> {
        let object = self.live_mut(uuid)?;
        object.deleted = true;
        object.last_update = Timestamp::now();
        Ok(self.emit(ObjectEvent::Deleted { uuid }))
    }

    pub fn restore(&mut self, uuid: Uuid) -> Result<ObjectEvent> {
        let object = self
            .objects
            .get_mut(&uuid)
            .ok_or_else(|| EtpError::NotFound(uuid.to_string()))?;
        if !object.deleted {
            return Err(EtpError::InvalidState(format!("{} is not deleted", uuid)));
        }
        object.deleted = false;
        object.last_update = Timestamp::now();
        Ok(self.emit(ObjectEvent::Restored { uuid }))
    }

    pub fn set_active_status(&mut self, uuid: Uuid, status: ActiveStatus) -> Result<Option<ObjectEvent>> {
        let object = self.live_mut(uuid)?;
        if object.active_status == status {
            return Ok(None);
        }
        object.active_status = status;
        object.last_update = Timestamp::now();
        Ok(Some(self.emit(ObjectEvent::ActiveStatusChanged { uuid, status })))
    }

    /// Append one point to a live channel.
    pub fn append(
        &mut self,
        channel_id: ChannelId,
        index: IndexValue,
        value: DataValue,
    ) -> Result<ObjectEvent> {
        let uuid = *self
            .channels
            .get(&channel_id)
            .ok_or(EtpError::InvalidChannelId(channel_id))?;
        let object = self.live_mut(uuid)?;
        let channel = object
            .channel
            .as_mut()
            .ok_or(EtpError::InvalidChannelId(channel_id))?;
        let item = channel.append(index, value, true)?;
        object.last_update = Timestamp::now();
        trace!(channel = %channel_id, index = ?item.index, "appended");
        Ok(self.emit(ObjectEvent::DataAppended {
            uuid,
            items: vec![item],
        }))
    }

    fn live_mut(&mut self, uuid: Uuid) -> Result<&mut DataObject> {
        match self.objects.get_mut(&uuid) {
            Some(object) if !object.deleted => Ok(object),
            _ => Err(EtpError::NotFound(uuid.to_string())),
        }
    }

    fn emit(&self, event: ObjectEvent) -> ObjectEvent {
        for observer in &self.observers {
            observer(&event);
        }
        event
    }
}
