//! Per-topic state machine.
//!
//! One worker per federated topic, running as a single-consumer event
//! loop: each inbound event is handled to completion before the next, so
//! the state is never mutated concurrently. The worker tracks the current
//! core view, its parents toward the core, its mesh children, the
//! duplicate-suppression cache and the local-subscriber beacon, and
//! applies the forwarding rules for publications.

use crate::announcer::{self, AnnouncerHandle};
use crate::federator::FederatorContext;
use bytes::Bytes;
use fedmesh_core::broker::BrokerClient;
use fedmesh_core::cache::PubCache;
use fedmesh_core::crypto;
use fedmesh_core::envelope::{
    CoreAnn, MeshMembAck, MeshMembAnn, NodeAction, NodeAnn, RoutedPub, WorkerEvent,
};
use fedmesh_core::ids::{NodeId, PubId, Seqn};
use flume::{Receiver, Sender};
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Rate limit for secure-beacon notifications to the topology manager.
const SECURE_NOTE_INTERVAL: Duration = Duration::from_secs(2);

/// Upstream neighbor at the current (core, seqn, dist).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parent {
    pub id: NodeId,
    pub was_answered: bool,
}

/// View of a remote core, soft state refreshed by its announcements.
pub struct RemoteCore {
    pub id: NodeId,
    pub latest_seqn: Seqn,
    pub dist: u32,
    pub last_heard: Instant,
    pub parents: SmallVec<[Parent; 4]>,
    pub has_unanswered_parents: bool,
}

/// Exactly one of: no core known, this node announcing itself, or a
/// remote core view.
pub enum CoreState {
    Unknown,
    Local(AnnouncerHandle),
    Remote(RemoteCore),
}

/// Dispatch handle held by the dispatcher; events are queued onto the
/// worker's channel.
pub struct TopicWorkerHandle {
    pub topic: String,
    tx: Sender<WorkerEvent>,
}

impl TopicWorkerHandle {
    /// Spawns the worker task for `topic` and returns its handle.
    #[must_use]
    pub fn spawn(topic: String, ctx: Arc<FederatorContext>) -> Self {
        let (tx, rx) = flume::unbounded();
        let worker = TopicWorker::new(topic.clone(), ctx);
        compio::runtime::spawn(worker.run(rx)).detach();
        Self { topic, tx }
    }

    pub fn dispatch(&self, event: WorkerEvent) {
        if self.tx.send(event).is_err() {
            warn!("[worker] {}: event dropped, worker gone", self.topic);
        }
    }
}

pub struct TopicWorker {
    topic: String,
    ctx: Arc<FederatorContext>,
    core: CoreState,
    children: HashMap<NodeId, Instant>,
    cache: PubCache,
    next_id: Seqn,
    latest_beacon: Option<Instant>,
    last_secure_note: Option<Instant>,
    session_key: Option<Vec<u8>>,
}

impl TopicWorker {
    #[must_use]
    pub fn new(topic: String, ctx: Arc<FederatorContext>) -> Self {
        let cache = PubCache::new(ctx.cache_size);
        let session_key = ctx.session_key.clone();
        Self {
            topic,
            ctx,
            core: CoreState::Unknown,
            children: HashMap::new(),
            cache,
            next_id: 0,
            latest_beacon: None,
            last_secure_note: None,
            session_key,
        }
    }

    /// Event loop; ends when the dispatcher drops the sending side.
    pub async fn run(mut self, rx: Receiver<WorkerEvent>) {
        while let Ok(event) = rx.recv_async().await {
            self.handle(event).await;
        }
        debug!("[worker] {}: event channel closed", self.topic);
    }

    async fn handle(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::CoreAnn(ann) => self.handle_core_ann(ann).await,
            WorkerEvent::MembAnn(ann) => self.handle_memb_ann(ann).await,
            WorkerEvent::MembAck(ack) => self.handle_memb_ack(ack),
            WorkerEvent::Beacon { secure } => self.handle_beacon(secure).await,
            WorkerEvent::FederatedPub { payload, secure } => {
                self.handle_federated_pub(payload, secure).await;
            }
            WorkerEvent::RoutedPub { pub_msg, secure } => {
                self.handle_routed_pub(pub_msg, secure).await;
            }
        }
    }

    /// Id of the currently valid core: a remote view heard from within
    /// three announcement intervals, or this node while it announces.
    fn valid_core_id(&self) -> Option<NodeId> {
        match &self.core {
            CoreState::Remote(core) if core.last_heard.elapsed() < self.ctx.child_expiry() => {
                Some(core.id)
            }
            CoreState::Local(_) => Some(self.ctx.id),
            _ => None,
        }
    }

    fn has_local_sub(&self) -> bool {
        self.latest_beacon
            .is_some_and(|t| t.elapsed() < self.ctx.beacon_expiry())
    }

    async fn handle_core_ann(&mut self, mut ann: CoreAnn) {
        if ann.core_id == self.ctx.id || ann.sender_id == self.ctx.id {
            trace!("[worker] {}: own core ann dropped", self.topic);
            return;
        }

        // Hop count now reflects arrival at this node.
        ann.dist += 1;

        match self.valid_core_id() {
            None => self.adopt_core(ann).await,

            Some(current) if ann.core_id == current => {
                // The guard can only match a remote view: announcements
                // naming this node as core were dropped above.
                let (fresher, redundant) = match &self.core {
                    CoreState::Remote(core) => (
                        ann.seqn > core.latest_seqn || ann.dist < core.dist,
                        ann.seqn == core.latest_seqn
                            && ann.dist == core.dist
                            && !core.parents.iter().any(|p| p.id == ann.sender_id),
                    ),
                    _ => return,
                };
                if !fresher && !redundant {
                    return;
                }

                let answered = if self.has_local_sub() {
                    self.answer(&ann).await
                } else {
                    false
                };

                let CoreState::Remote(core) = &mut self.core else {
                    return;
                };
                if fresher {
                    // A fresher or closer path: current parents no longer
                    // share the witnessed (seqn, dist), start over with
                    // the announcing neighbor as sole parent.
                    core.latest_seqn = ann.seqn;
                    core.dist = ann.dist;
                    core.last_heard = Instant::now();
                    core.parents.clear();
                } else if core.parents.len() >= self.ctx.redundancy {
                    // Redundancy bound reached: the newcomer substitutes
                    // the last-added parent.
                    core.parents.pop();
                }
                core.parents.push(Parent {
                    id: ann.sender_id,
                    was_answered: answered,
                });
                core.has_unanswered_parents = core.parents.iter().any(|p| !p.was_answered);

                if fresher {
                    // The first announcement at this (seqn, dist) was
                    // already forwarded; redundant ones are not.
                    self.forward(&ann).await;
                }
            }

            Some(current) if ann.core_id < current => {
                info!(
                    "[worker] {}: core {} deposed by {}",
                    self.topic, current, ann.core_id
                );
                self.adopt_core(ann).await;
            }

            Some(_) => {
                trace!(
                    "[worker] {}: core ann from higher id {} dropped",
                    self.topic,
                    ann.core_id
                );
            }
        }
    }

    /// Installs `ann` as a fresh remote core view: children reset, the
    /// announcing neighbor becomes the sole parent, and the announcement
    /// travels on. Replacing a `Local` state drops the announcer handle,
    /// which stops its task at the next tick.
    async fn adopt_core(&mut self, ann: CoreAnn) {
        self.children.clear();

        let answered = if self.has_local_sub() {
            self.answer(&ann).await
        } else {
            false
        };

        let mut parents = SmallVec::new();
        parents.push(Parent {
            id: ann.sender_id,
            was_answered: answered,
        });

        self.core = CoreState::Remote(RemoteCore {
            id: ann.core_id,
            latest_seqn: ann.seqn,
            dist: ann.dist,
            last_heard: Instant::now(),
            parents,
            has_unanswered_parents: !answered,
        });

        info!(
            "[worker] {}: core {} adopted at dist {}",
            self.topic, ann.core_id, ann.dist
        );

        self.forward(&ann).await;
    }

    async fn handle_memb_ann(&mut self, ann: MeshMembAnn) {
        if ann.sender_id == self.ctx.id {
            return;
        }

        if ann.core_id == self.ctx.id {
            // Meaningful only while this node is the elected core: the
            // answering neighbor becomes a direct child, otherwise the
            // announcement is stale and dropped.
            if matches!(self.core, CoreState::Local(_)) {
                debug!("[worker] {}: child {} joined", self.topic, ann.sender_id);
                self.children.insert(ann.sender_id, Instant::now());
                self.send_memb_ack(&ann).await;
            }
            return;
        }

        let matches_view = matches!(
            &self.core,
            CoreState::Remote(core) if core.id == ann.core_id && core.latest_seqn == ann.seqn
        );
        if matches_view {
            debug!("[worker] {}: child {} joined", self.topic, ann.sender_id);
            self.children.insert(ann.sender_id, Instant::now());
            self.send_memb_ack(&ann).await;
            self.answer_parents().await;
        }
    }

    fn handle_memb_ack(&mut self, ack: MeshMembAck) {
        if ack.sender_id == self.ctx.id {
            return;
        }
        if let Some(key) = ack.session_key {
            if self.session_key.as_deref() != Some(key.as_slice()) {
                debug!(
                    "[worker] {}: session key received from {}",
                    self.topic, ack.sender_id
                );
                self.session_key = Some(key);
            }
        }
    }

    async fn handle_beacon(&mut self, secure: bool) {
        if secure {
            self.note_secure_beacon().await;
        }

        self.latest_beacon = Some(Instant::now());

        match self.valid_core_id() {
            Some(id) if id != self.ctx.id => self.answer_parents().await,
            Some(_) => {} // already announcing as core
            None => self.promote_to_core().await,
        }
    }

    /// Secure beacons additionally keep the topology manager informed;
    /// notifications are deduplicated per [`SECURE_NOTE_INTERVAL`] so a
    /// chatty subscriber does not spam it.
    async fn note_secure_beacon(&mut self) {
        let due = self
            .last_secure_note
            .map_or(true, |t| t.elapsed() >= SECURE_NOTE_INTERVAL);
        if !due {
            return;
        }
        self.last_secure_note = Some(Instant::now());

        if self.valid_core_id().is_none() {
            self.send_node_ann(NodeAction::UpdateCore, None).await;
        } else if self.session_key.is_none() {
            self.send_node_ann(NodeAction::Join, None).await;
        }
    }

    /// No valid core and a local subscriber exists: start announcing.
    async fn promote_to_core(&mut self) {
        info!("[worker] {}: no valid core, announcing self", self.topic);

        if self.ctx.secure && self.session_key.is_none() {
            // The elected core owns the session key; mint one and report
            // it to the topology manager.
            let key = crypto::generate_key().to_vec();
            self.send_node_ann(NodeAction::UpdatePassword, Some(key.clone()))
                .await;
            self.session_key = Some(key);
        }

        self.core = CoreState::Local(announcer::spawn(self.topic.clone(), self.ctx.clone()));
        self.children.clear();
    }

    async fn handle_federated_pub(&mut self, payload: Bytes, secure: bool) {
        let pub_msg = if secure {
            let Some(key) = &self.session_key else {
                warn!(
                    "[worker] {}: no session key, dropping secure publication",
                    self.topic
                );
                return;
            };
            let mac = match crypto::generate_mac(key, &payload) {
                Ok(mac) => mac,
                Err(e) => {
                    warn!("[worker] {}: cannot tag publication: {}", self.topic, e);
                    return;
                }
            };
            let sealed = match crypto::seal(key, &payload) {
                Ok(sealed) => sealed,
                Err(e) => {
                    warn!("[worker] {}: cannot seal publication: {}", self.topic, e);
                    return;
                }
            };
            RoutedPub {
                pub_id: self.mint_pub_id(),
                sender_id: self.ctx.id,
                payload: sealed,
                mac: Some(mac.to_vec()),
            }
        } else {
            RoutedPub {
                pub_id: self.mint_pub_id(),
                sender_id: self.ctx.id,
                payload: payload.to_vec(),
                mac: None,
            }
        };

        // Recorded before any forwarding so a looped-back copy is dropped.
        self.cache.insert(pub_msg.pub_id);
        trace!("[worker] {}: publication {} minted", self.topic, pub_msg.pub_id);

        match pub_msg.encode(&self.topic, secure) {
            Ok((channel, encoded)) => {
                let targets = self.mesh_targets(None);
                self.ctx.neighbors.send_to(&targets, &channel, encoded).await;
            }
            Err(e) => warn!("[worker] {}: encode failed: {}", self.topic, e),
        }
    }

    async fn handle_routed_pub(&mut self, mut pub_msg: RoutedPub, secure: bool) {
        if self.cache.contains(&pub_msg.pub_id) {
            trace!(
                "[worker] {}: duplicate {} suppressed",
                self.topic,
                pub_msg.pub_id
            );
            return;
        }
        self.cache.insert(pub_msg.pub_id);

        if self.has_local_sub() {
            self.deliver_local(&pub_msg, secure).await;
        }

        let origin_sender = pub_msg.sender_id;
        pub_msg.sender_id = self.ctx.id;

        match pub_msg.encode(&self.topic, secure) {
            Ok((channel, encoded)) => {
                let targets = self.mesh_targets(Some(origin_sender));
                self.ctx.neighbors.send_to(&targets, &channel, encoded).await;
            }
            Err(e) => warn!("[worker] {}: encode failed: {}", self.topic, e),
        }
    }

    /// Hands a publication to local subscribers on the bare federated
    /// topic. Secure payloads are opened and the end-to-end tag verified
    /// first; a failure skips delivery only, forwarding is unaffected.
    async fn deliver_local(&self, pub_msg: &RoutedPub, secure: bool) {
        let payload: Bytes = if secure {
            let Some(key) = &self.session_key else {
                debug!(
                    "[worker] {}: no session key, skipping local delivery",
                    self.topic
                );
                return;
            };
            let plaintext = match crypto::open(key, &pub_msg.payload) {
                Ok(plaintext) => plaintext,
                Err(_) => {
                    warn!(
                        "[worker] {}: cannot open {}, local delivery discarded",
                        self.topic, pub_msg.pub_id
                    );
                    return;
                }
            };
            let tag_ok = pub_msg
                .mac
                .as_deref()
                .is_some_and(|mac| crypto::validate_mac(key, &plaintext, mac));
            if !tag_ok {
                warn!(
                    "[worker] {}: MAC mismatch on {}, local delivery discarded",
                    self.topic, pub_msg.pub_id
                );
                return;
            }
            plaintext.into()
        } else {
            Bytes::from(pub_msg.payload.clone())
        };

        if let Err(e) = self.ctx.host.publish(&self.topic, payload, 2, false).await {
            warn!("[worker] {}: local delivery failed: {}", self.topic, e);
        }
    }

    fn mint_pub_id(&mut self) -> PubId {
        let id = PubId::new(self.ctx.id, self.next_id);
        self.next_id += 1;
        id
    }

    /// Current parents plus non-stale children, minus `exclude`. Stale
    /// children are pruned as a side effect.
    fn mesh_targets(&mut self, exclude: Option<NodeId>) -> Vec<NodeId> {
        let mut targets = Vec::new();

        if let CoreState::Remote(core) = &self.core {
            targets.extend(
                core.parents
                    .iter()
                    .map(|p| p.id)
                    .filter(|id| Some(*id) != exclude),
            );
        }

        let expiry = self.ctx.child_expiry();
        self.children.retain(|_, seen| seen.elapsed() < expiry);
        targets.extend(self.children.keys().copied().filter(|id| Some(*id) != exclude));

        targets
    }

    /// Declares mesh membership to the neighbor that sent `ann`.
    async fn answer(&self, ann: &CoreAnn) -> bool {
        let memb = MeshMembAnn {
            core_id: ann.core_id,
            sender_id: self.ctx.id,
            seqn: ann.seqn,
        };
        match memb.encode(&self.topic) {
            Ok((channel, payload)) => {
                self.ctx
                    .neighbors
                    .publish(ann.sender_id, &channel, payload, 2, false)
                    .await
            }
            Err(e) => {
                warn!("[worker] {}: encode failed: {}", self.topic, e);
                false
            }
        }
    }

    /// Sends a membership announcement to every parent not yet answered.
    /// Each successfully answered parent is marked in place; the summary
    /// flag clears only once no unanswered parent remains, so a failed
    /// send is retried on the next trigger.
    async fn answer_parents(&mut self) {
        let CoreState::Remote(core) = &self.core else {
            return;
        };
        if !core.has_unanswered_parents {
            return;
        }

        let memb = MeshMembAnn {
            core_id: core.id,
            sender_id: self.ctx.id,
            seqn: core.latest_seqn,
        };
        let (channel, payload) = match memb.encode(&self.topic) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("[worker] {}: encode failed: {}", self.topic, e);
                return;
            }
        };

        let pending: Vec<NodeId> = core
            .parents
            .iter()
            .filter(|p| !p.was_answered)
            .map(|p| p.id)
            .collect();

        let mut answered = Vec::with_capacity(pending.len());
        for id in pending {
            if self
                .ctx
                .neighbors
                .publish(id, &channel, payload.clone(), 2, false)
                .await
            {
                answered.push(id);
            }
        }

        let CoreState::Remote(core) = &mut self.core else {
            return;
        };
        for parent in core.parents.iter_mut() {
            if answered.contains(&parent.id) {
                parent.was_answered = true;
            }
        }
        core.has_unanswered_parents = core.parents.iter().any(|p| !p.was_answered);
    }

    /// Secure variant: acknowledge a new child, handing the session key
    /// down the mesh.
    async fn send_memb_ack(&self, ann: &MeshMembAnn) {
        let Some(key) = &self.session_key else {
            return;
        };
        let ack = MeshMembAck {
            core_id: ann.core_id,
            sender_id: self.ctx.id,
            seqn: ann.seqn,
            session_key: Some(key.clone()),
        };
        match ack.encode(&self.topic) {
            Ok((channel, payload)) => {
                self.ctx
                    .neighbors
                    .publish(ann.sender_id, &channel, payload, 2, false)
                    .await;
            }
            Err(e) => warn!("[worker] {}: encode failed: {}", self.topic, e),
        }
    }

    /// Passes a core announcement on to every neighbor except the one it
    /// came from. The hop count was already incremented on receipt.
    async fn forward(&self, ann: &CoreAnn) {
        let fwd = CoreAnn {
            core_id: ann.core_id,
            sender_id: self.ctx.id,
            seqn: ann.seqn,
            dist: ann.dist,
        };
        let (channel, payload) = match fwd.encode(&self.topic) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("[worker] {}: encode failed: {}", self.topic, e);
                return;
            }
        };

        for (id, client) in self.ctx.neighbors.snapshot() {
            if id == ann.sender_id {
                continue;
            }
            if let Err(e) = client.publish(&channel, payload.clone(), 2, false).await {
                warn!("[worker] {}: forward to {} failed: {}", self.topic, id, e);
            }
        }
    }

    /// Reports to the topology manager on this federator's node channel,
    /// sealed with the shared key when one is configured.
    async fn send_node_ann(&self, action: NodeAction, password: Option<Vec<u8>>) {
        let ann = NodeAnn {
            id: self.ctx.id,
            topic: self.topic.clone(),
            action,
            password,
        };
        let (channel, payload) = match ann.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("[worker] {}: encode failed: {}", self.topic, e);
                return;
            }
        };

        let payload: Bytes = match &self.ctx.shared_key {
            Some(key) => match crypto::seal(key, &payload) {
                Ok(sealed) => sealed.into(),
                Err(e) => {
                    warn!("[worker] {}: cannot seal node ann: {}", self.topic, e);
                    return;
                }
            },
            None => payload,
        };

        if let Err(e) = self.ctx.host.publish(&channel, payload, 2, false).await {
            warn!("[worker] {}: node ann failed: {}", self.topic, e);
        }
    }
}
