//! Core announcer.
//!
//! Runs while the owning topic worker is acting as core for its topic:
//! every interval it emits a CoreAnn (seqn incremented per round, dist 0)
//! to every neighbor currently in the registry, retained so late-joining
//! neighbors learn the current core promptly.
//!
//! Cancellation is by handle drop: the stop channel disconnects and the
//! task observes it at its next tick.

use crate::federator::FederatorContext;
use fedmesh_core::broker::BrokerClient;
use fedmesh_core::envelope::CoreAnn;
use flume::Receiver;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle owned by the topic worker; dropping it stops the task.
pub struct AnnouncerHandle {
    _stop: flume::Sender<()>,
}

/// Spawns an announcer for `topic`.
#[must_use]
pub fn spawn(topic: String, ctx: Arc<FederatorContext>) -> AnnouncerHandle {
    let (stop_tx, stop_rx) = flume::bounded(1);
    compio::runtime::spawn(run(topic, ctx, stop_rx)).detach();
    AnnouncerHandle { _stop: stop_tx }
}

async fn run(topic: String, ctx: Arc<FederatorContext>, stop: Receiver<()>) {
    debug!("[announcer] {}: start announcing as core", topic);

    let mut ann = CoreAnn {
        core_id: ctx.id,
        sender_id: ctx.id,
        seqn: 0,
        dist: 0,
    };

    loop {
        let tick = compio::time::sleep(ctx.core_ann_interval).fuse();
        futures::pin_mut!(tick);

        let stopped = futures::select! {
            _ = stop.recv_async().fuse() => true,
            _ = tick => false,
        };
        if stopped {
            break;
        }

        match ann.encode(&topic) {
            Ok((channel, payload)) => {
                for (id, client) in ctx.neighbors.snapshot() {
                    if let Err(e) = client.publish(&channel, payload.clone(), 2, true).await {
                        warn!("[announcer] {}: publish to {} failed: {}", topic, id, e);
                    }
                }
            }
            Err(e) => warn!("[announcer] {}: encode failed: {}", topic, e),
        }

        ann.seqn += 1;
    }

    debug!("[announcer] {}: stop announcing as core", topic);
}
