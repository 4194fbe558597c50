//! Synthetic channel data on a timer.
//!
//! Every tick appends one point to each live channel, all under a single
//! manager lock, so subscribed sessions see one batch per tick.

use crate::config::GeneratorConfig;
use crate::subscriptions::{SubscriptionEngine, SubscriptionManager};
use crate::types::{ChannelId, DataValue, IndexKind, IndexValue, Timestamp};
use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Value of a channel at a tick: a slow sine wave, offset per channel.
pub fn sample(channel: ChannelId, tick: u64) -> f64 {
    let phase = tick as f64 * 0.1 + channel.0 as f64;
    (phase.sin() * 100.0).round() / 10.0
}

/// Next index after `last` for a channel of `kind`.
fn next_index(kind: IndexKind, last: Option<IndexValue>, depth_step: f64) -> IndexValue {
    match (kind, last) {
        (IndexKind::Time, Some(IndexValue::Time(last))) => IndexValue::Time(Timestamp::now().0.max(last + 1)),
        (IndexKind::Time, _) => IndexValue::Time(Timestamp::now().0),
        (IndexKind::Depth, Some(IndexValue::Depth(last))) => IndexValue::Depth(last + depth_step),
        (IndexKind::Depth, _) => IndexValue::Depth(0.0),
    }
}

/// Append one point to every live channel. Returns the number appended.
pub fn generate_once(engine: &mut SubscriptionEngine, config: &GeneratorConfig, tick: u64) -> usize {
    let targets: Vec<(ChannelId, IndexValue)> = engine
        .model()
        .channel_ids()
        .filter_map(|id| {
            let object = engine.model().channel(id)?;
            if object.deleted {
                return None;
            }
            let channel = object.channel.as_ref()?;
            Some((id, next_index(channel.index_kind, channel.last_index(), config.depth_step)))
        })
        .collect();

    let mut appended = 0;
    for (id, index) in targets {
        match engine.append_data(id, index, DataValue::Double(sample(id, tick))) {
            Ok(()) => appended += 1,
            Err(e) => warn!(channel = %id, error = %e, "generated point rejected"),
        }
    }
    appended
}

/// Background thread feeding [`generate_once`] from a crossbeam ticker.
pub struct DataGenerator {
    stop: Sender<()>,
    handle: Option<JoinHandle<u64>>,
}

impl DataGenerator {
    pub fn spawn(manager: Arc<SubscriptionManager>, config: GeneratorConfig) -> Self {
        let (stop, stop_rx) = bounded::<()>(1);
        let ticker = tick(config.interval());
        debug!(interval_ms = config.interval_ms, "generator started");

        let handle = thread::spawn(move || {
            let mut ticks = 0u64;
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let appended = manager.execute_with_lock(|engine| generate_once(engine, &config, ticks));
                        trace!(tick = ticks, appended, "generator tick");
                        ticks += 1;
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
            debug!(ticks, "generator stopped");
            ticks
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop ticking and return the number of ticks run.
    pub fn stop(mut self) -> u64 {
        self.stop_inner()
    }

    fn stop_inner(&mut self) -> u64 {
        let _ = self.stop.try_send(());
        self.handle.take().and_then(|h| h.join().ok()).unwrap_or(0)
    }
}

impl Drop for DataGenerator {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop_inner();
        }
    }
}
