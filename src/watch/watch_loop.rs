//! One-shot watches turned into a continuous snapshot stream.
//!
//! A [`WatchLoop`] owns one subtree. Each pass reads the subtree while leaving a
//! watch on every node it visited, so the watches for the next change are in
//! place before the snapshot is handed to the sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::select_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::metrics::WATCH_FIRES;
use crate::utils::async_task::sleep_or_cancelled;
use crate::utils::backoff::ExponentialBackoff;
use crate::utils::path;
use crate::BackoffPolicy;
use crate::Record;
use crate::Result;
use crate::StoreClient;
use crate::WatchEvent;
use crate::WatchHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for a watch to fire or for the stop signal
    Watching,
    /// Re-reading the subtree and re-arming its watches
    Refreshing,
    Stopped,
}

/// How far below the root the records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubtreeDepth {
    /// `root/<record>`
    Leaves,
    /// `root/<group>/<record>`, e.g. current states grouped by session
    Nested,
}

#[async_trait]
pub(crate) trait SnapshotSink: Send + Sync + 'static {
    /// Hands over one snapshot. Returning `false` ends the loop.
    async fn deliver(
        &self,
        records: Vec<Record>,
    ) -> bool;
}

pub(crate) struct WatchLoop<S> {
    pub(crate) client: Arc<StoreClient>,
    pub(crate) root: String,
    pub(crate) depth: SubtreeDepth,
    pub(crate) sink: S,
    /// Deliver the snapshot taken when the loop starts
    pub(crate) emit_initial: bool,
    /// Delay between failed re-arm passes; the loop never gives up
    pub(crate) backoff: BackoffPolicy,
}

/// Control side of a spawned [`WatchLoop`].
#[derive(Debug)]
pub(crate) struct LoopHandle {
    stop: CancellationToken,
    state: watch::Receiver<LoopState>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    pub(crate) fn stop(&self) {
        self.stop.cancel();
    }

    pub(crate) fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub(crate) async fn join(self) {
        if let Err(e) = self.join.await {
            warn!("watch loop task failed: {:?}", e);
        }
    }
}

type Snapshot = (Vec<Record>, Vec<WatchHandle>);

impl<S: SnapshotSink> WatchLoop<S> {
    /// Starts the loop on `runtime`; it runs until `stop` is cancelled or the sink closes.
    pub(crate) fn spawn(
        self,
        runtime: &tokio::runtime::Handle,
        stop: CancellationToken,
    ) -> LoopHandle {
        let (state_tx, state_rx) = watch::channel(LoopState::Refreshing);
        let join = runtime.spawn(self.run(stop.clone(), state_tx));
        LoopHandle {
            stop,
            state: state_rx,
            join,
        }
    }

    async fn run(
        self,
        stop: CancellationToken,
        state: watch::Sender<LoopState>,
    ) {
        info!(root = %self.root, "watch loop started");
        let _ = state.send(LoopState::Refreshing);

        let mut handles = match self.arm_until_ok(&stop).await {
            Some((records, handles)) => {
                if self.emit_initial && !self.deliver(records, &stop).await {
                    let _ = state.send(LoopState::Stopped);
                    return;
                }
                handles
            }
            None => {
                let _ = state.send(LoopState::Stopped);
                return;
            }
        };

        loop {
            let _ = state.send(LoopState::Watching);
            let event = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                (fired, _, _) = select_all(handles) => fired.unwrap_or(WatchEvent::Invalidated),
            };

            let _ = state.send(LoopState::Refreshing);
            WATCH_FIRES.with_label_values(&[event_label(event)]).inc();
            trace!(root = %self.root, ?event, "watch fired");

            let (records, next) = match self.arm_until_ok(&stop).await {
                Some(snapshot) => snapshot,
                None => break,
            };
            handles = next;

            if !self.deliver(records, &stop).await {
                break;
            }
        }

        let _ = state.send(LoopState::Stopped);
        info!(root = %self.root, "watch loop stopped");
    }

    async fn deliver(
        &self,
        records: Vec<Record>,
        stop: &CancellationToken,
    ) -> bool {
        tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            open = self.sink.deliver(records) => open,
        }
    }

    /// Re-reads and re-arms until it succeeds, backing off between failures.
    ///
    /// Returns `None` once `stop` fires.
    async fn arm_until_ok(
        &self,
        stop: &CancellationToken,
    ) -> Option<Snapshot> {
        let mut backoff = ExponentialBackoff::new(self.backoff);
        loop {
            let attempt = tokio::select! {
                biased;
                _ = stop.cancelled() => return None,
                r = self.arm() => r,
            };
            match attempt {
                Ok(snapshot) => return Some(snapshot),
                Err(e) => {
                    let delay = backoff
                        .next_delay()
                        .unwrap_or(Duration::from_millis(self.backoff.max_delay_ms));
                    warn!(root = %self.root, "re-arming watches failed, retrying in {:?}: {}", delay, e);
                    if !sleep_or_cancelled(delay, stop).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Reads the subtree and leaves a watch on the root and on every node visited.
    async fn arm(&self) -> Result<Snapshot> {
        let mut handles = Vec::new();

        let children = loop {
            match self.client.children_watch(&self.root).await {
                Ok((children, w)) => {
                    handles.push(w);
                    break children;
                }
                Err(e) if e.is_not_found() => {
                    let (stat, w) = self.client.exists_watch(&self.root).await?;
                    handles.push(w);
                    if stat.is_none() {
                        debug!(root = %self.root, "root absent, waiting for creation");
                        return Ok((Vec::new(), handles));
                    }
                }
                Err(e) => return Err(e),
            }
        };

        let mut records = Vec::new();
        for child in children {
            let child_path = path::join(&self.root, &child);
            match self.depth {
                SubtreeDepth::Leaves => {
                    self.read_leaf(&child_path, &mut records, &mut handles).await?;
                }
                SubtreeDepth::Nested => {
                    let grandchildren = match self.client.children_watch(&child_path).await {
                        Ok((names, w)) => {
                            handles.push(w);
                            names
                        }
                        // removal already fired the root watch
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => return Err(e),
                    };
                    for name in grandchildren {
                        let leaf = path::join(&child_path, &name);
                        self.read_leaf(&leaf, &mut records, &mut handles).await?;
                    }
                }
            }
        }
        Ok((records, handles))
    }

    async fn read_leaf(
        &self,
        leaf: &str,
        records: &mut Vec<Record>,
        handles: &mut Vec<WatchHandle>,
    ) -> Result<()> {
        let (data, w) = match self.client.get_watch(leaf).await {
            Ok(v) => v,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        handles.push(w);

        if data.value.is_empty() {
            trace!(path = %leaf, "skipping empty node");
            return Ok(());
        }
        match Record::unmarshal_at(leaf, &data.value) {
            Ok(r) => records.push(r),
            // a bad payload costs this one read, the loop keeps going
            Err(e) => warn!(path = %leaf, "skipping record: {}", e),
        }
        Ok(())
    }
}

fn event_label(event: WatchEvent) -> &'static str {
    match event {
        WatchEvent::NodeCreated => "node_created",
        WatchEvent::NodeDeleted => "node_deleted",
        WatchEvent::DataChanged => "data_changed",
        WatchEvent::ChildrenChanged => "children_changed",
        WatchEvent::Invalidated => "invalidated",
    }
}
