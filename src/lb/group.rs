//! Latency-ranked group of remotes
//!
//! Members live in a binary min-heap keyed on their latency estimate, with the
//! error count breaking ties. A dial pops members best-first until one
//! connects, then a background pass re-probes every member to refresh the
//! ranking for later calls.
//!
//! # Locking
//!
//! One async mutex guards the heap and every member's ranking state. `dial`
//! holds it for the whole selection, network I/O included, so concurrent
//! dials on the same group are serialized. The re-probe pass takes the same
//! lock and likewise holds it while it dials and pings every member.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::heap::IndexedHeap;
use super::latency::LatencyEstimate;
use super::Target;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::pool::Connection;

/// Delay before the re-probe pass starts, letting the caller run first
pub const PROBE_DELAY: Duration = Duration::from_micros(100);

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct HeapItem {
    target: Target,
    /// Current slot in the heap
    index: usize,
    latency: LatencyEstimate,
    /// Failures observed so far. Never reset.
    error_count: u32,
}

impl HeapItem {
    fn new(target: Target) -> Self {
        Self {
            target,
            index: 0,
            latency: LatencyEstimate::new(),
            error_count: 0,
        }
    }

    fn record_failure(&mut self) {
        self.latency.reset();
        self.error_count = self.error_count.saturating_add(1);
    }
}

/// `a` ranks before `b` when it has the better latency, or when both
/// estimates are identical and `a` has failed less often.
fn item_less(a: &HeapItem, b: &HeapItem) -> bool {
    a.latency.better_than(&b.latency) || (a.latency == b.latency && a.error_count < b.error_count)
}

fn set_item_index(item: &mut HeapItem, index: usize) {
    item.index = index;
}

/// Ranking snapshot of one group member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberStats {
    /// Slot in the heap when the snapshot was taken
    pub position: usize,
    pub label: String,
    /// `None` when unmeasured
    pub latency: Option<Duration>,
    pub error_count: u32,
}

/// A load-balanced set of remotes
pub struct Group {
    /// Process-unique, used to tell nested groups apart in logs and stats
    id: u64,
    heap: Mutex<IndexedHeap<HeapItem>>,
}

impl Group {
    /// Build a group from one or more targets
    pub fn new(targets: Vec<Target>) -> Result<Self> {
        if targets.is_empty() {
            return Err(Error::Configuration(
                "attempted to create empty remote group".to_string(),
            ));
        }
        Ok(Self::with_members(targets))
    }

    pub(crate) fn pair(a: Target, b: Target) -> Self {
        Self::with_members(vec![a, b])
    }

    fn with_members(targets: Vec<Target>) -> Self {
        let mut heap = IndexedHeap::new(item_less, set_item_index);
        for target in targets {
            heap.push(HeapItem::new(target));
        }
        Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            heap: Mutex::new(heap),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// "group#<id>"
    pub fn label(&self) -> String {
        format!("group#{}", self.id)
    }

    /// Number of members
    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Dial the best-ranked member that accepts a connection.
    ///
    /// Members that fail are penalized and the next best is tried. Fails only
    /// when every member failed. On success a background pass re-probes all
    /// members without delaying the caller.
    pub async fn dial(self: &Arc<Self>, client: &Arc<Client>) -> Result<Arc<dyn Connection>> {
        let mut heap = self.heap.lock().await;

        let mut popped = Vec::with_capacity(heap.len());
        let mut conn = None;
        let mut last_err = None;

        while let Some(mut item) = heap.pop() {
            match item.target.dial(client).await {
                Ok(c) => {
                    conn = Some(c);
                    popped.push(item);
                    break;
                }
                Err(e) => {
                    debug!(remote = %item.target.label(), error = %e, "Dial failed");
                    item.record_failure();
                    last_err = Some(e);
                    popped.push(item);
                }
            }
        }

        let attempts = popped.len();
        for item in popped {
            heap.push(item);
        }
        drop(heap);

        match conn {
            Some(conn) => {
                self.spawn_refresh(client);
                Ok(conn)
            }
            None => Err(Error::Exhausted {
                attempts,
                last: Box::new(last_err.unwrap_or_else(|| {
                    Error::Configuration("remote group empty".to_string())
                })),
            }),
        }
    }

    /// Insert `target` as a new unmeasured member. Adding a group to itself
    /// is a no-op.
    pub async fn add(self: &Arc<Self>, target: Target) -> Target {
        let is_self = matches!(&target, Target::Group(g) if Arc::ptr_eq(g, self));
        if !is_self {
            self.heap.lock().await.push(HeapItem::new(target));
        }
        Target::Group(Arc::clone(self))
    }

    /// Dial and ping every member, then re-rank.
    ///
    /// Failures only feed the ranking and are logged; nothing is returned.
    pub async fn refresh(&self, client: &Arc<Client>) {
        let mut heap = self.heap.lock().await;

        for item in heap.iter_mut() {
            let conn = match item.target.dial(client).await {
                Ok(conn) => conn,
                Err(e) => {
                    item.record_failure();
                    info!(remote = %item.target.label(), error = %e, "Dial failed");
                    continue;
                }
            };

            let start = Instant::now();
            let result = conn.probe().await;
            let duration = start.elapsed();

            match result {
                Ok(()) => {
                    debug!(remote = %item.target.label(), duration = ?duration, "Ping duration");
                    item.latency.update(duration);
                }
                Err(e) => {
                    item.record_failure();
                    info!(remote = %item.target.label(), error = %e, "Ping failed");
                }
            }
            conn.release().await;
        }

        heap.rebuild();
    }

    fn spawn_refresh(self: &Arc<Self>, client: &Arc<Client>) {
        let group = Arc::clone(self);
        let client = Arc::clone(client);
        tokio::spawn(async move {
            tokio::time::sleep(PROBE_DELAY).await;
            group.refresh(&client).await;
        });
    }

    /// Members in rank order, best first
    pub async fn stats(&self) -> Vec<MemberStats> {
        let mut ranked = IndexedHeap::new(ranked_less, |_, _| {});
        {
            let heap = self.heap.lock().await;
            for item in heap.as_slice() {
                ranked.push(Ranked {
                    position: item.index,
                    item: item.clone(),
                });
            }
        }

        let mut stats = Vec::with_capacity(ranked.len());
        while let Some(Ranked { position, item, .. }) = ranked.pop() {
            stats.push(MemberStats {
                position,
                label: item.target.label(),
                latency: item.latency.value(),
                error_count: item.error_count,
            });
        }
        stats
    }
}

/// Detached copy of a member used to rank a snapshot
struct Ranked {
    position: usize,
    item: HeapItem,
}

fn ranked_less(a: &Ranked, b: &Ranked) -> bool {
    item_less(&a.item, &b.item)
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb::testing::{addr, client, ScriptedConnector};
    use crate::lb::Endpoint;

    fn endpoint(last_octet: u8) -> Target {
        Target::from(Endpoint::new(addr(last_octet), format!("server-{}", last_octet)))
    }

    fn item(latency_ms: Option<u64>, error_count: u32) -> HeapItem {
        let mut item = HeapItem::new(endpoint(1));
        if let Some(ms) = latency_ms {
            item.latency.update(Duration::from_millis(ms * 2));
        }
        item.error_count = error_count;
        item
    }

    /// Overwrite member ranking state directly
    async fn set_state(group: &Group, last_octet: u8, latency_ms: Option<u64>, error_count: u32) {
        let mut heap = group.heap.lock().await;
        for member in heap.iter_mut() {
            if let Target::Endpoint(e) = &member.target {
                if e.addr() == addr(last_octet) {
                    member.latency.reset();
                    if let Some(ms) = latency_ms {
                        member.latency.update(Duration::from_millis(ms * 2));
                    }
                    member.error_count = error_count;
                }
            }
        }
        heap.rebuild();
    }

    /// Check the group's own heap: every member knows its slot and no
    /// member ranks ahead of its parent
    async fn assert_heap_valid(group: &Group) {
        let heap = group.heap.lock().await;
        let items = heap.as_slice();
        for (slot, item) in items.iter().enumerate() {
            assert_eq!(item.index, slot, "{} tracks the wrong slot", item.target.label());
            if slot > 0 {
                let parent = &items[(slot - 1) / 2];
                assert!(
                    !item_less(item, parent),
                    "{} ranks ahead of its parent {}",
                    item.target.label(),
                    parent.target.label()
                );
            }
        }
    }

    #[test]
    fn test_item_less_error_count_breaks_unmeasured_tie() {
        let a = item(None, 2);
        let b = item(None, 0);
        assert!(item_less(&b, &a));
        assert!(!item_less(&a, &b));
    }

    #[test]
    fn test_item_less_measured_beats_unmeasured() {
        let measured = item(Some(5), 10);
        let unmeasured = item(None, 0);
        assert!(item_less(&measured, &unmeasured));
        assert!(!item_less(&unmeasured, &measured));
    }

    #[test]
    fn test_item_less_equal_measured_values_fall_back_to_errors() {
        let a = item(Some(5), 1);
        let b = item(Some(5), 3);
        assert!(item_less(&a, &b));
        assert!(!item_less(&b, &a));
    }

    #[test]
    fn test_empty_group_rejected() {
        let err = Group::new(vec![]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_fewer_errors_dialed_first() {
        let connector = ScriptedConnector::new();
        let client = client(Arc::clone(&connector));

        let group = Arc::new(Group::new(vec![endpoint(1), endpoint(2)]).unwrap());
        set_state(&group, 1, None, 2).await;
        set_state(&group, 2, None, 0).await;

        group.dial(&client).await.unwrap();
        assert_eq!(connector.attempts()[0], addr(2));
    }

    #[tokio::test]
    async fn test_measured_dialed_before_unmeasured() {
        let connector = ScriptedConnector::new();
        let client = client(Arc::clone(&connector));

        let group = Arc::new(Group::new(vec![endpoint(1), endpoint(2), endpoint(3)]).unwrap());
        set_state(&group, 1, None, 0).await;
        set_state(&group, 2, None, 0).await;
        set_state(&group, 3, Some(5), 7).await;

        group.dial(&client).await.unwrap();
        assert_eq!(connector.attempts()[0], addr(3));
    }

    #[tokio::test]
    async fn test_lower_latency_dialed_first() {
        let connector = ScriptedConnector::new();
        let client = client(Arc::clone(&connector));

        let group = Arc::new(Group::new(vec![endpoint(1), endpoint(2)]).unwrap());
        set_state(&group, 1, Some(40), 0).await;
        set_state(&group, 2, Some(4), 0).await;

        group.dial(&client).await.unwrap();
        assert_eq!(connector.attempts(), vec![addr(2)]);
    }

    #[tokio::test]
    async fn test_refresh_measures_and_penalizes() {
        let connector = ScriptedConnector::new();
        connector.fail(addr(1));
        connector.fail_probe(addr(2));
        let client = client(Arc::clone(&connector));

        let group = Group::new(vec![endpoint(1), endpoint(2), endpoint(3)]).unwrap();
        group.refresh(&client).await;

        let stats = group.stats().await;
        assert_eq!(stats.len(), 3);

        // Only the healthy member is measured, so it ranks first
        assert_eq!(stats[0].label, format!("server-3@{}", addr(3)));
        assert!(stats[0].latency.is_some());
        assert_eq!(stats[0].error_count, 0);

        for member in &stats[1..] {
            assert_eq!(member.latency, None);
            assert_eq!(member.error_count, 1);
        }
    }

    #[tokio::test]
    async fn test_refresh_closes_probe_only_connections() {
        let connector = ScriptedConnector::new();
        connector.fail_probe(addr(2));
        let client = client(Arc::clone(&connector));

        let group = Group::new(vec![endpoint(1), endpoint(2), endpoint(3)]).unwrap();
        group.refresh(&client).await;

        for octet in 1..=3 {
            let conn = connector.connection(addr(octet)).unwrap();
            assert_eq!(conn.users(), 0, "member {}", octet);
            assert!(conn.is_closed(), "member {} left open", octet);
        }
    }

    #[tokio::test]
    async fn test_heap_stays_valid_across_operations() {
        let connector = ScriptedConnector::new();
        connector.fail(addr(2));
        connector.fail_probe(addr(4));
        let client = client(Arc::clone(&connector));

        let group = Arc::new(Group::new(vec![endpoint(1), endpoint(2)]).unwrap());
        assert_heap_valid(&group).await;

        for octet in 3..=6 {
            group.add(endpoint(octet)).await;
            assert_heap_valid(&group).await;
        }

        for round in 0..6 {
            group.dial(&client).await.unwrap();
            assert_heap_valid(&group).await;
            if round % 2 == 1 {
                group.refresh(&client).await;
                assert_heap_valid(&group).await;
            }
        }

        let nested = Target::from(Group::new(vec![endpoint(7), endpoint(8)]).unwrap());
        group.add(nested).await;
        assert_heap_valid(&group).await;

        group.refresh(&client).await;
        assert_heap_valid(&group).await;
        group.dial(&client).await.unwrap();
        assert_heap_valid(&group).await;

        assert_eq!(group.len().await, 7);
    }

    #[tokio::test]
    async fn test_nested_groups_have_distinct_labels() {
        let a = Group::new(vec![endpoint(1)]).unwrap();
        let b = Group::new(vec![endpoint(2)]).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.label(), format!("group#{}", a.id()));

        let parent = Group::new(vec![Target::from(a), Target::from(b)]).unwrap();
        let labels: Vec<_> = parent.stats().await.into_iter().map(|m| m.label).collect();
        assert_eq!(labels.len(), 2);
        assert_ne!(labels[0], labels[1]);
        assert!(labels.iter().all(|l| l.starts_with("group#")));
    }

    #[tokio::test]
    async fn test_stats_positions_cover_all_slots() {
        let group = Group::new((1..=6).map(endpoint).collect()).unwrap();
        for octet in 1..=6 {
            set_state(&group, octet, Some(u64::from(7 - octet)), 0).await;
        }

        let stats = group.stats().await;
        let mut positions: Vec<_> = stats.iter().map(|s| s.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, (0..6).collect::<Vec<_>>());
        assert_eq!(stats[0].position, 0);

        let latencies: Vec<_> = stats.iter().map(|s| s.latency.unwrap()).collect();
        let mut sorted = latencies.clone();
        sorted.sort();
        assert_eq!(latencies, sorted);
    }
}
