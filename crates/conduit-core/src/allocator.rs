//! Capacity-aware round-robin slot placement.
//!
//! `plan_batch` is the pure half of allocation: it takes the tariff, the
//! client and a snapshot of the node pool and emits slot drafts. The
//! control plane persists the whole batch in one transaction (all rows or
//! none) and owns the lookup errors (`LinkageMissing`,
//! `TariffNotFoundOrDisabled`, `ClientNotFound`) that precede planning.
//!
//! Placement walks a round-robin cursor over the eligible nodes ordered
//! by `updated_at` ascending. That ordering is the deterministic
//! tie-break and must be preserved exactly: test fixtures depend on it.
//! Capacity accounting is batch-local by design; it does not consult
//! slots created by earlier batches (see DESIGN.md).

use chrono::{DateTime, Duration, Utc};

use crate::credential::CredentialGenerator;
use crate::error::AllocationError;
use crate::model::{Node, SlotDraft, Tariff};

/// Plan one allocation batch for `tariff` on behalf of `client_id`.
///
/// Eligible nodes are the tariff's explicit allow-list when non-empty,
/// otherwise the whole pool; in both cases only ONLINE nodes qualify, so
/// a slot is never placed on a node that was offline at allocation time.
/// Fewer drafts than `tariff.slot_count` is a partial success, not an
/// error; an empty batch is [`AllocationError::ResourceExhausted`].
pub fn plan_batch(
    tariff: &Tariff,
    client_id: i64,
    pool: &[Node],
    now: DateTime<Utc>,
) -> Result<Vec<SlotDraft>, AllocationError> {
    if !tariff.enabled {
        return Err(AllocationError::TariffNotFoundOrDisabled);
    }

    let mut eligible: Vec<&Node> = if tariff.node_ids.is_empty() {
        pool.iter().filter(|n| n.is_online()).collect()
    } else {
        pool.iter()
            .filter(|n| n.is_online() && tariff.node_ids.contains(&n.id))
            .collect()
    };

    if eligible.is_empty() {
        return Err(AllocationError::NoEligibleNodes);
    }

    eligible.sort_by_key(|n| n.updated_at);

    let expires_at = now + Duration::days(tariff.duration_days);
    let generator = CredentialGenerator;
    let mut used = vec![0u32; eligible.len()];
    let mut drafts = Vec::with_capacity(tariff.slot_count as usize);
    let mut cursor = 0usize;

    'placement: for _ in 0..tariff.slot_count {
        // Scan forward from the cursor for the next node with remaining
        // batch-local capacity.
        for step in 0..eligible.len() {
            let idx = (cursor + step) % eligible.len();
            let node = eligible[idx];
            let has_room = node.capacity.is_none_or(|cap| used[idx] < cap);
            if has_room {
                used[idx] += 1;
                drafts.push(SlotDraft {
                    node_id: node.id,
                    client_id,
                    tariff_id: tariff.id,
                    credential: generator.generate_for(node.protocol),
                    expires_at,
                    traffic_limit_bytes: tariff.traffic_limit_bytes,
                    connection_limit: tariff.connection_limit,
                });
                cursor = (idx + 1) % eligible.len();
                continue 'placement;
            }
        }
        // Every node exhausted its batch-local capacity; keep what we
        // placed so far.
        break;
    }

    if drafts.is_empty() {
        return Err(AllocationError::ResourceExhausted);
    }

    Ok(drafts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeKind, NodeStatus};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn node(id: i64, capacity: Option<u32>, updated_minute: u32, status: NodeStatus) -> Node {
        Node {
            id,
            kind: NodeKind::PacketProxy,
            host: format!("10.0.0.{id}"),
            token: format!("tok-{id}"),
            capacity,
            status,
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, updated_minute, 0).unwrap(),
            protocol: None,
            port: None,
            socks_port: Some(1080),
            http_port: Some(3128),
        }
    }

    fn tariff(slot_count: u32, node_ids: Vec<i64>) -> Tariff {
        Tariff {
            id: 7,
            slot_count,
            duration_days: 30,
            traffic_limit_bytes: Some(100 << 30),
            connection_limit: Some(10),
            enabled: true,
            node_ids,
        }
    }

    fn counts(drafts: &[SlotDraft]) -> HashMap<i64, u32> {
        let mut by_node = HashMap::new();
        for d in drafts {
            *by_node.entry(d.node_id).or_insert(0u32) += 1;
        }
        by_node
    }

    #[test]
    fn exact_fill_when_capacity_suffices() {
        let pool = vec![
            node(1, Some(3), 0, NodeStatus::Online),
            node(2, Some(3), 1, NodeStatus::Online),
            node(3, Some(3), 2, NodeStatus::Online),
        ];
        let drafts = plan_batch(&tariff(7, vec![]), 42, &pool, Utc::now()).unwrap();

        assert_eq!(drafts.len(), 7);
        let by_node = counts(&drafts);
        assert!(by_node.values().all(|&c| c <= 3));
    }

    #[test]
    fn round_robin_alternates_in_tie_break_order() {
        // Node 2 was updated before node 1, so it comes first.
        let pool = vec![
            node(1, None, 5, NodeStatus::Online),
            node(2, None, 0, NodeStatus::Online),
        ];
        let drafts = plan_batch(&tariff(4, vec![]), 42, &pool, Utc::now()).unwrap();

        let order: Vec<i64> = drafts.iter().map(|d| d.node_id).collect();
        assert_eq!(order, vec![2, 1, 2, 1]);
    }

    #[test]
    fn two_nodes_capacity_two_each_three_slots() {
        let pool = vec![
            node(1, Some(2), 0, NodeStatus::Online), // A
            node(2, Some(2), 1, NodeStatus::Online), // B
        ];
        let now = Utc::now();
        let drafts = plan_batch(&tariff(3, vec![]), 42, &pool, now).unwrap();

        assert_eq!(drafts.len(), 3);
        let by_node = counts(&drafts);
        assert_eq!(by_node[&1], 2);
        assert_eq!(by_node[&2], 1);
        for d in &drafts {
            assert_eq!(d.expires_at, now + Duration::days(30));
        }
    }

    #[test]
    fn partial_success_when_capacity_short() {
        let pool = vec![
            node(1, Some(1), 0, NodeStatus::Online),
            node(2, Some(2), 1, NodeStatus::Online),
        ];
        let drafts = plan_batch(&tariff(10, vec![]), 42, &pool, Utc::now()).unwrap();

        // ΣCi = 3 < 10: exactly ΣCi slots, no error.
        assert_eq!(drafts.len(), 3);
        let by_node = counts(&drafts);
        assert_eq!(by_node[&1], 1);
        assert_eq!(by_node[&2], 2);
    }

    #[test]
    fn zero_capacity_is_resource_exhausted() {
        let pool = vec![
            node(1, Some(0), 0, NodeStatus::Online),
            node(2, Some(0), 1, NodeStatus::Online),
        ];
        let err = plan_batch(&tariff(3, vec![]), 42, &pool, Utc::now()).unwrap_err();
        assert_eq!(err, AllocationError::ResourceExhausted);
    }

    #[test]
    fn no_online_nodes_is_no_eligible_nodes() {
        let pool = vec![node(1, Some(5), 0, NodeStatus::Disabled)];
        let err = plan_batch(&tariff(3, vec![]), 42, &pool, Utc::now()).unwrap_err();
        assert_eq!(err, AllocationError::NoEligibleNodes);
    }

    #[test]
    fn empty_pool_is_no_eligible_nodes() {
        let err = plan_batch(&tariff(3, vec![]), 42, &[], Utc::now()).unwrap_err();
        assert_eq!(err, AllocationError::NoEligibleNodes);
    }

    #[test]
    fn allow_list_restricts_eligibility() {
        let pool = vec![
            node(1, None, 0, NodeStatus::Online),
            node(2, None, 1, NodeStatus::Online),
            node(3, None, 2, NodeStatus::Online),
        ];
        let drafts = plan_batch(&tariff(4, vec![2]), 42, &pool, Utc::now()).unwrap();
        assert!(drafts.iter().all(|d| d.node_id == 2));
    }

    #[test]
    fn allow_listed_offline_node_is_not_eligible() {
        let pool = vec![
            node(1, None, 0, NodeStatus::Disabled),
            node(2, None, 1, NodeStatus::Online),
        ];

        // Mixed pin: only the online node receives slots.
        let drafts = plan_batch(&tariff(3, vec![1, 2]), 42, &pool, Utc::now()).unwrap();
        assert!(drafts.iter().all(|d| d.node_id == 2));

        // Entirely offline pin: nothing to place on.
        let err = plan_batch(&tariff(3, vec![1]), 42, &pool, Utc::now()).unwrap_err();
        assert_eq!(err, AllocationError::NoEligibleNodes);
    }

    #[test]
    fn disabled_tariff_rejected() {
        let mut t = tariff(3, vec![]);
        t.enabled = false;
        let pool = vec![node(1, None, 0, NodeStatus::Online)];
        let err = plan_batch(&t, 42, &pool, Utc::now()).unwrap_err();
        assert_eq!(err, AllocationError::TariffNotFoundOrDisabled);
    }

    #[test]
    fn batches_are_independent() {
        // No idempotency key: calling twice yields two full batches with
        // distinct credentials.
        let pool = vec![node(1, None, 0, NodeStatus::Online)];
        let t = tariff(2, vec![]);
        let first = plan_batch(&t, 42, &pool, Utc::now()).unwrap();
        let second = plan_batch(&t, 42, &pool, Utc::now()).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_ne!(first[0].credential, second[0].credential);
    }

    #[test]
    fn skips_full_node_and_continues() {
        let pool = vec![
            node(1, Some(1), 0, NodeStatus::Online),
            node(2, Some(3), 1, NodeStatus::Online),
        ];
        let drafts = plan_batch(&tariff(4, vec![]), 42, &pool, Utc::now()).unwrap();

        let order: Vec<i64> = drafts.iter().map(|d| d.node_id).collect();
        // First pass alternates 1,2; node 1 is then full, remaining go to 2.
        assert_eq!(order, vec![1, 2, 2, 2]);
    }
}
