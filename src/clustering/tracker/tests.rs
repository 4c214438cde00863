use super::*;
use crate::clustering::cluster::{CAPACITY_RADIUS, CLUSTER_RADIUS};
use crate::clustering::location::WorldId;

fn at(x: f64, z: f64) -> Location {
    Location::new(WorldId::new("overworld"), x, 64.0, z)
}

fn register(tracker: &MembershipTracker, x: f64, z: f64) -> Arc<Cluster> {
    let cluster = Arc::new(Cluster::new(at(x, z)));
    tracker.register_cluster(Arc::clone(&cluster));
    cluster
}

fn assert_consistent(tracker: &MembershipTracker) {
    let violations = tracker.consistency_violations();
    assert!(violations.is_empty(), "Index inconsistent: {:?}", violations);
}

#[test]
fn test_register_is_idempotent() {
    let tracker = MembershipTracker::new(2.0);
    let cluster = register(&tracker, 0.0, 0.0);
    let agent = AgentId::new_random();
    tracker.on_join(agent, &at(1.0, 1.0));

    tracker.register_cluster(Arc::clone(&cluster));

    assert_eq!(tracker.get_active_clusters().len(), 1);
    assert_eq!(tracker.member_count(&cluster), 1, "Re-registering must not wipe members");
    assert_consistent(&tracker);
}

#[test]
fn test_recompute_tracks_region_entry_and_exit() {
    let tracker = MembershipTracker::new(2.0);
    let cluster = register(&tracker, 0.0, 0.0);
    let agent = AgentId::new_random();

    assert!(tracker.recompute_membership(agent, &at(500.0, 500.0)).is_none());
    assert!(tracker.get_cluster(agent).is_none());
    assert_consistent(&tracker);

    let joined = tracker.recompute_membership(agent, &at(10.0, -10.0));
    assert_eq!(joined.as_deref(), Some(&*cluster));
    assert!(tracker.get_members(&cluster).contains(&agent));
    assert_consistent(&tracker);

    assert!(tracker.recompute_membership(agent, &at(CLUSTER_RADIUS + 1.0, 0.0)).is_none());
    assert!(tracker.get_cluster(agent).is_none());
    assert!(!tracker.get_members(&cluster).contains(&agent));
    assert_consistent(&tracker);
}

#[test]
fn test_recompute_switches_between_clusters() {
    let tracker = MembershipTracker::new(2.0);
    let west = register(&tracker, -200.0, 0.0);
    let east = register(&tracker, 200.0, 0.0);
    let agent = AgentId::new_random();

    tracker.recompute_membership(agent, &at(-190.0, 0.0));
    assert_eq!(tracker.get_cluster(agent).map(|c| c.id()), Some(west.id()));

    tracker.recompute_membership(agent, &at(210.0, 5.0));
    assert_eq!(tracker.get_cluster(agent).map(|c| c.id()), Some(east.id()));
    assert_eq!(tracker.member_count(&west), 0);
    assert_eq!(tracker.member_count(&east), 1);
    assert_consistent(&tracker);
}

#[test]
fn test_bidirectional_invariant_over_random_walk() {
    let tracker = MembershipTracker::new(2.0);
    let clusters: Vec<_> = (0..4).map(|i| register(&tracker, i as f64 * 120.0, 0.0)).collect();
    let agents: Vec<_> = (0..8).map(|_| AgentId::new_random()).collect();
    let mut rng = fastrand::Rng::with_seed(11);

    for _ in 0..400 {
        let agent = agents[rng.usize(..agents.len())];
        let location = at(rng.f64() * 460.0 - 50.0, rng.f64() * 100.0 - 50.0);
        let result = tracker.recompute_membership(agent, &location);

        let expected = clusters
            .iter()
            .filter(|c| c.contains_point(&location))
            .map(|c| c.id())
            .min();
        assert_eq!(result.map(|c| c.id()), expected);
        assert_eq!(tracker.get_cluster(agent).map(|c| c.id()), expected);
        assert_consistent(&tracker);
    }
}

#[test]
fn test_overlapping_regions_prefer_oldest() {
    let tracker = MembershipTracker::new(2.0);
    let older = register(&tracker, 0.0, 0.0);
    let _newer = register(&tracker, 30.0, 0.0);
    let agent = AgentId::new_random();

    tracker.recompute_membership(agent, &at(20.0, 0.0));
    assert_eq!(tracker.get_cluster(agent).map(|c| c.id()), Some(older.id()));
    assert_consistent(&tracker);
}

#[test]
fn test_unregister_evicts_members() {
    let tracker = MembershipTracker::new(2.0);
    let doomed = register(&tracker, 0.0, 0.0);
    let survivor = register(&tracker, 300.0, 0.0);

    let inside: Vec<_> = (0..5).map(|_| AgentId::new_random()).collect();
    for (i, agent) in inside.iter().enumerate() {
        tracker.on_join(*agent, &at(i as f64, 0.0));
    }
    let other = AgentId::new_random();
    tracker.on_join(other, &at(300.0, 0.0));

    tracker.unregister_cluster(&doomed);

    assert!(!tracker.is_registered(&doomed));
    for agent in &inside {
        assert!(tracker.get_cluster(*agent).is_none());
        assert!(tracker.last_checked_position(*agent).is_some(), "Cached positions survive");
    }
    assert_eq!(tracker.get_members(&doomed).len(), 0);
    assert_eq!(tracker.get_cluster(other).map(|c| c.id()), Some(survivor.id()));
    assert_consistent(&tracker);
}

#[test]
fn test_agent_does_not_join_unregistered_cluster() {
    let tracker = MembershipTracker::new(2.0);
    let cluster = register(&tracker, 0.0, 0.0);
    tracker.unregister_cluster(&cluster);

    let agent = AgentId::new_random();
    assert!(tracker.recompute_membership(agent, &at(0.0, 0.0)).is_none());
    assert_consistent(&tracker);
}

#[test]
fn test_capacity_flips_at_max() {
    let tracker = MembershipTracker::new(2.0);
    let cluster = register(&tracker, 0.0, 0.0);
    let agents: Vec<_> = (0..MAX_CAPACITY).map(|_| AgentId::new_random()).collect();

    for (i, agent) in agents.iter().enumerate() {
        assert!(!tracker.is_at_capacity(&cluster), "Full too early at {}", i);
        tracker.on_join(*agent, &at(-20.0 + i as f64, 3.0));
    }
    assert!(tracker.is_at_capacity(&cluster));
    assert_eq!(tracker.get_capacity_count(&cluster), MAX_CAPACITY);

    tracker.on_leave(agents[0]);
    assert!(!tracker.is_at_capacity(&cluster));
}

#[test]
fn test_capacity_counts_agents_claimed_by_neighbour() {
    let tracker = MembershipTracker::new(2.0);
    let left = register(&tracker, 0.0, 0.0);
    let right = register(&tracker, 2.0 * CLUSTER_RADIUS + 1.0, 0.0);

    // Inside `right`'s placement region but within `left`'s capacity square
    let agent = AgentId::new_random();
    tracker.on_join(agent, &at(CAPACITY_RADIUS - 1.0, 0.0));

    assert_eq!(tracker.get_cluster(agent).map(|c| c.id()), Some(right.id()));
    assert_eq!(tracker.member_count(&left), 0);
    assert_eq!(tracker.get_capacity_count(&left), 1);
}

#[test]
fn test_should_recompute_threshold() {
    let tracker = MembershipTracker::new(2.0);
    let agent = AgentId::new_random();

    assert!(tracker.should_recompute(agent, &at(0.0, 0.0)), "No cache yet");
    tracker.recompute_membership(agent, &at(0.0, 0.0));

    assert!(!tracker.should_recompute(agent, &at(1.0, 1.0)));
    assert!(!tracker.should_recompute(agent, &at(0.0, 1.99).with_y(90.0)), "Height is ignored");
    assert!(tracker.should_recompute(agent, &at(2.0, 0.0)), "Exactly the threshold counts");
    assert!(tracker.should_recompute(agent, &at(1.5, 1.5)));

    let nether = Location::new(WorldId::new("nether"), 0.0, 64.0, 0.0);
    assert!(tracker.should_recompute(agent, &nether));
}

#[test]
fn test_small_moves_skip_recompute() {
    let tracker = MembershipTracker::new(2.0);
    let agent = AgentId::new_random();
    tracker.on_join(agent, &at(100.0, 100.0));

    // Cluster appears underneath, but jitter alone will not pick it up
    let cluster = register(&tracker, 100.0, 100.0);
    tracker.on_move(agent, &at(100.5, 100.5));
    assert!(tracker.get_cluster(agent).is_none());
    assert_eq!(tracker.get_capacity_count(&cluster), 1, "Positions still update");

    tracker.on_move(agent, &at(103.0, 100.0));
    assert_eq!(tracker.get_cluster(agent).map(|c| c.id()), Some(cluster.id()));
    assert_consistent(&tracker);
}

#[test]
fn test_teleport_always_recomputes() {
    let tracker = MembershipTracker::new(2.0);
    let agent = AgentId::new_random();
    tracker.on_join(agent, &at(0.0, 0.0));
    let cluster = register(&tracker, 0.0, 0.0);

    tracker.on_teleport(agent, &at(0.5, 0.0));
    assert_eq!(tracker.get_cluster(agent).map(|c| c.id()), Some(cluster.id()));
}

#[test]
fn test_leave_forgets_agent() {
    let tracker = MembershipTracker::new(2.0);
    let cluster = register(&tracker, 0.0, 0.0);
    let agent = AgentId::new_random();
    tracker.on_join(agent, &at(1.0, 1.0));

    tracker.on_leave(agent);

    assert!(tracker.get_cluster(agent).is_none());
    assert!(tracker.last_checked_position(agent).is_none());
    assert!(tracker.known_position(agent).is_none());
    assert_eq!(tracker.get_capacity_count(&cluster), 0);
    assert_consistent(&tracker);
}

#[test]
fn test_cleanup_removes_only_empty_clusters() {
    let tracker = MembershipTracker::new(2.0);
    let occupied = register(&tracker, 0.0, 0.0);
    let empty_a = register(&tracker, 500.0, 0.0);
    let empty_b = register(&tracker, -500.0, 0.0);
    tracker.on_join(AgentId::new_random(), &at(0.0, 0.0));

    assert_eq!(tracker.cleanup_empty_clusters(), 2);

    let remaining: Vec<_> = tracker.get_active_clusters().iter().map(|c| c.id()).collect();
    assert_eq!(remaining, vec![occupied.id()]);
    assert!(!tracker.is_registered(&empty_a));
    assert!(!tracker.is_registered(&empty_b));
    assert_eq!(tracker.cleanup_empty_clusters(), 0);
    assert_consistent(&tracker);
}

#[test]
fn test_clear_all_drops_everything() {
    let tracker = MembershipTracker::new(2.0);
    register(&tracker, 0.0, 0.0);
    let agent = AgentId::new_random();
    tracker.on_join(agent, &at(0.0, 0.0));

    tracker.clear_all();

    assert!(tracker.get_active_clusters().is_empty());
    assert!(tracker.get_cluster(agent).is_none());
    assert!(tracker.should_recompute(agent, &at(0.0, 0.0)));
    assert_eq!(tracker.stats().tracked_agents, 0);
}

#[test]
fn test_members_is_a_snapshot() {
    let tracker = MembershipTracker::new(2.0);
    let cluster = register(&tracker, 0.0, 0.0);
    let agent = AgentId::new_random();
    tracker.on_join(agent, &at(0.0, 0.0));

    let snapshot = tracker.get_members(&cluster);
    tracker.on_leave(agent);

    assert!(snapshot.contains(&agent));
    assert!(tracker.get_members(&cluster).is_empty());
}

#[test]
fn test_stats_reflect_index() {
    let tracker = MembershipTracker::new(2.0);
    register(&tracker, 0.0, 0.0);
    register(&tracker, 400.0, 0.0);
    for i in 0..3 {
        tracker.on_join(AgentId::new_random(), &at(i as f64, 0.0));
    }
    tracker.on_join(AgentId::new_random(), &at(1000.0, 0.0));

    let stats = tracker.stats();
    assert_eq!(stats.tracked_agents, 3);
    assert_eq!(stats.active_clusters, 2);
    assert_eq!(stats.total_mappings, 3);
}

#[test]
fn test_observe_records_position_for_capacity() {
    let tracker = MembershipTracker::new(2.0);
    let cluster = register(&tracker, 0.0, 0.0);
    let agent = AgentId::new_random();

    let joined = tracker.observe(agent, &at(4.0, 4.0));

    assert_eq!(joined.map(|c| c.id()), Some(cluster.id()));
    assert_eq!(tracker.known_position(agent), Some(at(4.0, 4.0)));
    assert_eq!(tracker.get_capacity_count(&cluster), 1);
    assert_consistent(&tracker);
}
