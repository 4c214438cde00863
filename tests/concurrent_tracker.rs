use rtp_clusters::clustering::{AgentId, Cluster, Location, MembershipTracker, WorldId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn at(x: f64, z: f64) -> Location {
    Location::new(WorldId::new("overworld"), x, 64.0, z)
}

/// Many threads moving, teleporting and disconnecting agents while clusters
/// come and go. Afterwards both directions of the index must agree.
#[test]
fn test_concurrent_updates_keep_index_consistent() {
    let tracker = Arc::new(MembershipTracker::new(2.0));
    let clusters: Vec<_> = (0..6)
        .map(|i| {
            let cluster = Arc::new(Cluster::new(at(i as f64 * 100.0, 0.0)));
            tracker.register_cluster(Arc::clone(&cluster));
            cluster
        })
        .collect();
    let agents: Arc<Vec<AgentId>> = Arc::new((0..64).map(|_| AgentId::new_random()).collect());

    let mut handles = Vec::new();
    for worker in 0..8u64 {
        let tracker = Arc::clone(&tracker);
        let agents = Arc::clone(&agents);
        handles.push(thread::spawn(move || {
            let mut rng = fastrand::Rng::with_seed(worker);
            for _ in 0..2_000 {
                let agent = agents[rng.usize(..agents.len())];
                let location = at(rng.f64() * 600.0 - 50.0, rng.f64() * 100.0 - 50.0);
                match rng.u8(..10) {
                    0 => tracker.on_leave(agent),
                    1..=3 => {
                        tracker.on_teleport(agent, &location);
                    }
                    _ => tracker.on_move(agent, &location),
                }
            }
        }));
    }

    // Churn clusters alongside the agent updates
    let churn = {
        let tracker = Arc::clone(&tracker);
        let victims = clusters.clone();
        thread::spawn(move || {
            for round in 0..200 {
                let victim = &victims[round % victims.len()];
                tracker.unregister_cluster(victim);
                tracker.register_cluster(Arc::clone(victim));
            }
        })
    };

    for handle in handles {
        handle.join().unwrap();
    }
    churn.join().unwrap();

    let violations = tracker.consistency_violations();
    assert!(violations.is_empty(), "Index inconsistent after concurrent updates: {:?}", violations);

    // Every mapped agent sits in its cluster's member set
    for agent in agents.iter() {
        if let Some(cluster) = tracker.get_cluster(*agent) {
            assert!(tracker.get_members(&cluster).contains(agent));
            assert!(tracker.is_registered(&cluster));
        }
    }
}

#[test]
fn test_concurrent_seeding_registers_each_cluster_once() {
    let tracker = Arc::new(MembershipTracker::new(2.0));
    let cluster = Arc::new(Cluster::new(at(0.0, 0.0)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            let cluster = Arc::clone(&cluster);
            thread::spawn(move || {
                for _ in 0..100 {
                    tracker.register_cluster(Arc::clone(&cluster));
                    tracker.on_join(AgentId::new_random(), &at(1.0, 1.0));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tracker.get_active_clusters().len(), 1);
    assert_eq!(tracker.member_count(&cluster), 800);
    assert!(tracker.consistency_violations().is_empty());
}

/// Agents only ever move west → east. A reader snapshotting east before west
/// must never find the same agent in both.
#[test]
fn test_member_snapshots_never_list_agent_twice() {
    let tracker = Arc::new(MembershipTracker::new(2.0));
    let west = Arc::new(Cluster::new(at(0.0, 0.0)));
    let east = Arc::new(Cluster::new(at(500.0, 0.0)));
    tracker.register_cluster(Arc::clone(&west));
    tracker.register_cluster(Arc::clone(&east));

    let agents: Vec<AgentId> = (0..400).map(|_| AgentId::new_random()).collect();
    for agent in &agents {
        tracker.on_join(*agent, &at(1.0, 1.0));
    }
    assert_eq!(tracker.member_count(&west), agents.len());

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let tracker = Arc::clone(&tracker);
        let (west, east) = (Arc::clone(&west), Arc::clone(&east));
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut passes = 0usize;
            while !done.load(Ordering::Acquire) || passes == 0 {
                let in_east = tracker.get_members(&east);
                let in_west = tracker.get_members(&west);
                if let Some(agent) = in_east.intersection(&in_west).next() {
                    panic!("{agent} listed in both clusters");
                }
                passes += 1;
            }
        })
    };

    let writers: Vec<_> = agents
        .chunks(100)
        .map(|chunk| {
            let tracker = Arc::clone(&tracker);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for agent in chunk {
                    tracker.on_teleport(agent, &at(501.0, 1.0));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    reader.join().unwrap();

    assert_eq!(tracker.member_count(&east), agents.len());
    assert_eq!(tracker.member_count(&west), 0);
    assert!(tracker.consistency_violations().is_empty());
}
