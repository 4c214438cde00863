use bevy::prelude::*;
use rtp_clusters::clustering::plugin::{AgentJoined, AgentLeft, AgentMoved, AgentTeleported, ClusterCleanupTimer};
use rtp_clusters::clustering::{
    AgentId, ClusterConfig, ClusterEngine, ClusterEngineResource, ClusteringPlugin, InMemoryWorld, Location,
    TerrainProfile, WorldId,
};
use std::sync::Arc;
use std::time::Duration;

fn at(x: f64, z: f64) -> Location {
    Location::new(WorldId::new("overworld"), x, 64.0, z)
}

fn app_with(config: ClusterConfig) -> (App, Arc<InMemoryWorld>, Arc<ClusterEngine>) {
    let host = Arc::new(InMemoryWorld::new().with_world(at(0.0, 0.0), TerrainProfile::Flat(64.0)));
    let engine = Arc::new(ClusterEngine::new(config, host.clone(), host.clone()).unwrap());

    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(ClusteringPlugin::with_engine(Arc::clone(&engine)));
    app.update();
    (app, host, engine)
}

#[test]
fn test_notifications_reach_tracker() {
    let (mut app, host, engine) = app_with(ClusterConfig::default());
    let a = AgentId::new_random();
    let b = AgentId::new_random();
    for (agent, location) in [(a, at(0.0, 0.0)), (b, at(3.0, 3.0))] {
        host.set_position(agent, location.clone());
        app.world_mut().write_message(AgentJoined { agent, location });
    }
    app.update();

    assert_eq!(engine.tracker().known_position(a), Some(at(0.0, 0.0)));
    let cluster = engine.find_best_cluster(&WorldId::new("overworld")).unwrap().unwrap();
    assert_eq!(engine.tracker().member_count(&cluster), 2);

    // Small step stays, a teleport away leaves
    app.world_mut().write_message(AgentMoved { agent: a, location: at(0.5, 0.5) });
    app.world_mut().write_message(AgentTeleported { agent: b, location: at(900.0, 0.0) });
    app.update();
    assert_eq!(engine.tracker().get_cluster(a).map(|c| c.id()), Some(cluster.id()));
    assert!(engine.tracker().get_cluster(b).is_none());

    app.world_mut().write_message(AgentLeft { agent: a });
    app.update();
    assert!(engine.tracker().known_position(a).is_none());
    assert_eq!(engine.tracker().member_count(&cluster), 0);
}

#[test]
fn test_join_and_leave_in_same_frame_leaves_agent_untracked() {
    let (mut app, _host, engine) = app_with(ClusterConfig::default());
    let agent = AgentId::new_random();

    app.world_mut().write_message(AgentJoined { agent, location: at(0.0, 0.0) });
    app.world_mut().write_message(AgentLeft { agent });
    app.update();

    assert!(engine.tracker().known_position(agent).is_none());
    assert_eq!(engine.stats().tracked_agents, 0);
}

#[test]
fn test_cleanup_timer_removes_empty_clusters() {
    let config = ClusterConfig {
        cleanup_interval_secs: 0.005,
        ..ClusterConfig::default()
    };
    let (mut app, host, engine) = app_with(config);
    let agent = AgentId::new_random();
    host.set_position(agent, at(0.0, 0.0));
    engine.on_join(agent, &at(0.0, 0.0));
    engine.find_best_cluster(&WorldId::new("overworld")).unwrap();
    engine.on_teleport(agent, &at(3000.0, 0.0));
    assert_eq!(engine.stats().active_clusters, 1);

    assert!(app.world().contains_resource::<ClusterCleanupTimer>());
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(20));
        app.update();
    }

    assert_eq!(engine.stats().active_clusters, 0);
}

#[test]
fn test_app_exit_shuts_engine_down() {
    let (mut app, host, engine) = app_with(ClusterConfig::default());
    let agent = AgentId::new_random();
    host.set_position(agent, at(0.0, 0.0));
    app.world_mut().write_message(AgentJoined { agent, location: at(0.0, 0.0) });
    app.update();
    assert_eq!(engine.stats().tracked_agents, 0, "Unclustered agents have no mapping");
    assert!(engine.tracker().known_position(agent).is_some());

    app.world_mut().write_message(AppExit::Success);
    app.update();

    assert!(!engine.is_enabled());
    assert!(engine.tracker().known_position(agent).is_none());
}

#[test]
fn test_plugin_without_engine_is_inert() {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(ClusteringPlugin::default());
    app.update();

    app.world_mut().write_message(AgentJoined {
        agent: AgentId::new_random(),
        location: at(0.0, 0.0),
    });
    app.update();

    assert!(app.world().contains_resource::<ClusterConfig>());
    assert!(!app.world().contains_resource::<ClusterEngineResource>());
}
