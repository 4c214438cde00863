use bevy::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::{ClusterConfig, DEFAULT_CONFIG_PATH};
use super::engine::ClusterEngine;
use super::location::{AgentId, Location};

// ============================================================================
// Notifications
// ============================================================================

/// An agent connected at `location`.
#[derive(Event, Message, Debug, Clone)]
pub struct AgentJoined {
    pub agent: AgentId,
    pub location: Location,
}

/// An agent disconnected.
#[derive(Event, Message, Debug, Clone)]
pub struct AgentLeft {
    pub agent: AgentId,
}

/// Continuous movement.
#[derive(Event, Message, Debug, Clone)]
pub struct AgentMoved {
    pub agent: AgentId,
    pub location: Location,
}

/// A teleport has completed.
#[derive(Event, Message, Debug, Clone)]
pub struct AgentTeleported {
    pub agent: AgentId,
    pub location: Location,
}

// ============================================================================
// Resources
// ============================================================================

/// The shared engine. Inserted by the app once the host collaborators exist.
#[derive(Resource, Clone)]
pub struct ClusterEngineResource(pub Arc<ClusterEngine>);

impl std::ops::Deref for ClusterEngineResource {
    type Target = ClusterEngine;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Repeating timer driving empty-cluster cleanup.
#[derive(Resource)]
pub struct ClusterCleanupTimer(pub Timer);

impl ClusterCleanupTimer {
    pub fn new(interval: Duration) -> Self {
        Self(Timer::new(interval, TimerMode::Repeating))
    }
}

// ============================================================================
// Plugin
// ============================================================================

/// Routes host notifications into the clustering engine and runs its
/// periodic maintenance.
///
/// The plugin does not build the engine: it needs the host's position and
/// terrain collaborators. Insert a [`ClusterEngineResource`] (see
/// [`ClusteringPlugin::with_engine`]); every system is a no-op until then.
#[derive(Default)]
pub struct ClusteringPlugin {
    engine: Option<Arc<ClusterEngine>>,
}

impl ClusteringPlugin {
    pub fn with_engine(engine: Arc<ClusterEngine>) -> Self {
        Self { engine: Some(engine) }
    }
}

impl Plugin for ClusteringPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<AgentJoined>();
        app.add_message::<AgentLeft>();
        app.add_message::<AgentMoved>();
        app.add_message::<AgentTeleported>();

        let config = match &self.engine {
            Some(engine) => engine.config().clone(),
            None => ClusterConfig::load_or_default(DEFAULT_CONFIG_PATH),
        };
        app.insert_resource(ClusterCleanupTimer::new(config.cleanup_interval()));
        app.insert_resource(config);

        if let Some(engine) = &self.engine {
            app.insert_resource(ClusterEngineResource(Arc::clone(engine)));
        }

        app.add_systems(
            Update,
            (
                track_agent_notifications,
                expire_processing_markers,
                run_cleanup_timer,
            )
                .chain(),
        );
        app.add_systems(Last, shutdown_on_exit);
    }
}

// ============================================================================
// Systems
// ============================================================================

/// Feed every pending notification into the tracker.
///
/// Leaves are applied last so an agent that joined and left in the same
/// frame ends up untracked.
pub fn track_agent_notifications(
    engine: Option<Res<ClusterEngineResource>>,
    mut joined: MessageReader<AgentJoined>,
    mut moved: MessageReader<AgentMoved>,
    mut teleported: MessageReader<AgentTeleported>,
    mut left: MessageReader<AgentLeft>,
) {
    let Some(engine) = engine else {
        // Drain so messages do not pile up until an engine appears
        joined.clear();
        moved.clear();
        teleported.clear();
        left.clear();
        return;
    };

    for msg in joined.read() {
        engine.on_join(msg.agent, &msg.location);
    }
    for msg in moved.read() {
        engine.on_move(msg.agent, &msg.location);
    }
    for msg in teleported.read() {
        engine.on_teleport(msg.agent, &msg.location);
    }
    for msg in left.read() {
        engine.on_leave(msg.agent);
    }
}

pub fn expire_processing_markers(engine: Option<Res<ClusterEngineResource>>) {
    if let Some(engine) = engine {
        engine.release_expired(Instant::now());
    }
}

pub fn run_cleanup_timer(
    time: Res<Time>,
    mut timer: ResMut<ClusterCleanupTimer>,
    engine: Option<Res<ClusterEngineResource>>,
) {
    timer.0.tick(time.delta());
    if !timer.0.just_finished() {
        return;
    }
    if let Some(engine) = engine {
        let removed = engine.cleanup();
        debug!("[CLUSTERS] Periodic cleanup removed {} clusters", removed);
    }
}

fn shutdown_on_exit(mut exit: MessageReader<AppExit>, engine: Option<Res<ClusterEngineResource>>) {
    if exit.read().next().is_none() {
        return;
    }
    if let Some(engine) = engine {
        engine.shutdown();
    }
}
