//! Headless sandbox: wandering agents that now and then get randomly
//! teleported, with every teleport routed through the clustering engine.

use bevy::prelude::*;
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;

use crate::clustering::plugin::{AgentJoined, AgentLeft, AgentMoved, AgentTeleported, ClusterEngineResource};
use crate::clustering::{
    AgentClusterStatus, AgentId, ClusterConfig, ClusterEngine, ClusterResult, InMemoryWorld, Location,
    PositionSource, RelocationOutcome, RelocationRequest, TeleportCause, TerrainProfile, WorldId, WorldTerrain,
};
use crate::profile_log;

pub const OVERWORLD: &str = "overworld";
pub const NETHER: &str = "nether";

#[derive(Resource, Clone, Debug)]
pub struct SandboxSettings {
    pub agent_count: usize,
    /// Ticks to run before requesting exit.
    pub ticks: u64,
    /// Per-agent, per-tick chance of a feature-triggered teleport.
    pub relocation_chance: f64,
    /// Largest per-tick step of the random walk.
    pub walk_step: f64,
    /// Half-width of the square a random teleport picks its target from.
    pub teleport_range: f64,
    /// Chance a random teleport targets the other world.
    pub cross_world_chance: f64,
    /// Chance per tick that one agent disconnects and a fresh one joins.
    pub churn_chance: f64,
    /// Ticks between summary log lines.
    pub summary_every: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            agent_count: 60,
            ticks: 2_000,
            relocation_chance: 0.002,
            walk_step: 1.5,
            teleport_range: 5_000.0,
            cross_world_chance: 0.1,
            churn_chance: 0.01,
            summary_every: 250,
        }
    }
}

/// The in-memory host shared by the engine and the sandbox systems.
#[derive(Resource, Clone)]
pub struct SandboxWorld(pub Arc<InMemoryWorld>);

#[derive(Resource, Default)]
pub struct SandboxAgents(pub Vec<AgentId>);

#[derive(Resource, Default, Debug)]
pub struct SandboxTick(pub u64);

/// Running totals of interceptor outcomes.
#[derive(Resource, Default, Debug)]
pub struct RelocationTally {
    pub ignored: usize,
    pub kept: usize,
    pub redirected: usize,
    pub failed: usize,
}

impl RelocationTally {
    fn record(&mut self, outcome: &RelocationOutcome) {
        match outcome {
            RelocationOutcome::Ignored(_) => self.ignored += 1,
            RelocationOutcome::Kept(_) => self.kept += 1,
            RelocationOutcome::Redirected { .. } => self.redirected += 1,
            RelocationOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Host with an overworld and a nether, each with its own terrain.
pub fn build_world() -> InMemoryWorld {
    InMemoryWorld::new()
        .with_world(
            Location::new(WorldId::new(OVERWORLD), 0.0, 64.0, 0.0),
            TerrainProfile::Rolling { base: 64.0, amplitude: 12.0 },
        )
        .with_world(
            Location::new(WorldId::new(NETHER), 0.0, 32.0, 0.0),
            TerrainProfile::Flat(32.0),
        )
}

/// Build the host world and an engine reading from it.
pub fn build_engine(config: ClusterConfig) -> ClusterResult<(Arc<InMemoryWorld>, Arc<ClusterEngine>)> {
    let world = Arc::new(build_world());
    let engine = ClusterEngine::new(config, world.clone(), world.clone())?;
    Ok((world, Arc::new(engine)))
}

pub struct SandboxPlugin {
    pub settings: SandboxSettings,
    pub world: Arc<InMemoryWorld>,
}

impl Plugin for SandboxPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.settings.clone());
        app.insert_resource(SandboxWorld(Arc::clone(&self.world)));
        app.init_resource::<SandboxAgents>();
        app.init_resource::<SandboxTick>();
        app.init_resource::<RelocationTally>();

        app.add_systems(Startup, spawn_agents);
        app.add_systems(
            Update,
            (
                advance_tick,
                wander_agents,
                churn_agents,
                relocate_random_agents,
                log_summary,
                stop_after_ticks,
            )
                .chain(),
        );
    }
}

fn random_spot<R: Rng>(rng: &mut R, world: &InMemoryWorld, world_id: &WorldId, around: &Location, range: f64) -> Location {
    let x = around.x() + rng.random_range(-range..=range);
    let z = around.z() + rng.random_range(-range..=range);
    let y = world.terrain_height(world_id, x, z).unwrap_or(around.y());
    Location::new(world_id.clone(), x, y + 1.0, z)
}

fn spawn_one<R: Rng>(rng: &mut R, world: &InMemoryWorld, joined: &mut MessageWriter<AgentJoined>) -> AgentId {
    let overworld = WorldId::new(OVERWORLD);
    let spawn = Location::new(overworld.clone(), 0.0, 64.0, 0.0);
    let agent = AgentId::new_random();
    let location = random_spot(rng, world, &overworld, &spawn, 200.0);
    world.set_position(agent, location.clone());
    joined.write(AgentJoined { agent, location });
    agent
}

pub fn spawn_agents(
    settings: Res<SandboxSettings>,
    world: Res<SandboxWorld>,
    mut agents: ResMut<SandboxAgents>,
    mut joined: MessageWriter<AgentJoined>,
) {
    let mut rng = rand::rng();
    for _ in 0..settings.agent_count {
        let agent = spawn_one(&mut rng, &world.0, &mut joined);
        agents.0.push(agent);
    }
    info!("[SANDBOX] Spawned {} agents", agents.0.len());
}

fn advance_tick(mut tick: ResMut<SandboxTick>) {
    tick.0 += 1;
}

pub fn wander_agents(
    settings: Res<SandboxSettings>,
    world: Res<SandboxWorld>,
    agents: Res<SandboxAgents>,
    mut moved: MessageWriter<AgentMoved>,
) {
    let mut rng = rand::rng();
    let step = settings.walk_step;
    for &agent in &agents.0 {
        let Some(current) = world.0.location_of(agent) else {
            continue;
        };
        let location = current.offset(rng.random_range(-step..=step), rng.random_range(-step..=step));
        world.0.set_position(agent, location.clone());
        moved.write(AgentMoved { agent, location });
    }
}

pub fn churn_agents(
    settings: Res<SandboxSettings>,
    world: Res<SandboxWorld>,
    mut agents: ResMut<SandboxAgents>,
    mut joined: MessageWriter<AgentJoined>,
    mut left: MessageWriter<AgentLeft>,
) {
    let mut rng = rand::rng();
    if agents.0.is_empty() || !rng.random_bool(settings.churn_chance) {
        return;
    }
    let index = rng.random_range(0..agents.0.len());
    let leaving = agents.0.swap_remove(index);
    world.0.remove_agent(leaving);
    left.write(AgentLeft { agent: leaving });

    let fresh = spawn_one(&mut rng, &world.0, &mut joined);
    agents.0.push(fresh);
    debug!("[SANDBOX] Agent {} left, {} joined", leaving, fresh);
}

/// Pick random agents for a feature-triggered teleport and run each through
/// the interceptor before applying it.
pub fn relocate_random_agents(
    settings: Res<SandboxSettings>,
    world: Res<SandboxWorld>,
    agents: Res<SandboxAgents>,
    engine: Res<ClusterEngineResource>,
    mut tally: ResMut<RelocationTally>,
    mut teleported: MessageWriter<AgentTeleported>,
) {
    let mut rng = rand::rng();
    let now = Instant::now();

    for &agent in &agents.0 {
        if !rng.random_bool(settings.relocation_chance) {
            continue;
        }
        let Some(origin) = world.0.location_of(agent) else {
            continue;
        };

        let target_world = if rng.random_bool(settings.cross_world_chance) {
            if origin.world.name() == OVERWORLD { WorldId::new(NETHER) } else { WorldId::new(OVERWORLD) }
        } else {
            origin.world.clone()
        };
        let destination = random_spot(&mut rng, &world.0, &target_world, &origin, settings.teleport_range);

        let mut request = RelocationRequest {
            agent,
            origin,
            destination,
            cause: TeleportCause::Feature,
        };
        let outcome = engine.intercept(&mut request, now);
        tally.record(&outcome);

        world.0.set_position(agent, request.destination.clone());
        teleported.write(AgentTeleported { agent, location: request.destination });
    }
}

pub fn log_summary(
    settings: Res<SandboxSettings>,
    tick: Res<SandboxTick>,
    agents: Res<SandboxAgents>,
    engine: Res<ClusterEngineResource>,
    tally: Res<RelocationTally>,
) {
    profile_log!(tick.0, "[SANDBOX] tick {} | {}", tick.0, engine.stats());

    if settings.summary_every == 0 || tick.0 % settings.summary_every != 0 {
        return;
    }
    let clustered = agents
        .0
        .iter()
        .filter(|agent| matches!(engine.report_for(**agent), AgentClusterStatus::Clustered(_)))
        .count();
    info!(
        "[SANDBOX] tick {}: {}/{} agents clustered | relocations kept={} redirected={} ignored={} failed={}",
        tick.0,
        clustered,
        agents.0.len(),
        tally.kept,
        tally.redirected,
        tally.ignored,
        tally.failed
    );
    for name in [OVERWORLD, NETHER] {
        info!("[SANDBOX] {}", engine.world_stats(&WorldId::new(name)));
    }
}

pub fn stop_after_ticks(settings: Res<SandboxSettings>, tick: Res<SandboxTick>, mut exit: MessageWriter<AppExit>) {
    if tick.0 == settings.ticks {
        info!("[SANDBOX] Reached {} ticks, exiting", settings.ticks);
        exit.write(AppExit::Success);
    }
}
