// =============================================================================
// Pokémon Red RL environment harness
// =============================================================================
// Build & Run:
//   cargo build --release
//   cargo run --release -- benchmark --rom red.gb --state start.state --envs 8
//   cargo run --release -- play --rom red.gb --model policy.safetensors
//   cargo run --release -- inspect --rom red.gb --state start.state
//   cargo run --release --features window -- manual --rom red.gb

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Instant;

use pokered_rl::{
    Action, EnvConfig, Emulator, GameBoyCore, GameFacts, GameProfile, Policy, PolicyConfig,
    PokeEnv, RewardConfig, VecEnv,
};

type Env = PokeEnv<GameBoyCore>;

// =============================================================================
// Environment Setup
// =============================================================================

#[derive(Args, Clone)]
struct EnvArgs {
    #[arg(long)]
    rom: PathBuf,
    /// Persisted emulator state loaded on every full reset
    #[arg(long)]
    state: Option<PathBuf>,
    /// JSON game profile (RAM layout and event table). Without one the
    /// built-in layout is used and no event flags are scored.
    #[arg(long)]
    profile: Option<PathBuf>,
    #[arg(long, default_value = "1")]
    frame_skip: u32,
    #[arg(long, default_value = "20480")]
    max_episode_length: u32,
    /// Keep live emulator memory across resets
    #[arg(long, default_value_t = false)]
    soft_reset: bool,
}

impl EnvArgs {
    fn config(&self) -> EnvConfig {
        EnvConfig {
            state_path: self.state.clone(),
            frame_skip: self.frame_skip,
            max_episode_length: self.max_episode_length,
            full_reset: !self.soft_reset,
            ..EnvConfig::new(&self.rom)
        }
    }

    fn profile(&self) -> Result<GameProfile> {
        match &self.profile {
            Some(path) => GameProfile::load(path),
            None => Ok(GameProfile::default()),
        }
    }

    fn build(&self) -> Result<Env> {
        Env::new(self.config(), RewardConfig::default(), self.profile()?)
    }
}

fn print_facts(facts: &GameFacts, event_score: u32) {
    eprintln!(
        "map={:3} x={:3} y={:3} badges=0b{:08b} party={} levels={:?} money={} events={}",
        facts.map_id,
        facts.x,
        facts.y,
        facts.badges,
        facts.party_count,
        facts.levels,
        facts.money,
        event_score,
    );
}

// =============================================================================
// Benchmark
// =============================================================================

fn benchmark(args: &BenchmarkArgs) -> Result<()> {
    let env_args = args.env.clone();
    let mut envs = VecEnv::new(args.envs, move |_| env_args.build())?;
    let mut rng = match args.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };

    envs.reset()?;
    let mut actions = vec![0usize; envs.num_envs()];
    let t_start = Instant::now();
    for _ in 0..args.steps {
        for a in actions.iter_mut() {
            *a = rng.random_range(0..Action::COUNT);
        }
        envs.step(&actions)?;
    }
    let elapsed = t_start.elapsed().as_secs_f64();
    let total = args.steps * envs.num_envs() as u64;

    eprintln!(
        "{} envs × {} steps in {elapsed:.2}s: {:.0} steps/s",
        envs.num_envs(),
        args.steps,
        total as f64 / elapsed.max(1e-9)
    );
    match envs.log() {
        Some(log) => println!("{}", serde_json::to_string_pretty(&log)?),
        None => eprintln!("No episode finished; raise --steps above --max-episode-length for a summary"),
    }
    envs.close();
    Ok(())
}

// =============================================================================
// Policy Rollouts
// =============================================================================

fn play(args: &PlayArgs) -> Result<()> {
    let mut config = args.env.config();
    config.render_enabled = args.render;
    let mut env = Env::new(config, RewardConfig::default(), args.env.profile()?)?;

    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    let mut policy = Policy::new(&device, &PolicyConfig::default(), env.encoder())?;
    match &args.model {
        Some(path) => policy.load(path)?,
        None => eprintln!("No --model given; acting with freshly initialized weights"),
    }

    #[cfg(feature = "window")]
    let mut hub = pokered_rl::RenderHub::new();

    for ep in 0..args.episodes {
        env.reset()?;
        loop {
            let action = policy.act(env.observation(), args.greedy)?;
            let result = env.step(action)?;
            #[cfg(feature = "window")]
            env.render(&mut hub)?;
            if result.terminal {
                break;
            }
        }
        let log = env.log();
        eprintln!(
            "Episode {}: return={:.3}, steps={}, unique_coords={}, events={}, badges={}",
            ep + 1,
            log.episode_return,
            log.episode_length,
            log.unique_coords,
            log.event_sum,
            log.badges,
        );
        if args.json {
            println!("{}", serde_json::to_string(log)?);
        }
    }

    env.close();
    Ok(())
}

// =============================================================================
// Memory Inspection and State Capture
// =============================================================================

fn inspect(args: &InspectArgs) -> Result<()> {
    let mut env = args.env.build()?;
    env.reset()?;
    for _ in 0..args.ticks {
        env.step(Action::Noop as usize)?;
    }

    let facts = env.read_facts().context("environment has no emulator")?;
    let events = env.read_event_score().unwrap_or_default();
    print_facts(&facts, events);
    let battle = env.battle_state();
    eprintln!(
        "battle: flag={} type={} gym={} turns={}",
        battle.in_battle, battle.battle_type, battle.is_gym_battle, battle.turn_count
    );
    Ok(())
}

fn save_state(args: &SaveStateArgs) -> Result<()> {
    let mut env = args.env.build()?;
    env.reset()?;
    let emu = env.emulator_mut().context("environment has no emulator")?;
    for i in 0..args.frames {
        // tap Start periodically to get past the title screens
        let held = if args.press_start && i % 60 < 5 {
            pokered_rl::Buttons::START
        } else {
            pokered_rl::Buttons::NONE
        };
        emu.set_inputs(held);
        emu.advance_frame()?;
    }
    env.save_state(&args.out)?;
    eprintln!("Saved state after {} frames to {}", args.frames, args.out.display());
    if let (Some(facts), Some(events)) = (env.read_facts(), env.read_event_score()) {
        print_facts(&facts, events);
    }
    Ok(())
}

// =============================================================================
// Manual Play
// =============================================================================

#[cfg(feature = "window")]
fn manual(args: &ManualArgs) -> Result<()> {
    use minifb::{Key, KeyRepeat};
    use pokered_rl::render::{RenderHub, buttons_held};

    eprintln!("Arrows move, Z = B, X = A, A = Select, S = Start, F5 saves state");

    let mut env = args.env.build()?;
    env.reset()?;
    let mut hub = RenderHub::new();
    let (width, height) = env
        .emulator()
        .map(|emu| emu.frame_size())
        .context("environment has no emulator")?;
    let id = hub.register("Pokémon Red (manual)", width, height)?;

    let mut frame = 0u64;
    while hub.is_open(id) {
        let (held, save) = match hub.window(id) {
            Some(window) => (
                buttons_held(window),
                window.is_key_pressed(Key::F5, KeyRepeat::No),
            ),
            None => break,
        };
        if save {
            env.save_state(&args.save)?;
            eprintln!("Saved state to {}", args.save.display());
        }

        let emu = env.emulator_mut().context("environment has no emulator")?;
        emu.set_inputs(held);
        emu.advance_frame()?;
        if !hub.present(id, emu.frame_buffer(), width, height)? {
            break;
        }

        frame += 1;
        if frame % 60 == 0 {
            if let (Some(facts), Some(events)) = (env.read_facts(), env.read_event_score()) {
                print_facts(&facts, events);
            }
        }
    }
    Ok(())
}

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "pokered-rl", about = "Pokémon Red RL environment harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Step random actions across parallel environments and report throughput
    Benchmark(BenchmarkArgs),
    /// Roll out a policy and print per-episode summaries
    Play(PlayArgs),
    /// Print game facts after an optional state load
    Inspect(InspectArgs),
    /// Advance emulation and persist the emulator state
    SaveState(SaveStateArgs),
    /// Play manually with keyboard
    #[cfg(feature = "window")]
    Manual(ManualArgs),
}

#[derive(Parser)]
struct BenchmarkArgs {
    #[command(flatten)]
    env: EnvArgs,
    #[arg(long, default_value = "1")]
    envs: usize,
    #[arg(long, default_value = "10000")]
    steps: u64,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Parser)]
struct PlayArgs {
    #[command(flatten)]
    env: EnvArgs,
    #[arg(long)]
    model: Option<PathBuf>,
    #[arg(long, default_value = "1")]
    episodes: usize,
    #[arg(long, default_value_t = false)]
    greedy: bool,
    #[arg(long, default_value_t = false)]
    cpu: bool,
    #[arg(long, default_value_t = false)]
    render: bool,
    /// Also print each episode summary as JSON on stdout
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Parser)]
struct InspectArgs {
    #[command(flatten)]
    env: EnvArgs,
    /// No-op ticks to run before reading memory
    #[arg(long, default_value = "0")]
    ticks: u32,
}

#[derive(Parser)]
struct SaveStateArgs {
    #[command(flatten)]
    env: EnvArgs,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "600")]
    frames: u32,
    #[arg(long, default_value_t = false)]
    press_start: bool,
}

#[cfg(feature = "window")]
#[derive(Parser)]
struct ManualArgs {
    #[command(flatten)]
    env: EnvArgs,
    /// Where F5 writes the emulator state
    #[arg(long, default_value = "manual.state")]
    save: PathBuf,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Benchmark(args) => benchmark(args),
        Commands::Play(args) => play(args),
        Commands::Inspect(args) => inspect(args),
        Commands::SaveState(args) => save_state(args),
        #[cfg(feature = "window")]
        Commands::Manual(args) => manual(args),
    }
}
