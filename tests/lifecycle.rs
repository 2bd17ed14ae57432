mod common;

use common::{FakeEmulator, HEIGHT, WIDTH, approx, config, env, env_with};
use pokered_rl::env::SETTLE_FRAMES;
use pokered_rl::{
    Action, Buttons, ConfigError, EnvConfig, Emulator, GameProfile, InitError, Phase, PokeEnv,
    RewardConfig, ram,
};

const SCREEN: usize = (WIDTH / 2) * (HEIGHT / 2);

#[test]
fn reset_establishes_baseline() {
    let mut env = env(config());
    assert_eq!(env.phase(), Phase::Uninitialized);
    env.reset().unwrap();

    assert_eq!(env.phase(), Phase::Ready);
    assert_eq!(env.facts(), env.prev_facts());
    assert_eq!(env.position(), (10, 10, 1));
    assert_eq!(env.unique_coords(), 1);
    assert_eq!(env.step_count(), 0);
    assert_eq!(env.frame_count(), 0);
    assert_eq!(env.score(), 0.0);
    assert!(!env.terminal());

    let obs = env.observation();
    assert_eq!(obs.len(), SCREEN + 5);
    assert_eq!(&obs[SCREEN..], &[10.0, 10.0, 1.0, 0.0, 0.0]);
    // encoded before the settle frames run
    assert_eq!(obs[0], 0.0);
    assert_eq!(env.emulator().unwrap().frames, SETTLE_FRAMES as u64);
}

#[test]
fn step_advances_frame_skip_frames() {
    let mut env = env(EnvConfig {
        frame_skip: 3,
        ..config()
    });
    env.reset().unwrap();
    env.step(Action::Noop as usize).unwrap();
    env.step(Action::Noop as usize).unwrap();

    assert_eq!(env.step_count(), 2);
    assert_eq!(env.frame_count(), 6);
    let frames = env.emulator().unwrap().frames;
    assert_eq!(frames, SETTLE_FRAMES as u64 + 6);
    assert!((env.observation()[0] - frames as f32).abs() < 1e-3);
    assert_eq!(env.observation().len(), SCREEN + 5);
}

#[test]
fn walking_rewards_only_new_tiles() {
    let rc = RewardConfig::default();
    let mut env = env(config());
    env.reset().unwrap();

    let r = env.step(Action::Right as usize).unwrap();
    assert_eq!(env.position(), (11, 10, 1));
    assert!(approx(r.reward, rc.coord_bonus), "got {}", r.reward);
    assert_eq!(env.unique_coords(), 2);
    assert_eq!(env.stagnation(), 0);

    let r = env.step(Action::Left as usize).unwrap();
    assert_eq!(r.reward, 0.0);
    assert_eq!(env.stagnation(), 1);
    env.step(Action::Noop as usize).unwrap();
    assert_eq!(env.stagnation(), 2);

    let r = env.step(Action::Up as usize).unwrap();
    assert_eq!(env.position(), (10, 9, 1));
    assert!(approx(r.reward, rc.coord_bonus));
    assert_eq!(env.stagnation(), 0);
    assert!(approx(env.score(), 2.0 * rc.coord_bonus));
}

#[test]
fn badge_earns_badge_bonus() {
    let mut env = env(config());
    env.reset().unwrap();
    env.write_byte(ram::BADGES, 0b0000_0001);
    let r = env.step(Action::Noop as usize).unwrap();
    assert!(approx(r.reward, 1.0), "got {}", r.reward);
    assert_eq!(r.reward, env.reward());

    // losing the badge never costs anything
    env.write_byte(ram::BADGES, 0);
    assert_eq!(env.step(Action::Noop as usize).unwrap().reward, 0.0);
}

#[test]
fn catch_and_level_terms_stack() {
    let mut env = env(config());
    env.reset().unwrap();
    env.write_byte(ram::PARTY_COUNT, 1);
    env.write_byte(ram::PARTY_LEVELS[0], 5);
    let r = env.step(Action::Noop as usize).unwrap();
    assert!(approx(r.reward, 0.5 + 0.25 * 5.0), "got {}", r.reward);
    assert_eq!(env.facts().level_sum(), 5);
    assert_eq!(env.facts(), env.prev_facts());
}

#[test]
fn event_flags_score_on_rise() {
    let profile: GameProfile = serde_json::from_str(
        r#"{ "events": [ { "address": 55111, "bit": 0 }, { "address": 55111, "bit": 3 } ] }"#,
    )
    .unwrap();
    let emu = FakeEmulator::default().at(1, 10, 10);
    let mut env = PokeEnv::with_emulator(emu, config(), RewardConfig::default(), profile).unwrap();
    env.reset().unwrap();
    assert_eq!(env.event_score(), 0);

    env.write_byte(55111, 0b0000_1001);
    let r = env.step(Action::Noop as usize).unwrap();
    assert!(approx(r.reward, 0.2), "got {}", r.reward);
    assert_eq!(env.event_score(), 2);

    env.write_byte(55111, 0);
    assert_eq!(env.step(Action::Noop as usize).unwrap().reward, 0.0);
    assert_eq!(env.event_score(), 0);
}

#[test]
fn default_profile_scores_no_events() {
    let mut env = env(config());
    env.reset().unwrap();
    env.write_byte(55111, 0xFF);
    let r = env.step(Action::Noop as usize).unwrap();
    assert_eq!(r.reward, 0.0);
    assert_eq!(env.event_score(), 0);
}

#[test]
fn episode_length_triggers_auto_reset() {
    let mut env = env(EnvConfig {
        max_episode_length: 3,
        ..config()
    });
    env.reset().unwrap();

    assert!(!env.step(Action::Right as usize).unwrap().terminal);
    assert!(!env.step(Action::Right as usize).unwrap().terminal);
    let last = env.step(Action::Right as usize).unwrap();
    assert!(last.terminal);
    assert!(!last.truncated);
    assert!(approx(last.reward, 0.0025));

    // already reset for the next episode
    assert_eq!(env.step_count(), 0);
    assert_eq!(env.unique_coords(), 1);
    assert_eq!(env.score(), 0.0);
    assert_eq!(env.phase(), Phase::Ready);

    let log = env.log();
    assert_eq!(log.n, 1.0);
    assert_eq!(log.episode_length, 3.0);
    assert_eq!(log.unique_coords, 4.0);
    assert!(approx(log.episode_return, 0.0075));

    let next = env.step(Action::Noop as usize).unwrap();
    assert!(!next.terminal);
    assert_eq!(env.step_count(), 1);
}

#[test]
fn novelty_is_judged_against_previous_episode() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("start.state");
    let mut emu = FakeEmulator::default().at(1, 10, 10);
    emu.save_state(&state).unwrap();

    let mut env = env_with(
        emu,
        EnvConfig {
            state_path: Some(state),
            full_reset: true,
            max_episode_length: 3,
            ..config()
        },
    );
    env.reset().unwrap();

    for action in [Action::Right, Action::Right, Action::Left] {
        env.step(action as usize).unwrap();
    }
    assert_eq!(env.log().n, 1.0);
    assert_eq!(env.position(), (10, 10, 1));

    let r = env.step(Action::Right as usize).unwrap();
    assert!(approx(r.reward, 0.0025), "got {}", r.reward);
    let r = env.step(Action::Right as usize).unwrap();
    assert!(approx(r.reward, 0.0025), "got {}", r.reward);
    let r = env.step(Action::Right as usize).unwrap();
    assert!(r.terminal);
    assert!(approx(r.reward, 0.005), "got {}", r.reward);
}

#[test]
fn failed_state_load_keeps_live_memory() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = env(EnvConfig {
        state_path: Some(dir.path().join("missing.state")),
        full_reset: true,
        ..config()
    });
    env.reset().unwrap();
    assert_eq!(env.position(), (10, 10, 1));
    assert_eq!(env.phase(), Phase::Ready);
}

#[test]
fn full_reset_without_state_path_is_soft() {
    let mut env = env(EnvConfig {
        full_reset: true,
        ..config()
    });
    env.reset().unwrap();
    env.step(Action::Down as usize).unwrap();
    env.reset().unwrap();
    assert_eq!(env.position(), (10, 11, 1));
    assert_eq!(env.unique_coords(), 1);
}

#[test]
fn stepping_before_reset_resets_first() {
    let mut env = env(config());
    env.step(Action::Right as usize).unwrap();
    assert_eq!(env.phase(), Phase::Stepping);
    assert_eq!(env.step_count(), 1);
    assert_eq!(env.unique_coords(), 2);
}

#[test]
fn action_index_selects_buttons() {
    let mut env = env(config());
    env.reset().unwrap();
    env.step(Action::A as usize).unwrap();
    assert_eq!(env.emulator().unwrap().inputs, Buttons::A);
    env.step(Action::Start as usize).unwrap();
    assert_eq!(env.emulator().unwrap().inputs, Buttons::START);

    env.step(42).unwrap();
    assert_eq!(env.emulator().unwrap().inputs, Buttons::NONE);
    assert_eq!(env.position(), (10, 10, 1));
}

#[test]
fn closed_env_is_inert() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = env(config());
    env.reset().unwrap();
    let before = env.step(Action::Right as usize).unwrap();
    let obs = env.observation().to_vec();

    env.close();
    assert_eq!(env.phase(), Phase::Closed);
    assert!(env.emulator().is_none());

    assert_eq!(env.step(Action::Right as usize).unwrap(), before);
    env.reset().unwrap();
    assert_eq!(env.observation(), obs.as_slice());
    assert_eq!(env.step_count(), 1);

    let path = dir.path().join("closed.state");
    env.save_state(&path).unwrap();
    assert!(!path.exists());
    env.write_money(100);
    assert!(env.read_facts().is_none());
    env.close();
}

#[test]
fn missing_rom_is_reported_before_emulator_opens() {
    let dir = tempfile::tempdir().unwrap();
    let rom = dir.path().join("red.gb");
    let err = PokeEnv::<FakeEmulator>::new(
        EnvConfig::new(&rom),
        RewardConfig::default(),
        GameProfile::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err.downcast_ref::<InitError>(), Some(InitError::RomNotFound(p)) if *p == rom));

    std::fs::write(&rom, b"rom").unwrap();
    let env = PokeEnv::<FakeEmulator>::new(
        EnvConfig::new(&rom),
        RewardConfig::default(),
        GameProfile::default(),
    )
    .unwrap();
    assert_eq!(env.observation_len(), SCREEN + 5);
}

#[test]
fn invalid_construction_is_rejected() {
    let build = |emu: FakeEmulator, config: EnvConfig, rc: RewardConfig| {
        PokeEnv::with_emulator(emu, config, rc, GameProfile::default())
            .err()
            .unwrap()
    };

    let err = build(
        FakeEmulator::default(),
        EnvConfig {
            frame_skip: 0,
            ..config()
        },
        RewardConfig::default(),
    );
    assert!(matches!(
        err.downcast_ref::<InitError>(),
        Some(InitError::Config(ConfigError::ZeroFrameSkip))
    ));

    let err = build(FakeEmulator::with_size(161, 144), config(), RewardConfig::default());
    assert!(matches!(
        err.downcast_ref::<InitError>(),
        Some(InitError::FrameSize { width: 161, height: 144 })
    ));

    let err = build(
        FakeEmulator::default(),
        config(),
        RewardConfig {
            catch_bonus: f32::NAN,
            ..Default::default()
        },
    );
    assert!(matches!(
        err.downcast_ref::<InitError>(),
        Some(InitError::Config(ConfigError::RewardBonus { name: "catch_bonus", .. }))
    ));
}

#[test]
fn money_writes_are_packed_decimal() {
    let mut env = env(config());
    env.reset().unwrap();
    env.write_money(123_456);
    assert_eq!(env.read_facts().unwrap().money, 123_456);
    let raw = &env.emulator().unwrap().ram[ram::MONEY as usize..ram::MONEY as usize + 3];
    assert_eq!(raw, &[0x12, 0x34, 0x56]);

    env.write_money(5_000_000);
    env.step(Action::Noop as usize).unwrap();
    assert_eq!(env.facts().money, 999_999);
}

#[test]
fn saved_state_restores_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("here.state");
    let mut env = env(config());
    env.reset().unwrap();
    env.save_state(&path).unwrap();

    env.step(Action::Right as usize).unwrap();
    env.step(Action::Down as usize).unwrap();
    assert_eq!(env.position(), (11, 11, 1));

    env.load_state(&path).unwrap();
    let facts = env.read_facts().unwrap();
    assert_eq!((facts.x, facts.y, facts.map_id), (10, 10, 1));
    assert!(env.load_state(dir.path().join("nope.state")).is_err());
}

#[test]
fn reward_breakdown_accumulates_when_enabled() {
    let mut env = env(config());
    env.set_reward_debug(true);
    env.reset().unwrap();
    env.write_byte(ram::BADGES, 1);
    env.step(Action::Right as usize).unwrap();
    env.step(Action::Right as usize).unwrap();

    let b = env.reward_breakdown();
    assert!(approx(b.badge, 1.0));
    assert!(approx(b.coord, 0.005));
    assert_eq!(b.novelty, 0.0);
    assert!(approx(b.total(), env.score()));

    env.clear_reward_breakdown();
    assert_eq!(env.reward_breakdown().total(), 0.0);
}

#[test]
fn battle_state_tracks_memory() {
    let mut env = env(config());
    env.reset().unwrap();
    assert!(!env.battle_state().is_active());
    env.write_byte(ram::BATTLE_FLAG, 2);
    env.write_byte(ram::GYM_BATTLE_MUSIC, 1);
    env.step(Action::Noop as usize).unwrap();
    assert!(env.battle_state().is_active());
    assert!(env.battle_state().is_gym_battle);

    env.write_byte(ram::BATTLE_FLAG, 0xFF);
    env.step(Action::Noop as usize).unwrap();
    assert!(env.battle_state().was_lost());
}

#[test]
fn episode_log_serializes_to_json() {
    let mut env = env(EnvConfig {
        max_episode_length: 1,
        ..config()
    });
    env.reset().unwrap();
    env.write_byte(ram::PARTY_COUNT, 1);
    env.write_byte(ram::PARTY_LEVELS[0], 7);
    env.step(Action::Noop as usize).unwrap();

    let json = serde_json::to_value(env.log()).unwrap();
    assert_eq!(json["episode_length"], 1.0);
    assert_eq!(json["level_sum"], 7.0);
    assert_eq!(json["party_count"], 1.0);
    assert_eq!(json["levels"][0], 7.0);
    assert_eq!(json["n"], 1.0);
}
