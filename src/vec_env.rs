use anyhow::{Context, Result, anyhow, bail, ensure};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use tracing::{debug, error};

use crate::emulator::Emulator;
use crate::env::{EpisodeLog, PokeEnv, StepResult};

// =============================================================================
// Worker Protocol
// =============================================================================

enum Command {
    Reset,
    Step(usize),
    Close,
}

struct Output {
    id: usize,
    observation: Vec<f32>,
    result: StepResult,
    position: (u8, u8, u8),
    log: EpisodeLog,
}

enum Message {
    Ready { id: usize, obs_len: usize },
    Output(Output),
    Failed { id: usize, error: String },
}

struct Worker {
    tx: mpsc::Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Every command is answered: a worker that errors or panics sends
/// `Failed` before exiting, so `gather` never waits on a dead thread.
fn worker_thread<E, F>(id: usize, factory: Arc<F>, rx: mpsc::Receiver<Command>, tx: mpsc::Sender<Message>)
where
    E: Emulator,
    F: Fn(usize) -> Result<PokeEnv<E>>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker_loop(id, &*factory, rx, &tx)));
    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => format!("{e:#}"),
        Err(payload) => format!("panicked: {}", panic_message(&*payload)),
    };
    error!(env = id, "worker error: {error}");
    let _ = tx.send(Message::Failed { id, error });
}

fn worker_loop<E, F>(id: usize, factory: &F, rx: mpsc::Receiver<Command>, tx: &mpsc::Sender<Message>) -> Result<()>
where
    E: Emulator,
    F: Fn(usize) -> Result<PokeEnv<E>>,
{
    let mut env = factory(id)
        .with_context(|| format!("Failed to build environment {id}"))?
        .with_id(id);
    if tx
        .send(Message::Ready {
            id,
            obs_len: env.observation_len(),
        })
        .is_err()
    {
        return Ok(());
    }

    while let Ok(cmd) = rx.recv() {
        let result = match cmd {
            Command::Reset => {
                env.reset()?;
                StepResult::default()
            }
            Command::Step(action) => env.step(action)?,
            Command::Close => break,
        };
        let out = Output {
            id,
            observation: env.observation().to_vec(),
            result,
            position: env.position(),
            log: *env.log(),
        };
        if tx.send(Message::Output(out)).is_err() {
            break;
        }
    }

    env.close();
    debug!(env = id, "worker stopped");
    Ok(())
}

// =============================================================================
// Vectorized Environment
// =============================================================================

/// Drives `N` independent environments, each built and owned by its own
/// worker thread. Outputs are gathered into flat, env-major buffers.
pub struct VecEnv {
    workers: Vec<Worker>,
    rx: mpsc::Receiver<Message>,
    obs_len: usize,
    observations: Vec<f32>,
    rewards: Vec<f32>,
    terminals: Vec<bool>,
    truncations: Vec<bool>,
    positions: Vec<(u8, u8, u8)>,
    logs: Vec<EpisodeLog>,
    /// Set by the first worker failure; later batch calls refuse to run.
    failure: Option<String>,
}

impl VecEnv {
    /// `factory(i)` runs on worker `i`; the environment it returns is tagged
    /// with id `i`.
    pub fn new<E, F>(num_envs: usize, factory: F) -> Result<Self>
    where
        E: Emulator + 'static,
        F: Fn(usize) -> Result<PokeEnv<E>> + Send + Sync + 'static,
    {
        ensure!(num_envs > 0, "VecEnv needs at least one environment");

        let factory = Arc::new(factory);
        let (tx, rx) = mpsc::channel::<Message>();
        let mut workers = Vec::with_capacity(num_envs);

        for i in 0..num_envs {
            let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
            let factory = factory.clone();
            let tx = tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("env-{i}"))
                .spawn(move || worker_thread(i, factory, cmd_rx, tx))
                .with_context(|| format!("Failed to spawn worker {i}"))?;
            workers.push(Worker {
                tx: cmd_tx,
                handle: Some(handle),
            });
        }
        drop(tx);

        let mut vec_env = Self {
            workers,
            rx,
            obs_len: 0,
            observations: Vec::new(),
            rewards: vec![0.0; num_envs],
            terminals: vec![false; num_envs],
            truncations: vec![false; num_envs],
            positions: vec![(0, 0, 0); num_envs],
            logs: vec![EpisodeLog::default(); num_envs],
            failure: None,
        };

        let mut obs_len = None;
        for _ in 0..num_envs {
            match vec_env.recv()? {
                Message::Ready { id, obs_len: len } => match obs_len {
                    None => obs_len = Some(len),
                    Some(expected) if expected != len => {
                        return Err(anyhow!(
                            "environment {id} observes {len} values, expected {expected}"
                        ));
                    }
                    Some(_) => {}
                },
                Message::Output(out) => {
                    return Err(anyhow!("unexpected output from environment {}", out.id));
                }
                Message::Failed { id, error } => {
                    return Err(anyhow!("environment {id} failed to start: {error}"));
                }
            }
        }
        vec_env.obs_len = obs_len.unwrap_or(0);
        vec_env.observations = vec![0.0; num_envs * vec_env.obs_len];
        debug!(num_envs, obs_len = vec_env.obs_len, "VecEnv ready");
        Ok(vec_env)
    }

    fn recv(&self) -> Result<Message> {
        self.rx
            .recv()
            .map_err(|_| anyhow!("all environment workers disconnected"))
    }

    fn send(&mut self, i: usize, cmd: Command) -> Result<()> {
        if self.workers[i].tx.send(cmd).is_err() {
            let error = format!("environment worker {i} is gone");
            self.failure = Some(error.clone());
            bail!(error);
        }
        Ok(())
    }

    fn check_healthy(&self) -> Result<()> {
        match &self.failure {
            Some(error) => bail!("VecEnv is unusable after a worker failure: {error}"),
            None => Ok(()),
        }
    }

    /// Collects one message per worker. A failure is reported only after
    /// the whole round is drained, and it poisons the `VecEnv`.
    fn gather(&mut self) -> Result<()> {
        let mut failure = None;
        for _ in 0..self.workers.len() {
            let msg = match self.recv() {
                Ok(msg) => msg,
                Err(e) => {
                    failure.get_or_insert(format!("{e:#}"));
                    break;
                }
            };
            match msg {
                Message::Output(out) => {
                    let i = out.id;
                    self.observations[i * self.obs_len..(i + 1) * self.obs_len]
                        .copy_from_slice(&out.observation);
                    self.rewards[i] = out.result.reward;
                    self.terminals[i] = out.result.terminal;
                    self.truncations[i] = out.result.truncated;
                    self.positions[i] = out.position;
                    self.logs[i] = out.log;
                }
                Message::Failed { id, error } => {
                    failure.get_or_insert(format!("environment {id} failed: {error}"));
                }
                Message::Ready { id, .. } => {
                    failure.get_or_insert(format!("environment {id} reported ready twice"));
                }
            }
        }
        match failure {
            Some(error) => {
                self.failure = Some(error.clone());
                Err(anyhow!(error))
            }
            None => Ok(()),
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        self.check_healthy()?;
        for i in 0..self.workers.len() {
            self.send(i, Command::Reset)?;
        }
        self.gather()
    }

    /// One action index per environment.
    pub fn step(&mut self, actions: &[usize]) -> Result<()> {
        self.check_healthy()?;
        ensure!(
            actions.len() == self.workers.len(),
            "expected {} actions, got {}",
            self.workers.len(),
            actions.len()
        );
        for (i, &action) in actions.iter().enumerate() {
            self.send(i, Command::Step(action))?;
        }
        self.gather()
    }

    pub fn num_envs(&self) -> usize {
        self.workers.len()
    }

    pub fn obs_len(&self) -> usize {
        self.obs_len
    }

    /// Env-major, `num_envs * obs_len` values.
    pub fn observations(&self) -> &[f32] {
        &self.observations
    }

    pub fn observation(&self, i: usize) -> &[f32] {
        &self.observations[i * self.obs_len..(i + 1) * self.obs_len]
    }

    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    pub fn terminals(&self) -> &[bool] {
        &self.terminals
    }

    pub fn truncations(&self) -> &[bool] {
        &self.truncations
    }

    /// `(x, y, map)` per environment as of the last batch call.
    pub fn positions(&self) -> &[(u8, u8, u8)] {
        &self.positions
    }

    /// Mean summary over environments that have finished at least one
    /// episode; `n` is the total number of finished episodes.
    pub fn log(&self) -> Option<EpisodeLog> {
        mean_log(&self.logs)
    }

    /// Stops every worker and waits for it to exit. Idempotent.
    pub fn close(&mut self) {
        for worker in &self.workers {
            let _ = worker.tx.send(Command::Close);
        }
        for (i, worker) in self.workers.iter_mut().enumerate() {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    error!(env = i, "worker panicked");
                }
            }
        }
    }
}

impl Drop for VecEnv {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn mean_log(logs: &[EpisodeLog]) -> Option<EpisodeLog> {
    let done: Vec<&EpisodeLog> = logs.iter().filter(|l| l.n > 0.0).collect();
    if done.is_empty() {
        return None;
    }
    let k = done.len() as f32;
    let mut out = EpisodeLog::default();
    for log in &done {
        out.episode_length += log.episode_length / k;
        out.episode_return += log.episode_return / k;
        out.level_sum += log.level_sum / k;
        out.money += log.money / k;
        for (dst, src) in out.levels.iter_mut().zip(log.levels) {
            *dst += src / k;
        }
        out.unique_coords += log.unique_coords / k;
        out.event_sum += log.event_sum / k;
        out.party_count += log.party_count / k;
        out.badges += log.badges / k;
        out.n += log.n;
    }
    Some(out)
}
