//! A point mass on a line learns to move toward a goal given as context.
//!
//! Shows:
//! - a continuous-action PPO policy with a context space
//! - several environments feeding one policy
//! - `tracing` output controlled by `verbose` and `RUST_LOG`
//! - checkpointing

use hbaselines::distributions::ActionBatch;
use hbaselines::logging;
use hbaselines::policies::Policy;
use hbaselines::ppo::PpoPolicyBuilder;
use hbaselines::schedules::Schedule;
use hbaselines::spaces::Space;
use ndarray::{array, Array1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const N_ENVS: usize = 4;
const N_STEPS: usize = 64;
const HORIZON: usize = 50;

struct PointMass {
    position: f32,
    goal: f32,
    steps: usize,
}

impl PointMass {
    fn new(rng: &mut StdRng) -> Self {
        let mut env = PointMass {
            position: 0.0,
            goal: 0.0,
            steps: 0,
        };
        env.reset(rng);
        env
    }

    fn reset(&mut self, rng: &mut StdRng) {
        self.position = rng.gen_range(-1.0..1.0);
        self.goal = rng.gen_range(-1.0..1.0);
        self.steps = 0;
    }

    fn observation(&self) -> Array1<f32> {
        array![self.position]
    }

    fn context(&self) -> Array1<f32> {
        array![self.goal]
    }

    /// Move by the clamped action; reward is the negative distance to the goal.
    fn step(&mut self, action: f32) -> (f32, bool) {
        self.position = (self.position + 0.1 * action.clamp(-1.0, 1.0)).clamp(-1.0, 1.0);
        self.steps += 1;
        let distance = (self.position - self.goal).abs();
        let done = distance < 0.05 || self.steps >= HORIZON;
        (-distance, done)
    }
}

fn main() -> hbaselines::Result<()> {
    logging::init(1);

    let total_updates = 40;
    let mut policy = PpoPolicyBuilder::new(Space::uniform_box(1, -1.0, 1.0), Space::uniform_box(1, -1.0, 1.0))
        .co_space(Space::uniform_box(1, -1.0, 1.0))
        .layers(vec![32, 32])
        .verbose(1)
        .n_envs(N_ENVS)
        .n_steps(N_STEPS)
        .n_minibatches(4)
        .learning_rate(Schedule::linear(1e-3, 1e-4))
        .total_updates(total_updates)
        .seed(0)
        .build()?;
    policy.initialize()?;

    let mut rng = StdRng::seed_from_u64(42);
    let mut envs: Vec<PointMass> = (0..N_ENVS).map(|_| PointMass::new(&mut rng)).collect();

    for update in 0..total_updates {
        let mut episode_return = 0.0;
        for _ in 0..N_STEPS {
            for (env_num, env) in envs.iter_mut().enumerate() {
                let obs0 = env.observation();
                let context = env.context();
                let obs_batch = obs0.view().insert_axis(ndarray::Axis(0));
                let context_batch = context.view().insert_axis(ndarray::Axis(0));
                let action = policy.get_action(obs_batch, Some(context_batch), true, false, env_num)?;

                let value = match &action {
                    ActionBatch::Continuous(a) => a[[0, 0]],
                    ActionBatch::Discrete(_) => 0.0,
                };
                let (reward, done) = env.step(value);
                episode_return += reward;
                let obs1 = env.observation();
                policy.store_transition(
                    obs0.view(),
                    Some(context.view()),
                    &action,
                    reward,
                    obs1.view(),
                    Some(context.view()),
                    done,
                    env_num,
                )?;
                if done {
                    env.reset(&mut rng);
                }
            }
        }

        policy.update(true)?;
        if update % 10 == 0 {
            let td_map = policy.get_td_map();
            println!(
                "update {:3}  mean reward {:7.3}  value loss {:.4}  entropy {:.3}",
                update,
                episode_return / (N_STEPS * N_ENVS) as f32,
                td_map.get("value_loss").copied().unwrap_or(f32::NAN),
                td_map.get("policy_entropy").copied().unwrap_or(f32::NAN),
            );
        }
    }

    let path = std::env::temp_dir().join("goal_reaching_ppo.bin");
    policy.save(&path)?;
    println!("saved policy to {}", path.display());
    Ok(())
}
