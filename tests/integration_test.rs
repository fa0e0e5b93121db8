use std::sync::Arc;

use hbaselines::comm::{Communicator, ThreadGroup};
use hbaselines::distributions::ActionBatch;
use hbaselines::policies::Policy;
use hbaselines::ppo::{PpoConfig, PpoPolicy, PpoPolicyBuilder};
use hbaselines::schedules::Schedule;
use hbaselines::spaces::Space;
use ndarray::{array, Array1};

/// One-step episodes where action 1 pays 1 and action 0 pays nothing.
fn run_bandit_rollout(policy: &mut PpoPolicy, steps: usize) {
    let obs = array![[1.0]];
    for _ in 0..steps {
        let action = policy.get_action(obs.view(), None, true, false, 0).unwrap();
        let reward = if action == ActionBatch::Discrete(vec![1]) { 1.0 } else { 0.0 };
        policy
            .store_transition(obs.row(0), None, &action, reward, obs.row(0), None, true, 0)
            .unwrap();
    }
}

fn bandit_policy(seed: u64) -> PpoPolicy {
    PpoPolicyBuilder::new(Space::uniform_box(1, -1.0, 1.0), Space::discrete(2))
        .layers(vec![16])
        .learning_rate(Schedule::constant(3e-3))
        .n_steps(32)
        .n_minibatches(4)
        .n_opt_epochs(4)
        .seed(seed)
        .build()
        .unwrap()
}

fn neglogp_of_paying_arm(policy: &PpoPolicy) -> f32 {
    let (_, neglogp) = policy
        .model()
        .evaluate(array![[1.0]].view(), &ActionBatch::Discrete(vec![1]))
        .unwrap();
    neglogp[0]
}

#[test]
fn test_bandit_training_prefers_paying_arm() {
    let mut policy = bandit_policy(0);
    policy.initialize().unwrap();
    let before = neglogp_of_paying_arm(&policy);

    for _ in 0..30 {
        run_bandit_rollout(&mut policy, 32);
        policy.update(true).unwrap();
    }

    let after = neglogp_of_paying_arm(&policy);
    assert!(after < before, "neglogp went from {} to {}", before, after);
    assert_eq!(policy.num_updates(), 30);

    let td_map = policy.get_td_map();
    for key in ["policy_loss", "value_loss", "policy_entropy", "approxkl", "clipfrac", "learning_rate"] {
        assert!(td_map.contains_key(key), "missing {}", key);
    }
}

#[test]
fn test_checkpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.bin");

    let mut trained = bandit_policy(1);
    run_bandit_rollout(&mut trained, 32);
    trained.update(true).unwrap();
    trained.save(&path).unwrap();

    let mut restored = bandit_policy(2);
    assert_ne!(restored.model().get_flat_params(), trained.model().get_flat_params());
    restored.load(&path).unwrap();
    assert_eq!(restored.model().get_flat_params(), trained.model().get_flat_params());

    // A checkpoint of a different architecture is refused
    let mut wider = PpoPolicyBuilder::new(Space::uniform_box(1, -1.0, 1.0), Space::discrete(2))
        .layers(vec![32])
        .seed(3)
        .build()
        .unwrap();
    assert!(wider.load(&path).is_err());
}

#[test]
fn test_thread_group_keeps_workers_in_sync() {
    let group = ThreadGroup::new(2).unwrap();
    let results: Vec<(Vec<f32>, Vec<f32>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|member| {
                scope.spawn(move || {
                    let seed = 10 + member.rank() as u64;
                    let comm: Arc<dyn Communicator> = Arc::new(member);
                    let mut policy = PpoPolicyBuilder::new(Space::uniform_box(1, -1.0, 1.0), Space::discrete(2))
                        .layers(vec![8])
                        .n_steps(16)
                        .n_minibatches(2)
                        .n_opt_epochs(2)
                        .seed(seed)
                        .comm(comm)
                        .build()
                        .unwrap();
                    let initial = policy.model().get_flat_params();
                    run_bandit_rollout(&mut policy, 16);
                    policy.update(true).unwrap();
                    (initial, policy.model().get_flat_params())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let (initial0, trained0) = &results[0];
    let (initial1, trained1) = &results[1];
    assert_eq!(initial0, initial1);
    assert_eq!(trained0, trained1);
    assert_ne!(initial0, trained0);
}

/// Both ranks run a rollout of their own length and then update.
fn update_in_pair(steps: [usize; 2]) -> Vec<(bool, bool)> {
    let group = ThreadGroup::new(2).unwrap();
    std::thread::scope(|scope| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|member| {
                let rank_steps = steps[member.rank()];
                scope.spawn(move || {
                    let comm: Arc<dyn Communicator> = Arc::new(member);
                    let mut policy = PpoPolicyBuilder::new(Space::uniform_box(1, -1.0, 1.0), Space::discrete(2))
                        .layers(vec![8])
                        .n_steps(16)
                        .n_minibatches(2)
                        .seed(3)
                        .comm(comm)
                        .build()
                        .unwrap();
                    let initial = policy.model().get_flat_params();
                    run_bandit_rollout(&mut policy, rank_steps);
                    let failed = policy.update(true).is_err();
                    (failed, policy.model().get_flat_params() == initial)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_unequal_sample_counts_fail_every_worker() {
    assert_eq!(update_in_pair([16, 12]), vec![(true, true), (true, true)]);
}

#[test]
fn test_empty_worker_fails_every_worker() {
    assert_eq!(update_in_pair([16, 0]), vec![(true, true), (true, true)]);
}

#[test]
fn test_config_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ppo.json");
    std::fs::write(
        &path,
        r#"{
            "n_steps": 8,
            "n_minibatches": 2,
            "cliprange": {"type": "linear_decay", "initial": 0.2, "final_value": 0.1},
            "total_updates": 2,
            "seed": 5
        }"#,
    )
    .unwrap();

    let config = PpoConfig::from_json_file(&path).unwrap();
    assert_eq!(config.nbatch_train(), 4);

    let mut params = hbaselines::policies::PolicyParams::new(Space::uniform_box(1, -1.0, 1.0), Space::discrete(2));
    params.layers = vec![4];
    let mut policy = PpoPolicyBuilder::from_parts(params, config).build().unwrap();
    assert_eq!(policy.current_hyperparameters().1, 0.2);

    run_bandit_rollout(&mut policy, 8);
    policy.update(true).unwrap();
    let (_, clip_range) = policy.current_hyperparameters();
    assert!((clip_range - 0.15).abs() < 1e-6);
    assert_eq!(policy.get_td_map()["clip_range"], 0.2);
}

#[test]
fn test_continuous_policy_with_context() {
    let mut policy = PpoPolicyBuilder::new(Space::uniform_box(2, -1.0, 1.0), Space::uniform_box(1, -2.0, 2.0))
        .co_space(Space::uniform_box(1, 0.0, 1.0))
        .layers(vec![8])
        .n_steps(8)
        .n_minibatches(2)
        .seed(6)
        .build()
        .unwrap();
    assert_eq!(policy.model().ob_dim(), 3);

    let obs = array![[0.5, -0.5]];
    let goal = array![[0.25]];
    for _ in 0..8 {
        let action = policy.get_action(obs.view(), Some(goal.view()), true, false, 0).unwrap();
        let reward = match &action {
            ActionBatch::Continuous(a) => -(a[[0, 0]] - 0.25).powi(2),
            ActionBatch::Discrete(_) => unreachable!(),
        };
        policy
            .store_transition(obs.row(0), Some(goal.row(0)), &action, reward, obs.row(0), Some(goal.row(0)), false, 0)
            .unwrap();
    }
    policy.update(true).unwrap();
    let log_std: &Array1<f32> = policy.model().log_std().unwrap();
    assert_eq!(log_std.len(), 1);
    assert_eq!(policy.num_stored(), 0);
    assert_eq!(policy.num_updates(), 1);
}
