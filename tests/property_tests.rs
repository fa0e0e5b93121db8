#[cfg(test)]
mod property_tests {
    use hbaselines::distributions::{ActionBatch, Categorical, DiagGaussian, ProbabilityDistribution};
    use hbaselines::metrics::{explained_variance, normalize, Statistics};
    use hbaselines::ppo::rollout::RolloutBuffer;
    use hbaselines::ppo::{ppo_loss, LossCoefficients, LossInputs};
    use hbaselines::schedules::Schedule;
    use ndarray::{Array1, Array2};
    use proptest::prelude::*;

    // Strategy for logit matrices with a few rows and columns
    fn logits_strategy() -> impl Strategy<Value = Array2<f32>> {
        (1usize..=4, 2usize..=6).prop_flat_map(|(rows, cols)| {
            prop::collection::vec(-20.0f32..20.0, rows * cols)
                .prop_map(move |v| Array2::from_shape_vec((rows, cols), v).unwrap())
        })
    }

    // Strategy for equally long loss input columns
    fn loss_columns_strategy() -> impl Strategy<Value = Vec<(f32, f32, f32, f32, f32, f32)>> {
        prop::collection::vec(
            (0.0f32..5.0, 0.0f32..5.0, -3.0f32..3.0, -3.0f32..3.0, -2.0f32..2.0, -3.0f32..3.0),
            1..=16,
        )
    }

    proptest! {
        #[test]
        fn test_categorical_probabilities_sum_to_one(logits in logits_strategy()) {
            let pd = Categorical::from_logits(logits);
            for row in pd.probs().rows() {
                prop_assert!((row.sum() - 1.0).abs() < 1e-4);
                prop_assert!(row.iter().all(|&p| p >= 0.0));
            }
        }

        #[test]
        fn test_categorical_entropy_is_bounded(logits in logits_strategy()) {
            let n = logits.ncols() as f32;
            let pd = Categorical::from_logits(logits);
            for &h in pd.entropy().iter() {
                prop_assert!(h >= -1e-5);
                prop_assert!(h <= n.ln() + 1e-4);
            }
        }

        #[test]
        fn test_categorical_mode_has_smallest_neglogp(logits in logits_strategy()) {
            let n = logits.ncols();
            let rows = logits.nrows();
            let pd = Categorical::from_logits(logits);
            let mode = pd.neglogp(&pd.mode()).unwrap();
            for a in 0..n {
                let other = pd.neglogp(&ActionBatch::Discrete(vec![a; rows])).unwrap();
                for (m, o) in mode.iter().zip(other.iter()) {
                    prop_assert!(*m <= *o + 1e-5);
                }
            }
        }

        #[test]
        fn test_gaussian_entropy_depends_only_on_log_std(
            mean in prop::collection::vec(-5.0f32..5.0, 3),
            log_std in prop::collection::vec(-2.0f32..1.0, 3),
        ) {
            let log_std = Array1::from_vec(log_std);
            let a = DiagGaussian::new(Array2::from_shape_vec((1, 3), mean).unwrap(), log_std.clone()).unwrap();
            let b = DiagGaussian::new(Array2::zeros((1, 3)), log_std.clone()).unwrap();
            prop_assert!((a.entropy()[0] - b.entropy()[0]).abs() < 1e-5);
            let expected = log_std.sum() + 1.5 * (1.0 + (2.0 * std::f32::consts::PI).ln());
            prop_assert!((a.entropy()[0] - expected).abs() < 1e-4);
        }

        #[test]
        fn test_ppo_loss_is_finite_and_clipfrac_is_a_fraction(
            columns in loss_columns_strategy(),
            clip_range in 0.05f32..0.5,
            use_huber in any::<bool>(),
        ) {
            let neglogpac: Array1<f32> = columns.iter().map(|c| c.0).collect();
            let old_neglogpac: Array1<f32> = columns.iter().map(|c| c.1).collect();
            let vpred: Array1<f32> = columns.iter().map(|c| c.2).collect();
            let old_vpred: Array1<f32> = columns.iter().map(|c| c.3).collect();
            let advantages: Array1<f32> = columns.iter().map(|c| c.4).collect();
            let returns: Array1<f32> = columns.iter().map(|c| c.5).collect();
            let entropy = Array1::from_elem(columns.len(), 0.5);

            let inputs = LossInputs {
                neglogpac: neglogpac.view(),
                entropy: entropy.view(),
                vpred: vpred.view(),
                old_neglogpac: old_neglogpac.view(),
                old_vpred: old_vpred.view(),
                advantages: advantages.view(),
                returns: returns.view(),
            };
            let coefs = LossCoefficients { clip_range, ent_coef: 0.01, vf_coef: 0.5, use_huber };
            let out = ppo_loss(&inputs, &coefs).unwrap();
            prop_assert!(out.total_loss.is_finite());
            prop_assert!(out.stats.value_loss >= 0.0);
            prop_assert!(out.stats.approxkl >= 0.0);
            prop_assert!((0.0..=1.0).contains(&out.stats.clipfrac));
            prop_assert!(out.d_neglogpac.iter().all(|g| g.is_finite()));
        }

        #[test]
        fn test_gae_returns_are_advantages_plus_values(
            steps in prop::collection::vec((-1.0f32..1.0, -1.0f32..1.0, any::<bool>()), 1..=20),
            last_value in -1.0f32..1.0,
            gamma in 0.5f32..1.0,
            lam in 0.5f32..1.0,
        ) {
            let mut buffer = RolloutBuffer::new();
            for &(reward, value, done) in &steps {
                buffer.add(
                    Array1::zeros(1),
                    ActionBatch::Discrete(vec![0]),
                    reward,
                    value,
                    0.0,
                    done,
                    Array1::zeros(1),
                );
            }
            buffer.compute_gae(last_value, gamma, lam);
            for i in 0..steps.len() {
                prop_assert!((buffer.returns[i] - buffer.advantages[i] - buffer.values[i]).abs() < 1e-5);
            }
            // A terminal last step never looks at last_value
            if steps[steps.len() - 1].2 {
                let n = steps.len() - 1;
                prop_assert!((buffer.advantages[n] - (buffer.rewards[n] - buffer.values[n])).abs() < 1e-6);
            }
        }

        #[test]
        fn test_normalize_gives_zero_mean(values in prop::collection::vec(-100.0f32..100.0, 2..=50)) {
            let normalized = normalize(Array1::from_vec(values).view(), 1e-8);
            let stats = Statistics::from_array(normalized.view());
            prop_assert!(stats.mean.abs() < 1e-3);
            prop_assert!(stats.std <= 1.0 + 1e-3);
        }

        #[test]
        fn test_explained_variance_of_exact_prediction(values in prop::collection::vec(-10.0f32..10.0, 2..=30)) {
            let y = Array1::from_vec(values);
            let ev = explained_variance(y.view(), y.view());
            prop_assert!(ev.is_nan() || (ev - 1.0).abs() < 1e-5);
        }

        #[test]
        fn test_linear_schedule_stays_between_endpoints(
            initial in 0.0f32..1.0,
            final_value in 0.0f32..1.0,
            step in 0usize..200,
            total in 1usize..100,
        ) {
            let v = Schedule::linear(initial, final_value).value_at(step, total);
            prop_assert!(v >= initial.min(final_value) - 1e-6);
            prop_assert!(v <= initial.max(final_value) + 1e-6);
        }
    }
}
