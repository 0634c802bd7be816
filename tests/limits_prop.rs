use petra_conditions::limits::{classify, evaluate, BoundarySet, LimitConfiguration, LimitState};
use proptest::prelude::*;

fn four_limits(deadband: f64) -> LimitConfiguration {
    LimitConfiguration {
        high_high: Some(90.0),
        high: Some(80.0),
        low: Some(20.0),
        low_low: Some(10.0),
        deadband,
        ..Default::default()
    }
}

proptest! {
    #[test]
    fn test_high_boundary_matches_hysteresis_model(
        deadband in 0.0f64..5.0,
        values in prop::collection::vec(60.0f64..100.0, 1..200),
    ) {
        let config = LimitConfiguration { high: Some(80.0), deadband, ..Default::default() };
        let mut previous = BoundarySet::empty();
        let mut model = false;
        for value in values {
            model = if model { value >= 80.0 - deadband } else { value > 80.0 };
            let eval = evaluate(value, &config, previous);
            prop_assert_eq!(eval.active.contains(BoundarySet::HIGH), model);
            previous = eval.active;
        }
    }

    #[test]
    fn test_values_inside_deadband_never_toggle(
        deadband in 0.5f64..5.0,
        jitter in prop::collection::vec(0.0f64..1.0, 1..100),
    ) {
        let config = four_limits(deadband);
        let entered = evaluate(85.0, &config, BoundarySet::empty());
        prop_assert_eq!(entered.state, LimitState::High);

        let mut previous = entered.active;
        for j in jitter {
            // Anywhere in [high - deadband, high]
            let value = 80.0 - deadband * j;
            let eval = evaluate(value, &config, previous);
            prop_assert_eq!(eval.state, LimitState::High);
            prop_assert!(eval.crossings.is_empty());
            previous = eval.active;
        }
    }

    #[test]
    fn test_exclusive_state_is_most_severe_active(
        values in prop::collection::vec(0.0f64..100.0, 1..200),
    ) {
        let config = four_limits(2.0);
        let mut previous = LimitState::Normal;
        let mut active = BoundarySet::empty();
        for value in values {
            let exclusive = classify(value, &config, previous);
            let full = evaluate(value, &config, active);
            prop_assert_eq!(exclusive.state, LimitState::from_boundary(exclusive.active.most_severe()));
            prop_assert_eq!(exclusive.state, full.state);
            previous = exclusive.state;
            active = full.active;
        }
    }

    #[test]
    fn test_non_finite_values_keep_state(start in 0.0f64..100.0) {
        let config = four_limits(1.0);
        let before = evaluate(start, &config, BoundarySet::empty());
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let after = evaluate(value, &config, before.active);
            prop_assert_eq!(after.active, before.active);
            prop_assert_eq!(after.state, before.state);
        }
    }
}
