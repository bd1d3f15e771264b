//! Property tests: impact scores stay in `[0, 1]` and are monotone in every
//! component; routing respects the threshold.

use std::sync::Arc;

use govbus_scoring::*;
use govbus_types::{AgentId, AgentMessage, MessagePriority, TenantId};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn scorer() -> ImpactScorer {
    ImpactScorer::new(ScoringConfig::default(), Arc::new(InMemoryHistory::new()))
        .expect("default config is valid")
}

fn message(text: String, priority: MessagePriority) -> AgentMessage {
    AgentMessage::new(
        TenantId::new("acme"),
        AgentId::new("planner"),
        AgentId::new("executor"),
        serde_json::json!({ "text": text }),
    )
    .with_priority(priority)
}

fn arb_priority() -> impl Strategy<Value = MessagePriority> {
    prop_oneof![
        Just(MessagePriority::Low),
        Just(MessagePriority::Normal),
        Just(MessagePriority::High),
        Just(MessagePriority::Critical),
    ]
}

fn arb_component() -> impl Strategy<Value = ImpactComponent> {
    prop::sample::select(ImpactComponent::ALL.to_vec())
}

/// Any f64 a risk model might hand us, including garbage.
fn arb_raw_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        0.0f64..=1.0,
        -10.0f64..10.0,
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
    ]
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// The total is always in [0, 1], whatever the overrides.
    #[test]
    fn score_always_in_unit_interval(
        text in "[a-z ]{0,60}",
        priority in arb_priority(),
        overrides in prop::collection::vec((arb_component(), arb_raw_value()), 0..5),
        cross_tenant in any::<bool>(),
    ) {
        let mut context = ScoringContext::new();
        for (component, value) in overrides {
            context = context.with_override(component, value);
        }
        if cross_tenant {
            context = context.cross_tenant();
        }

        let score = scorer().score(&message(text, priority), &context);
        prop_assert!((0.0..=1.0).contains(&score.total));
        for component in ImpactComponent::ALL {
            prop_assert!((0.0..=1.0).contains(&score.component(component)));
        }
    }

    /// Raising one component with the others fixed never lowers the score.
    #[test]
    fn score_monotone_in_each_component(
        base in prop::array::uniform5(0.0f64..=1.0),
        component in 0usize..5,
        bump in 0.0f64..=1.0,
    ) {
        let weights = ScoringWeights::default();
        let mut raised = base;
        raised[component] = (raised[component] + bump).min(1.0);

        let low = ImpactScore::combine(base, &weights);
        let high = ImpactScore::combine(raised, &weights);
        prop_assert!(high.total >= low.total);
    }

    /// Identical inputs give identical scores.
    #[test]
    fn score_is_deterministic(text in "[a-z ]{0,60}", priority in arb_priority()) {
        let scorer = scorer();
        let msg = message(text, priority);
        let context = ScoringContext::new().with_scopes(["admin", "read:docs"]);
        prop_assert_eq!(scorer.score(&msg, &context), scorer.score(&msg, &context));
    }

    /// Scores at or above the threshold deliberate; below it take the fast path.
    #[test]
    fn routing_respects_threshold(score in 0.0f64..=1.0) {
        let router = AdaptiveRouter::new(RouterConfig::default()).expect("default config is valid");
        let outcome = router.decide(score);
        if score >= router.threshold() {
            prop_assert_eq!(outcome.decision, RouteDecision::Deliberation);
        } else {
            prop_assert_eq!(outcome.decision, RouteDecision::FastPath);
        }
    }

    /// Feedback never pushes the threshold outside its band.
    #[test]
    fn threshold_stays_in_band(
        feedback in prop::collection::vec((0.0f64..=1.0, any::<bool>()), 1..100),
    ) {
        let config = RouterConfig::default();
        let router = AdaptiveRouter::new(config.clone()).expect("default config is valid");
        for (score, approved) in feedback {
            let t = router.record_outcome(score, approved);
            prop_assert!(t >= config.min_threshold && t <= config.max_threshold);
        }
    }
}
