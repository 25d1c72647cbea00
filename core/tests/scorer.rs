use quaternion_core::{
    config::{ScorerConfig, SimulationConfig},
    scorer::{ActionKind, UtilityScorer},
    simulation::{ActionCosts, MapConfig, MatchSimulation},
};

fn sim() -> MatchSimulation {
    MatchSimulation::start(
        12345,
        MapConfig::default(),
        ["AUREN".into(), "OPPONENT".into()],
        SimulationConfig::default(),
        ActionCosts::from(&ScorerConfig::default()),
    )
    .expect("default match starts")
}

#[test]
fn identical_snapshots_yield_identical_rankings() {
    let mut sim = sim();
    let scorer = UtilityScorer::new(ScorerConfig::default());

    for tick in 1..=120 {
        let snapshot = sim.snapshot_for("AUREN").unwrap();
        let first = scorer.score(&snapshot);
        let again = scorer.score(&snapshot.clone());
        let fresh = UtilityScorer::new(ScorerConfig::default()).score(&snapshot);
        assert_eq!(first, again, "scorer not pure at tick {tick}");
        assert_eq!(first, fresh, "scorer depends on instance state at tick {tick}");

        sim.apply("AUREN", first[0].action).unwrap();
        sim.step(tick).unwrap();
    }
}

#[test]
fn rankings_are_sorted_and_complete() {
    let mut sim = sim();
    let scorer = UtilityScorer::new(ScorerConfig::default());
    for tick in 1..=60 {
        let ranked = scorer.score(&sim.snapshot_for("OPPONENT").unwrap());
        assert_eq!(ranked.len(), ActionKind::ALL.len());
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
        sim.step(tick).unwrap();
    }
}

#[test]
fn opening_state_favours_production() {
    // 8 starting units against a floor of 10, with ore to spare.
    let ranked = UtilityScorer::new(ScorerConfig::default()).score(&sim().snapshot_for("AUREN").unwrap());
    assert_eq!(ranked[0].action, ActionKind::Produce);
    assert_eq!(ranked[0].score, 68.0);
}
