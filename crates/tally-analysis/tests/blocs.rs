//! End-to-end pipeline behavior on synthetic conversations.

use proptest::prelude::*;

use tally_analysis::analyze;
use tally_core::config::EngineConfig;
use tally_core::error::ComputeError;
use tally_core::event::{Envelope, Event};
use tally_core::{
    GroupId, ModerationState, ParticipantId, StatementId, Vote, VoteMatrix, VoteValue,
};
use tally_sim::BlocScenario;

fn fold(events: &[Envelope]) -> VoteMatrix {
    let mut matrix = VoteMatrix::new();
    for envelope in events {
        match envelope.event {
            Event::Vote(vote) => {
                matrix.apply_vote(&vote);
            }
            Event::Moderation { statement, state } => {
                matrix.set_moderation(statement, state);
            }
        }
    }
    matrix
}

fn wide_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.repness.top_n = 10;
    config
}

fn ids(list: &[tally_analysis::repness::StatementRepness]) -> Vec<u64> {
    list.iter().map(|s| s.statement.0).collect()
}

#[test]
fn two_blocs_split_into_two_groups() {
    let matrix = fold(&BlocScenario::default().generate().unwrap());
    let analysis = analyze(&matrix.snapshot(), &wide_config()).unwrap();

    assert_eq!(analysis.clusters.k(), 2);
    assert!(analysis.degradations.is_empty(), "{:?}", analysis.degradations);
    for p in 1..=10 {
        assert_eq!(analysis.clusters.group_of(ParticipantId(p)), Some(GroupId(0)));
    }
    for p in 11..=20 {
        assert_eq!(analysis.clusters.group_of(ParticipantId(p)), Some(GroupId(1)));
    }

    let a = analysis.repness.group(GroupId(0)).unwrap();
    let b = analysis.repness.group(GroupId(1)).unwrap();
    assert_eq!(ids(&a.agree), (1..=7).collect::<Vec<_>>());
    assert_eq!(ids(&b.agree), (8..=15).collect::<Vec<_>>());
    assert_eq!(ids(&a.disagree), (8..=15).collect::<Vec<_>>());
    assert_eq!(ids(&b.disagree), (1..=7).collect::<Vec<_>>());
    assert!(a.agree.iter().all(|s| s.group_size == 10 && s.p_value < 0.05));
}

#[test]
fn shuffled_delivery_gives_the_same_result() {
    let ordered = fold(&BlocScenario::default().generate().unwrap());
    let shuffled = fold(
        &BlocScenario {
            shuffle: true,
            seed: 9,
            ..BlocScenario::default()
        }
        .generate()
        .unwrap(),
    );
    let a = analyze(&ordered.snapshot(), &wide_config()).unwrap();
    let b = analyze(&shuffled.snapshot(), &wide_config()).unwrap();
    assert_eq!(a.projection, b.projection);
    assert_eq!(a.clusters, b.clusters);
    assert_eq!(a.repness, b.repness);
}

#[test]
fn noisy_partial_blocs_still_split() {
    let scenario = BlocScenario {
        participants: 60,
        statements: 20,
        noise_percent: 5,
        participation_percent: 90,
        seed: 11,
        ..BlocScenario::default()
    };
    let matrix = fold(&scenario.generate().unwrap());
    let analysis = analyze(&matrix.snapshot(), &EngineConfig::default()).unwrap();

    assert_eq!(analysis.clusters.k(), 2);
    let group_of_bloc = |bloc_member: u64| analysis.clusters.group_of(ParticipantId(bloc_member));
    assert_ne!(group_of_bloc(1), group_of_bloc(60));
    for group in &analysis.repness.groups {
        assert!(!group.agree.is_empty());
    }
}

#[test]
fn one_participant_is_insufficient() {
    let mut matrix = VoteMatrix::new();
    for s in 1..=5 {
        matrix.apply_vote(&Vote::new(ParticipantId(1), StatementId(s), VoteValue::Agree, s));
    }
    let err = analyze(&matrix.snapshot(), &EngineConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::InsufficientData {
            participants: 1,
            statements: 5
        }
    ));
}

#[test]
fn rejected_statement_is_excluded_everywhere() {
    let mut events = BlocScenario::default().generate().unwrap();
    events.push(Envelope::new(
        BlocScenario::default().conversation,
        Event::Moderation {
            statement: StatementId(3),
            state: ModerationState::Rejected,
        },
    ));
    let matrix = fold(&events);
    let analysis = analyze(&matrix.snapshot(), &wide_config()).unwrap();

    assert!(!analysis.projection.statements.contains(&StatementId(3)));
    assert_eq!(analysis.projection.statements.len(), 14);
    assert!(!analysis.tallies.contains_key(&StatementId(3)));
    assert!(analysis.repness.stats.iter().all(|s| s.statement != StatementId(3)));
    assert_eq!(
        ids(&analysis.repness.group(GroupId(0)).unwrap().agree),
        vec![1, 2, 4, 5, 6, 7]
    );
    assert!(
        analysis
            .participation
            .values()
            .all(|&votes| votes == 14)
    );
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

fn arb_votes() -> impl Strategy<Value = Vec<(u64, u64, i8)>> {
    prop::collection::vec((0u64..30, 0u64..10, -1i8..=1), 0..300)
}

fn build(votes: &[(u64, u64, i8)]) -> VoteMatrix {
    let mut matrix = VoteMatrix::new();
    for (ts, &(p, s, raw)) in (0u64..).zip(votes) {
        if let Some(value) = VoteValue::from_i8(raw) {
            matrix.apply_vote(&Vote::new(ParticipantId(p), StatementId(s), value, ts));
        }
    }
    matrix
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn projection_is_deterministic(votes in arb_votes()) {
        let snapshot = build(&votes).snapshot();
        let config = EngineConfig::default();
        match (analyze(&snapshot, &config), analyze(&snapshot, &config)) {
            (Ok(a), Ok(b)) => {
                prop_assert_eq!(a.projection, b.projection);
                prop_assert_eq!(a.clusters, b.clusters);
            }
            (Err(a), Err(b)) => prop_assert_eq!(a, b),
            _ => prop_assert!(false, "runs disagreed"),
        }
    }

    #[test]
    fn every_eligible_participant_has_one_group(votes in arb_votes()) {
        let snapshot = build(&votes).snapshot();
        let Ok(analysis) = analyze(&snapshot, &EngineConfig::default()) else {
            return Ok(());
        };
        let clusters = &analysis.clusters;
        prop_assert!(clusters.k() <= clusters.eligible.max(1));

        let threshold = clusters.min_votes;
        for participant in snapshot.participants() {
            let eligible = snapshot.votes_cast(participant) >= threshold;
            prop_assert_eq!(clusters.group_of(participant).is_some(), eligible);
        }
        let members: usize = clusters.groups.iter().map(|g| g.members.len()).sum();
        prop_assert_eq!(members, clusters.assignments.len());
        for (i, group) in clusters.groups.iter().enumerate() {
            prop_assert_eq!(group.id.index(), i);
        }
    }

    #[test]
    fn no_verdict_below_minimum_sample(votes in arb_votes()) {
        let snapshot = build(&votes).snapshot();
        let config = EngineConfig::default();
        let Ok(analysis) = analyze(&snapshot, &config) else {
            return Ok(());
        };
        for stat in &analysis.repness.stats {
            prop_assert!(stat.group_size >= config.repness.min_group_votes);
        }
    }
}
