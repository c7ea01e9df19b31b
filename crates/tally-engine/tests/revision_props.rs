//! Property tests for published revisions: across any interleaving of votes
//! and on-demand runs, revisions strictly increase and never lose input.

use proptest::prelude::*;

use tally_core::config::EngineConfig;
use tally_core::error::ComputeError;
use tally_core::event::{Envelope, Event};
use tally_core::{ConversationId, ParticipantId, StatementId, Vote, VoteValue};
use tally_engine::{Engine, EngineError};

#[derive(Debug, Clone)]
enum Op {
    Vote(Vote),
    Compute,
}

fn arb_value() -> impl Strategy<Value = VoteValue> {
    prop_oneof![
        Just(VoteValue::Agree),
        Just(VoteValue::Disagree),
        Just(VoteValue::Pass),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u64..8, 0u64..6, arb_value(), 0u64..100)
            .prop_map(|(p, s, value, ts)| Op::Vote(Vote::new(ParticipantId(p), StatementId(s), value, ts))),
        1 => Just(Op::Compute),
    ]
}

fn manual_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.scheduler.workers = 1;
    config.scheduler.tick_ms = 5;
    config.scheduler.debounce_ms = 3_600_000;
    config.scheduler.min_new_votes = u64::MAX;
    config
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn revisions_are_monotonic(ops in prop::collection::vec(arb_op(), 1..120)) {
        let engine = Engine::start(manual_config()).unwrap();
        let id = ConversationId::new("p");
        let mut seen_vote = false;
        let mut last: Option<(u64, Option<u64>, usize)> = None;

        for op in ops {
            match op {
                Op::Vote(vote) => {
                    engine.apply(&Envelope::new(id.clone(), Event::Vote(vote))).unwrap();
                    seen_vote = true;
                }
                Op::Compute if !seen_vote => {}
                Op::Compute => match engine.compute_now(&id) {
                    Ok(state) => {
                        let cells = state.snapshot.cell_count();
                        if let Some((revision, timestamp, prev_cells)) = last {
                            prop_assert_eq!(state.revision, revision + 1);
                            prop_assert!(state.last_vote_timestamp >= timestamp);
                            prop_assert!(cells >= prev_cells);
                        } else {
                            prop_assert_eq!(state.revision, 1);
                        }
                        last = Some((state.revision, state.last_vote_timestamp, cells));
                    }
                    Err(EngineError::Compute(ComputeError::InsufficientData { .. })) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {}", other),
                },
            }
        }

        prop_assert_eq!(
            engine.get_latest_state(&id).revision(),
            last.map(|(revision, _, _)| revision)
        );
    }
}
