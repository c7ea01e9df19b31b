//! Opinion-bloc scenarios.
//!
//! Participants `1..=participants` are split into `blocs` contiguous blocs
//! and statements `1..=statements` into as many contiguous slices. A bloc
//! agrees with its own slice and disagrees with every other one; the last
//! slice absorbs any remainder. With 15 statements and 2 blocs, bloc 0
//! agrees with 1–7 and bloc 1 with 8–15.

use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand_distr::{Bernoulli, Distribution};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tally_core::event::{Envelope, Event};
use tally_core::{ConversationId, ParticipantId, StatementId, Vote, VoteValue};

/// Parameters for one synthetic conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocScenario {
    pub conversation: ConversationId,
    pub participants: u64,
    pub statements: u64,
    pub blocs: u64,
    /// Chance (percent) that a vote flips to the opposite stance.
    pub noise_percent: u8,
    /// Chance (percent) that a participant votes on a given statement.
    pub participation_percent: u8,
    pub seed: u64,
    /// Timestamp of the first vote; later votes count up by one.
    pub start_timestamp: u64,
    /// Deliver votes in random order instead of participant order.
    pub shuffle: bool,
}

impl Default for BlocScenario {
    fn default() -> Self {
        Self {
            conversation: ConversationId::new("sim"),
            participants: 20,
            statements: 15,
            blocs: 2,
            noise_percent: 0,
            participation_percent: 100,
            seed: 0,
            start_timestamp: 1_700_000_000,
            shuffle: false,
        }
    }
}

impl BlocScenario {
    /// Validate parameters before generating.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.blocs == 0 {
            bail!("blocs must be > 0");
        }
        if self.participants < self.blocs {
            bail!("participants ({}) must be >= blocs ({})", self.participants, self.blocs);
        }
        if self.statements < self.blocs {
            bail!("statements ({}) must be >= blocs ({})", self.statements, self.blocs);
        }
        if self.noise_percent > 100 || self.participation_percent > 100 {
            bail!("percentages must be within 0..=100");
        }
        Ok(())
    }

    /// Bloc (0-based) of a participant id.
    #[must_use]
    pub fn bloc_of(&self, participant: ParticipantId) -> u64 {
        let per_bloc = (self.participants / self.blocs).max(1);
        (participant.0.saturating_sub(1) / per_bloc).min(self.blocs - 1)
    }

    /// Bloc (0-based) whose slice contains a statement id.
    #[must_use]
    pub fn slice_of(&self, statement: StatementId) -> u64 {
        let per_slice = (self.statements / self.blocs).max(1);
        (statement.0.saturating_sub(1) / per_slice).min(self.blocs - 1)
    }

    /// Noise-free vote of `bloc` on `statement`.
    #[must_use]
    pub fn stance(&self, bloc: u64, statement: StatementId) -> VoteValue {
        if self.slice_of(statement) == bloc {
            VoteValue::Agree
        } else {
            VoteValue::Disagree
        }
    }

    /// Generate the vote feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters fail [`Self::validate`].
    pub fn generate(&self) -> Result<Vec<Envelope>> {
        self.validate()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let noise = Bernoulli::new(f64::from(self.noise_percent) / 100.0)
            .context("invalid noise rate")?;
        let participation = Bernoulli::new(f64::from(self.participation_percent) / 100.0)
            .context("invalid participation rate")?;

        let mut votes = Vec::new();
        for p in 1..=self.participants {
            let participant = ParticipantId(p);
            let bloc = self.bloc_of(participant);
            for s in 1..=self.statements {
                if !participation.sample(&mut rng) {
                    continue;
                }
                let statement = StatementId(s);
                let mut value = self.stance(bloc, statement);
                if noise.sample(&mut rng) {
                    value = opposite(value);
                }
                votes.push((participant, statement, value));
            }
        }

        let mut events: Vec<Envelope> = (self.start_timestamp..)
            .zip(votes)
            .map(|(timestamp, (participant, statement, value))| {
                Envelope::new(
                    self.conversation.clone(),
                    Event::Vote(Vote::new(participant, statement, value, timestamp)),
                )
            })
            .collect();
        if self.shuffle {
            events.shuffle(&mut rng);
        }

        debug!(
            conversation = %self.conversation,
            events = events.len(),
            seed = self.seed,
            "generated bloc scenario"
        );
        Ok(events)
    }
}

const fn opposite(value: VoteValue) -> VoteValue {
    match value {
        VoteValue::Agree => VoteValue::Disagree,
        VoteValue::Disagree => VoteValue::Agree,
        VoteValue::Pass => VoteValue::Pass,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
