//! Enrichment state machine.
//!
//! `StudioState::begin` turns a command into a decision synchronously: start
//! an effect (after claiming its in-flight slot), apply it right away, or skip
//! it. Effect results come back through `complete`, and `finish` releases the
//! slot whatever the outcome was. Nothing here awaits; the controller owns the
//! async side.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::Serialize;

use crate::store::{Conflict, IdeaStore};
use crate::types::{CodeFile, EnrichmentKind, Idea, IdeaDraft, IdeaExpansion, IdeaPatch};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Batch,
    Image,
    Expansion,
    CodeScaffold,
    AudioPitch,
}

impl From<EnrichmentKind> for TaskKind {
    fn from(kind: EnrichmentKind) -> Self {
        match kind {
            EnrichmentKind::Image => TaskKind::Image,
            EnrichmentKind::Expansion => TaskKind::Expansion,
            EnrichmentKind::CodeScaffold => TaskKind::CodeScaffold,
            EnrichmentKind::AudioPitch => TaskKind::AudioPitch,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Batch,
    Image(usize),
    Expansion(usize),
    CodeScaffold(usize),
    AudioPitch(usize),
}

impl Slot {
    pub fn task(&self) -> TaskKind {
        match self {
            Slot::Batch => TaskKind::Batch,
            Slot::Image(_) => TaskKind::Image,
            Slot::Expansion(_) => TaskKind::Expansion,
            Slot::CodeScaffold(_) => TaskKind::CodeScaffold,
            Slot::AudioPitch(_) => TaskKind::AudioPitch,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match *self {
            Slot::Batch => None,
            Slot::Image(i) | Slot::Expansion(i) | Slot::CodeScaffold(i) | Slot::AudioPitch(i) => {
                Some(i)
            }
        }
    }
}

/// Proof that a slot was claimed against a given collection epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket {
    pub slot: Slot,
    pub epoch: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    GenerateIdeas(String),
    GenerateImage(usize),
    Expand(usize),
    GenerateCodeScaffold(usize),
    GenerateAudioPitch(usize),
    ToggleFavorite(usize),
    ClearAll,
}

/// Work the executor has to hand to the gateway. Ideas are snapshots taken
/// when the slot was claimed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    GenerateIdeas { prompt: String },
    GenerateImage { image_prompt: String },
    ExpandIdea(Idea),
    GenerateCodeScaffold(Idea),
    GenerateAudioPitch(Idea),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Start(Ticket, Effect),
    Applied,
    Skipped(SkipReason),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SkipReason {
    EmptyPrompt,
    NoSuchIdea { index: usize },
    AlreadyPresent { kind: EnrichmentKind },
    InFlight { task: TaskKind },
    MissingExpansion,
    Superseded { detail: String },
}

impl From<Conflict> for SkipReason {
    fn from(conflict: Conflict) -> Self {
        match conflict {
            Conflict::OutOfBounds { index, .. } => SkipReason::NoSuchIdea { index },
            Conflict::AlreadyPresent { kind, .. } => SkipReason::AlreadyPresent { kind },
            Conflict::MissingExpansion { .. } => SkipReason::MissingExpansion,
            stale @ Conflict::StaleEpoch { .. } => SkipReason::Superseded {
                detail: stale.to_string(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EffectOutput {
    Ideas(Vec<IdeaDraft>),
    Image(Option<String>),
    Expansion(IdeaExpansion),
    CodeScaffold(Vec<CodeFile>),
    AudioPitch(Option<String>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Replaced { count: usize },
    Merged,
    /// The backend answered without a value; the field stays absent.
    Empty,
    Discarded(Conflict),
    /// Output did not belong to the ticket's slot.
    Mismatched,
}

#[derive(Debug, Default)]
struct InFlightTable {
    batch: bool,
    expansion: Option<Ticket>,
    code_scaffold: Option<Ticket>,
    audio_pitch: Option<Ticket>,
    // indices within the current epoch
    images: BTreeSet<usize>,
}

impl InFlightTable {
    fn reset_ideas(&mut self) {
        self.expansion = None;
        self.code_scaffold = None;
        self.audio_pitch = None;
        self.images.clear();
    }

    fn serial_slot(&mut self, task: TaskKind) -> Option<&mut Option<Ticket>> {
        match task {
            TaskKind::Expansion => Some(&mut self.expansion),
            TaskKind::CodeScaffold => Some(&mut self.code_scaffold),
            TaskKind::AudioPitch => Some(&mut self.audio_pitch),
            TaskKind::Batch | TaskKind::Image => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InFlightStatus {
    pub generating_ideas: bool,
    pub expanding: Option<usize>,
    pub generating_code: Option<usize>,
    pub generating_audio: Option<usize>,
    pub loading_images: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudioStatus {
    pub loaded: bool,
    pub idea_count: usize,
    pub favorite_count: usize,
    pub in_flight: InFlightStatus,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct StudioState {
    store: IdeaStore,
    in_flight: InFlightTable,
    last_error: Option<String>,
}

impl StudioState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &IdeaStore {
        &self.store
    }

    pub fn begin(&mut self, command: Command) -> Decision {
        match command {
            Command::GenerateIdeas(prompt) => {
                let prompt = prompt.trim();
                if prompt.is_empty() {
                    return Decision::Skipped(SkipReason::EmptyPrompt);
                }
                if self.in_flight.batch {
                    return Decision::Skipped(SkipReason::InFlight {
                        task: TaskKind::Batch,
                    });
                }
                self.in_flight.batch = true;
                self.last_error = None;
                Decision::Start(
                    self.ticket(Slot::Batch),
                    Effect::GenerateIdeas {
                        prompt: prompt.to_string(),
                    },
                )
            }
            Command::GenerateImage(index) => {
                let idea = match self.eligible(index, EnrichmentKind::Image) {
                    Ok(idea) => idea,
                    Err(reason) => return Decision::Skipped(reason),
                };
                if !self.in_flight.images.insert(index) {
                    return Decision::Skipped(SkipReason::InFlight {
                        task: TaskKind::Image,
                    });
                }
                Decision::Start(
                    self.ticket(Slot::Image(index)),
                    Effect::GenerateImage {
                        image_prompt: idea.founding().image_prompt.clone(),
                    },
                )
            }
            Command::Expand(index) => self.begin_serial(
                index,
                EnrichmentKind::Expansion,
                Slot::Expansion(index),
                Effect::ExpandIdea,
            ),
            Command::GenerateCodeScaffold(index) => {
                match self.store.get(index) {
                    Some(idea) if idea.expansion().is_none() && !idea.has(EnrichmentKind::CodeScaffold) => {
                        return Decision::Skipped(SkipReason::MissingExpansion);
                    }
                    _ => {}
                }
                self.begin_serial(
                    index,
                    EnrichmentKind::CodeScaffold,
                    Slot::CodeScaffold(index),
                    Effect::GenerateCodeScaffold,
                )
            }
            Command::GenerateAudioPitch(index) => self.begin_serial(
                index,
                EnrichmentKind::AudioPitch,
                Slot::AudioPitch(index),
                Effect::GenerateAudioPitch,
            ),
            Command::ToggleFavorite(index) => match self.store.toggle_favorite(index) {
                Ok(_) => Decision::Applied,
                Err(conflict) => Decision::Skipped(conflict.into()),
            },
            Command::ClearAll => {
                self.store.clear();
                self.in_flight.reset_ideas();
                Decision::Applied
            }
        }
    }

    /// Claims image slots for every idea that still lacks one. Used right
    /// after a collection is installed, so all tickets share its epoch.
    pub fn begin_image_pass(&mut self) -> Vec<(Ticket, Effect)> {
        (0..self.store.len())
            .filter_map(|index| match self.begin(Command::GenerateImage(index)) {
                Decision::Start(ticket, effect) => Some((ticket, effect)),
                _ => None,
            })
            .collect()
    }

    /// Installs a collection restored from durable storage.
    pub fn restore(&mut self, ideas: Vec<Idea>) {
        self.install(ideas);
    }

    pub fn complete(&mut self, ticket: Ticket, output: EffectOutput) -> MergeOutcome {
        match (ticket.slot, output) {
            (Slot::Batch, EffectOutput::Ideas(drafts)) => {
                let count = drafts.len();
                self.install(drafts.into_iter().map(Idea::new).collect());
                MergeOutcome::Replaced { count }
            }
            (Slot::Image(_), EffectOutput::Image(None))
            | (Slot::AudioPitch(_), EffectOutput::AudioPitch(None)) => MergeOutcome::Empty,
            (Slot::Image(index), EffectOutput::Image(Some(url))) => {
                self.merge(ticket, index, IdeaPatch::Image(url))
            }
            (Slot::Expansion(index), EffectOutput::Expansion(expansion)) => {
                self.merge(ticket, index, IdeaPatch::Expansion(expansion))
            }
            (Slot::CodeScaffold(index), EffectOutput::CodeScaffold(files)) => {
                self.merge(ticket, index, IdeaPatch::CodeScaffold(files))
            }
            (Slot::AudioPitch(index), EffectOutput::AudioPitch(Some(payload))) => {
                self.merge(ticket, index, IdeaPatch::AudioPitch(payload))
            }
            _ => MergeOutcome::Mismatched,
        }
    }

    /// Releases the ticket's slot. A ticket from a replaced collection never
    /// releases a slot claimed for the current one.
    pub fn finish(&mut self, ticket: Ticket) {
        match ticket.slot {
            Slot::Batch => self.in_flight.batch = false,
            Slot::Image(index) => {
                if ticket.epoch == self.store.epoch() {
                    self.in_flight.images.remove(&index);
                }
            }
            slot => {
                if let Some(held) = self.in_flight.serial_slot(slot.task()) {
                    if *held == Some(ticket) {
                        *held = None;
                    }
                }
            }
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_in_flight(&self, slot: Slot) -> bool {
        match slot {
            Slot::Batch => self.in_flight.batch,
            Slot::Image(index) => self.in_flight.images.contains(&index),
            Slot::Expansion(index) => self.in_flight.expansion.map(|t| t.slot) == Some(Slot::Expansion(index)),
            Slot::CodeScaffold(index) => {
                self.in_flight.code_scaffold.map(|t| t.slot) == Some(Slot::CodeScaffold(index))
            }
            Slot::AudioPitch(index) => {
                self.in_flight.audio_pitch.map(|t| t.slot) == Some(Slot::AudioPitch(index))
            }
        }
    }

    pub fn status(&self) -> StudioStatus {
        let slot_index = |ticket: Option<Ticket>| ticket.and_then(|t| t.slot.index());
        StudioStatus {
            loaded: self.store.ideas().is_some(),
            idea_count: self.store.len(),
            favorite_count: self.store.favorites().count(),
            in_flight: InFlightStatus {
                generating_ideas: self.in_flight.batch,
                expanding: slot_index(self.in_flight.expansion),
                generating_code: slot_index(self.in_flight.code_scaffold),
                generating_audio: slot_index(self.in_flight.audio_pitch),
                loading_images: self.in_flight.images.iter().copied().collect(),
            },
            last_error: self.last_error.clone(),
        }
    }

    fn install(&mut self, ideas: Vec<Idea>) {
        self.store.replace_all(ideas);
        self.in_flight.reset_ideas();
    }

    fn ticket(&self, slot: Slot) -> Ticket {
        Ticket {
            slot,
            epoch: self.store.epoch(),
        }
    }

    fn eligible(&self, index: usize, kind: EnrichmentKind) -> Result<Idea, SkipReason> {
        let idea = self
            .store
            .get(index)
            .ok_or(SkipReason::NoSuchIdea { index })?;
        if idea.has(kind) {
            return Err(SkipReason::AlreadyPresent { kind });
        }
        Ok(idea.clone())
    }

    fn begin_serial(
        &mut self,
        index: usize,
        kind: EnrichmentKind,
        slot: Slot,
        effect: fn(Idea) -> Effect,
    ) -> Decision {
        let idea = match self.eligible(index, kind) {
            Ok(idea) => idea,
            Err(reason) => return Decision::Skipped(reason),
        };
        let ticket = self.ticket(slot);
        let Some(held) = self.in_flight.serial_slot(kind.into()) else {
            return Decision::Skipped(SkipReason::InFlight { task: kind.into() });
        };
        if held.is_some() {
            return Decision::Skipped(SkipReason::InFlight { task: kind.into() });
        }
        *held = Some(ticket);
        self.last_error = None;
        Decision::Start(ticket, effect(idea))
    }

    fn merge(&mut self, ticket: Ticket, index: usize, patch: IdeaPatch) -> MergeOutcome {
        match self.store.update_at(ticket.epoch, index, patch) {
            Ok(()) => MergeOutcome::Merged,
            Err(conflict) => MergeOutcome::Discarded(conflict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str) -> IdeaDraft {
        IdeaDraft {
            name: name.to_string(),
            description: format!("{name} helps bakeries"),
            target_audience: "bakers".to_string(),
            monetization: "per seat".to_string(),
            image_prompt: format!("{name} illustration"),
        }
    }

    fn expansion() -> IdeaExpansion {
        IdeaExpansion {
            mvp_features: vec!["orders".to_string()],
            tech_stack: vec!["Python".to_string()],
            potential_challenges: vec!["data".to_string()],
        }
    }

    fn loaded(names: &[&str]) -> StudioState {
        let mut state = StudioState::new();
        state.restore(names.iter().map(|n| Idea::new(draft(n))).collect());
        state
    }

    fn start(decision: Decision) -> (Ticket, Effect) {
        match decision {
            Decision::Start(ticket, effect) => (ticket, effect),
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn blank_prompt_is_skipped() {
        let mut state = StudioState::new();
        assert_eq!(
            state.begin(Command::GenerateIdeas("   ".to_string())),
            Decision::Skipped(SkipReason::EmptyPrompt)
        );
        assert!(!state.status().in_flight.generating_ideas);
    }

    #[test]
    fn second_batch_is_rejected_until_first_finishes() {
        let mut state = StudioState::new();
        let (ticket, effect) = start(state.begin(Command::GenerateIdeas(" bakery ".to_string())));
        assert_eq!(
            effect,
            Effect::GenerateIdeas {
                prompt: "bakery".to_string()
            }
        );
        assert_eq!(
            state.begin(Command::GenerateIdeas("florist".to_string())),
            Decision::Skipped(SkipReason::InFlight {
                task: TaskKind::Batch
            })
        );
        state.finish(ticket);
        assert!(matches!(
            state.begin(Command::GenerateIdeas("florist".to_string())),
            Decision::Start(..)
        ));
    }

    #[test]
    fn expansion_is_serialized_across_ideas() {
        let mut state = loaded(&["a", "b"]);
        let (ticket, _) = start(state.begin(Command::Expand(0)));
        assert_eq!(
            state.begin(Command::Expand(1)),
            Decision::Skipped(SkipReason::InFlight {
                task: TaskKind::Expansion
            })
        );
        // other kinds are independent
        assert!(matches!(state.begin(Command::GenerateAudioPitch(1)), Decision::Start(..)));

        assert_eq!(
            state.complete(ticket, EffectOutput::Expansion(expansion())),
            MergeOutcome::Merged
        );
        state.finish(ticket);
        assert_eq!(
            state.begin(Command::Expand(0)),
            Decision::Skipped(SkipReason::AlreadyPresent {
                kind: EnrichmentKind::Expansion
            })
        );
    }

    #[test]
    fn scaffold_before_expansion_is_skipped() {
        let mut state = loaded(&["a"]);
        assert_eq!(
            state.begin(Command::GenerateCodeScaffold(0)),
            Decision::Skipped(SkipReason::MissingExpansion)
        );
        assert_eq!(state.status().in_flight.generating_code, None);
    }

    #[test]
    fn replace_discards_late_results_and_keeps_new_slot() {
        let mut state = loaded(&["a"]);
        let (old, _) = start(state.begin(Command::Expand(0)));

        let (batch, _) = start(state.begin(Command::GenerateIdeas("bakery".to_string())));
        state.complete(batch, EffectOutput::Ideas(vec![draft("b")]));
        state.finish(batch);

        let (fresh, _) = start(state.begin(Command::Expand(0)));
        assert!(matches!(
            state.complete(old, EffectOutput::Expansion(expansion())),
            MergeOutcome::Discarded(Conflict::StaleEpoch { .. })
        ));
        state.finish(old);
        assert!(state.is_in_flight(fresh.slot));
        assert!(state.store().get(0).unwrap().expansion().is_none());
    }

    #[test]
    fn image_pass_claims_each_missing_image_once() {
        let mut state = loaded(&["a", "b", "c"]);
        let pass = state.begin_image_pass();
        assert_eq!(pass.len(), 3);
        assert!(state.begin_image_pass().is_empty());
        assert_eq!(state.status().in_flight.loading_images, vec![0, 1, 2]);

        let (ticket, _) = pass[1].clone();
        assert_eq!(state.complete(ticket, EffectOutput::Image(None)), MergeOutcome::Empty);
        state.finish(ticket);
        assert_eq!(state.status().in_flight.loading_images, vec![0, 2]);
        assert!(state.store().get(1).unwrap().image_url().is_none());
    }

    #[test]
    fn clear_all_empties_and_resets_slots() {
        let mut state = loaded(&["a"]);
        let (ticket, _) = start(state.begin(Command::GenerateAudioPitch(0)));
        assert_eq!(state.begin(Command::ClearAll), Decision::Applied);
        assert_eq!(state.store().ideas(), Some(&[][..]));
        assert_eq!(state.status().in_flight.generating_audio, None);
        assert!(matches!(
            state.complete(ticket, EffectOutput::AudioPitch(Some("AAAA".to_string()))),
            MergeOutcome::Discarded(_)
        ));
    }

    #[test]
    fn toggle_out_of_bounds_is_skipped() {
        let mut state = loaded(&["a"]);
        assert_eq!(
            state.begin(Command::ToggleFavorite(4)),
            Decision::Skipped(SkipReason::NoSuchIdea { index: 4 })
        );
    }
}
