//! Enrichment controller
//!
//! Runs the effects decided by [`StudioState`] against the generation gateway
//! and merges the results back. The state lock is never held across a gateway
//! call, so different enrichment kinds proceed side by side.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use futures::future::join_all;
use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, ServiceError, ServiceResult};
use crate::gateway::GenerationGateway;
use crate::gateway::schemas::{validate_drafts, validate_scaffold};
use crate::state::{
    Command, Decision, Effect, EffectOutput, MergeOutcome, SkipReason, StudioState, StudioStatus,
    TaskKind, Ticket,
};
use crate::store::StoreObserver;
use crate::types::{CodeFile, Idea, IdeaExpansion, IdeaSummary, StoredIdea};

/// Result of an operation that may be declined without it being an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::Skipped(_) => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImagePassReport {
    pub requested: usize,
    pub loaded: usize,
    /// Backend answered without an image.
    pub missing: usize,
    pub failed: usize,
    pub discarded: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub ideas: usize,
    pub images: ImagePassReport,
}

/// Image slots claimed for a freshly installed collection, waiting to run.
#[derive(Debug, Default)]
pub struct PendingImagePass {
    jobs: Vec<(Ticket, Effect)>,
}

impl PendingImagePass {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn failure_message(task: TaskKind) -> &'static str {
    match task {
        TaskKind::Batch => "Failed to generate ideas. Please try again.",
        TaskKind::Image => "Failed to load images for the ideas.",
        TaskKind::Expansion => "Failed to expand the idea. Please try again.",
        TaskKind::CodeScaffold => "Failed to generate the code scaffold. Please try again.",
        TaskKind::AudioPitch => "Failed to generate or play the audio pitch.",
    }
}

/// Durable projection captured under the state lock and written after the
/// lock is released.
struct SaveJob {
    revision: u64,
    ideas: Option<Vec<StoredIdea>>,
}

impl SaveJob {
    fn capture(state: &StudioState) -> Self {
        Self {
            revision: state.store().revision(),
            ideas: state
                .store()
                .ideas()
                .map(|ideas| ideas.iter().map(StoredIdea::from).collect()),
        }
    }
}

fn task_failed(err: JoinError) -> ServiceError {
    GatewayError::Task(err.to_string()).into()
}

/// Cheap handle; clones share the same state, gateway and observers.
#[derive(Clone)]
pub struct IdeaStudio {
    state: Arc<Mutex<StudioState>>,
    gateway: Arc<dyn GenerationGateway>,
    observers: Vec<Arc<dyn StoreObserver>>,
    // highest revision handed to the observers
    saved_revision: Arc<StdMutex<u64>>,
}

impl IdeaStudio {
    pub fn new(gateway: Arc<dyn GenerationGateway>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StudioState::new())),
            gateway,
            observers: Vec::new(),
            saved_revision: Arc::new(StdMutex::new(0)),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StoreObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn gateway(&self) -> Arc<dyn GenerationGateway> {
        Arc::clone(&self.gateway)
    }

    pub async fn status(&self) -> StudioStatus {
        self.state.lock().await.status()
    }

    pub async fn idea(&self, index: usize) -> ServiceResult<Idea> {
        self.state
            .lock()
            .await
            .store()
            .get(index)
            .cloned()
            .ok_or(ServiceError::IdeaNotFound(index))
    }

    pub async fn ideas(&self) -> Option<Vec<Idea>> {
        self.state.lock().await.store().ideas().map(<[Idea]>::to_vec)
    }

    pub async fn summaries(&self, favorites_only: bool) -> Vec<IdeaSummary> {
        let state = self.state.lock().await;
        state
            .store()
            .filtered_view(move |idea| !favorites_only || idea.is_favorite())
            .map(|(index, idea)| IdeaSummary::from_idea(index, idea))
            .collect()
    }

    /// Records a user-facing error for failures that happen outside the
    /// controller, such as audio decoding.
    pub async fn report_error(&self, message: impl Into<String>) {
        self.state.lock().await.record_error(message);
    }

    /// Generates a fresh collection, installs it, then loads an image for
    /// every idea. Image failures never fail the batch.
    ///
    /// Once the batch slot is claimed the work runs on its own task, so a
    /// caller that stops waiting does not leave the slot held.
    pub async fn generate_ideas(&self, prompt: &str) -> ServiceResult<Outcome<BatchReport>> {
        let (ticket, effect) = match self.begin(Command::GenerateIdeas(prompt.to_string())).await {
            Ok(started) => started,
            Err(reason) => return Ok(Outcome::Skipped(reason)),
        };
        info!(%prompt, "generating ideas");

        let studio = self.clone();
        tokio::spawn(async move { studio.run_batch(ticket, effect).await })
            .await
            .map_err(task_failed)?
    }

    /// Installs ideas restored from durable storage and claims image slots
    /// for exactly those ideas. Run the returned pass with
    /// [`IdeaStudio::run_image_pass`].
    pub async fn restore(&self, ideas: Vec<Idea>) -> PendingImagePass {
        if ideas.is_empty() {
            return PendingImagePass::default();
        }
        let mut state = self.state.lock().await;
        info!(count = ideas.len(), "restoring saved ideas");
        state.restore(ideas);
        let job = SaveJob::capture(&state);
        let pass = PendingImagePass {
            jobs: state.begin_image_pass(),
        };
        drop(state);
        self.save(job).await;
        pass
    }

    pub async fn run_image_pass(&self, pass: PendingImagePass) -> ImagePassReport {
        let mut report = ImagePassReport {
            requested: pass.len(),
            ..ImagePassReport::default()
        };
        let results = join_all(
            pass.jobs
                .into_iter()
                .map(|(ticket, effect)| self.drive(ticket, effect)),
        )
        .await;
        for result in results {
            match result {
                Ok(Outcome::Done(idea)) if idea.image_url().is_some() => report.loaded += 1,
                Ok(Outcome::Done(_)) => report.missing += 1,
                Ok(Outcome::Skipped(_)) => report.discarded += 1,
                Err(_) => report.failed += 1,
            }
        }
        report
    }

    /// Loads the image for one idea if it has none yet.
    pub async fn generate_image(&self, index: usize) -> ServiceResult<Outcome<Option<String>>> {
        let outcome = self.enrich(Command::GenerateImage(index)).await?;
        Ok(match outcome {
            Outcome::Done(idea) => Outcome::Done(idea.image_url().map(str::to_string)),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
        })
    }

    pub async fn expand_idea(&self, index: usize) -> ServiceResult<Outcome<IdeaExpansion>> {
        let outcome = self.enrich(Command::Expand(index)).await?;
        Ok(field(outcome, |idea| idea.expansion().cloned()))
    }

    pub async fn generate_code_scaffold(&self, index: usize) -> ServiceResult<Outcome<Vec<CodeFile>>> {
        let outcome = self.enrich(Command::GenerateCodeScaffold(index)).await?;
        Ok(field(outcome, |idea| idea.code_scaffold().map(<[CodeFile]>::to_vec)))
    }

    pub async fn generate_audio_pitch(&self, index: usize) -> ServiceResult<Outcome<String>> {
        let outcome = self.enrich(Command::GenerateAudioPitch(index)).await?;
        Ok(field(outcome, |idea| idea.audio_pitch_base64().map(str::to_string)))
    }

    /// Cached pitch if present, otherwise generates one.
    pub async fn audio_pitch(&self, index: usize) -> ServiceResult<Outcome<String>> {
        {
            let state = self.state.lock().await;
            match state.store().get(index) {
                None => return Ok(Outcome::Skipped(SkipReason::NoSuchIdea { index })),
                Some(idea) => {
                    if let Some(payload) = idea.audio_pitch_base64() {
                        return Ok(Outcome::Done(payload.to_string()));
                    }
                }
            }
        }
        self.generate_audio_pitch(index).await
    }

    pub async fn toggle_favorite(&self, index: usize) -> ServiceResult<Outcome<bool>> {
        let mut state = self.state.lock().await;
        match state.begin(Command::ToggleFavorite(index)) {
            Decision::Applied => {
                let now = state
                    .store()
                    .get(index)
                    .map(Idea::is_favorite)
                    .ok_or(ServiceError::IdeaNotFound(index))?;
                let job = SaveJob::capture(&state);
                drop(state);
                self.save(job).await;
                Ok(Outcome::Done(now))
            }
            Decision::Skipped(reason) => Ok(Outcome::Skipped(reason)),
            Decision::Start(..) => Err(ServiceError::FromString(
                "toggling a favorite never starts an effect".to_string(),
            )),
        }
    }

    /// Removes every idea; the durable record goes with them.
    pub async fn clear_all(&self) {
        let mut state = self.state.lock().await;
        if let Decision::Applied = state.begin(Command::ClearAll) {
            info!("cleared all ideas");
            let job = SaveJob::capture(&state);
            drop(state);
            self.save(job).await;
        }
    }

    async fn begin(&self, command: Command) -> Result<(Ticket, Effect), SkipReason> {
        let mut state = self.state.lock().await;
        match state.begin(command) {
            Decision::Start(ticket, effect) => Ok((ticket, effect)),
            Decision::Skipped(reason) => {
                debug!(?reason, "request skipped");
                Err(reason)
            }
            Decision::Applied => Err(SkipReason::Superseded {
                detail: "command applied without an effect".to_string(),
            }),
        }
    }

    async fn enrich(&self, command: Command) -> ServiceResult<Outcome<Idea>> {
        match self.begin(command).await {
            Ok((ticket, effect)) => self.drive(ticket, effect).await,
            Err(reason) => Ok(Outcome::Skipped(reason)),
        }
    }

    async fn run_batch(&self, ticket: Ticket, effect: Effect) -> ServiceResult<Outcome<BatchReport>> {
        let result = self.perform(effect).await;
        let mut state = self.state.lock().await;
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                error!(error = %err, "idea generation failed");
                state.record_error(failure_message(TaskKind::Batch));
                state.finish(ticket);
                return Err(err.into());
            }
        };
        let count = match state.complete(ticket, output) {
            MergeOutcome::Replaced { count } => count,
            other => {
                state.finish(ticket);
                return Err(ServiceError::FromString(format!(
                    "unexpected batch merge: {other:?}"
                )));
            }
        };
        let job = SaveJob::capture(&state);
        let pass = PendingImagePass {
            jobs: state.begin_image_pass(),
        };
        drop(state);
        self.save(job).await;

        let images = self.run_image_pass(pass).await;
        self.state.lock().await.finish(ticket);
        info!(ideas = count, loaded = images.loaded, failed = images.failed, "idea batch ready");
        Ok(Outcome::Done(BatchReport {
            ideas: count,
            images,
        }))
    }

    /// Runs one claimed effect to completion on its own task, so the slot is
    /// released even when the caller stops waiting.
    async fn drive(&self, ticket: Ticket, effect: Effect) -> ServiceResult<Outcome<Idea>> {
        let studio = self.clone();
        tokio::spawn(async move { studio.settle(ticket, effect).await })
            .await
            .map_err(task_failed)?
    }

    /// Gateway call, merge, release.
    async fn settle(&self, ticket: Ticket, effect: Effect) -> ServiceResult<Outcome<Idea>> {
        let task = ticket.slot.task();
        let index = ticket.slot.index();
        debug!(?task, ?index, "enrichment started");

        let result = self.perform(effect).await;

        let mut state = self.state.lock().await;
        let mut job = None;
        let outcome = match result {
            Ok(output) => match state.complete(ticket, output) {
                MergeOutcome::Merged | MergeOutcome::Empty => {
                    job = Some(SaveJob::capture(&state));
                    index
                        .and_then(|i| state.store().get(i).cloned())
                        .map(Outcome::Done)
                        .ok_or_else(|| ServiceError::FromString("merged idea vanished".to_string()))
                }
                MergeOutcome::Discarded(conflict) => {
                    warn!(?task, ?index, %conflict, "discarding late enrichment result");
                    Ok(Outcome::Skipped(conflict.into()))
                }
                MergeOutcome::Replaced { .. } | MergeOutcome::Mismatched => Err(
                    ServiceError::FromString(format!("unexpected merge for {task:?}")),
                ),
            },
            Err(err) => {
                if task == TaskKind::Image {
                    warn!(?index, error = %err, "image generation failed");
                } else {
                    error!(?task, ?index, error = %err, "enrichment failed");
                    state.record_error(failure_message(task));
                }
                Err(err.into())
            }
        };
        state.finish(ticket);
        drop(state);

        if let Some(job) = job {
            self.save(job).await;
        }
        outcome
    }

    async fn perform(&self, effect: Effect) -> Result<EffectOutput, GatewayError> {
        let gateway = &self.gateway;
        match effect {
            Effect::GenerateIdeas { prompt } => {
                let drafts = gateway.generate_ideas(&prompt).await?;
                validate_drafts(&drafts)?;
                Ok(EffectOutput::Ideas(drafts))
            }
            Effect::GenerateImage { image_prompt } => {
                Ok(EffectOutput::Image(gateway.generate_image(&image_prompt).await?))
            }
            Effect::ExpandIdea(idea) => Ok(EffectOutput::Expansion(gateway.expand_idea(&idea).await?)),
            Effect::GenerateCodeScaffold(idea) => {
                let files = gateway.generate_code_scaffold(&idea).await?;
                validate_scaffold(&files)?;
                Ok(EffectOutput::CodeScaffold(files))
            }
            Effect::GenerateAudioPitch(idea) => match gateway.generate_audio_pitch(&idea).await? {
                Some(payload) if !payload.is_empty() => Ok(EffectOutput::AudioPitch(Some(payload))),
                _ => Err(GatewayError::Empty("audio")),
            },
        }
    }

    /// Hands a captured projection to the observers on the blocking pool.
    /// Writes are serialized and a snapshot older than one already written
    /// is dropped, so the durable record always ends at the newest revision.
    async fn save(&self, job: SaveJob) {
        if self.observers.is_empty() {
            return;
        }
        let observers = self.observers.clone();
        let saved_revision = Arc::clone(&self.saved_revision);
        let revision = job.revision;

        let written = tokio::task::spawn_blocking(move || {
            let mut saved = saved_revision.lock().unwrap_or_else(PoisonError::into_inner);
            if job.revision < *saved {
                debug!(revision = job.revision, saved = *saved, "skipping stale snapshot");
                return Vec::new();
            }
            let failures: Vec<String> = observers
                .iter()
                .filter_map(|observer| observer.ideas_changed(job.ideas.as_deref()).err())
                .map(|err| err.to_string())
                .collect();
            *saved = job.revision;
            failures
        })
        .await;

        let failures = match written {
            Ok(failures) => failures,
            Err(err) => vec![err.to_string()],
        };
        if failures.is_empty() {
            return;
        }
        for failure in &failures {
            error!(revision, error = %failure, "failed to save ideas");
        }
        self.state
            .lock()
            .await
            .record_error("Failed to save ideas. Storage may be full.");
    }
}

fn field<T>(outcome: Outcome<Idea>, get: impl FnOnce(&Idea) -> Option<T>) -> Outcome<T> {
    match outcome {
        Outcome::Done(idea) => match get(&idea) {
            Some(value) => Outcome::Done(value),
            None => Outcome::Skipped(SkipReason::Superseded {
                detail: "no value was produced".to_string(),
            }),
        },
        Outcome::Skipped(reason) => Outcome::Skipped(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::persistence::{IDEAS_STORAGE_KEY, PersistenceAdapter};
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::testing::{ScriptedGateway, drafts};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread::{self, ThreadId};
    use std::time::Duration;
    use tokio::time::timeout;

    fn studio(gateway: ScriptedGateway) -> (Arc<ScriptedGateway>, IdeaStudio) {
        let gateway = Arc::new(gateway);
        let studio = IdeaStudio::new(gateway.clone());
        (gateway, studio)
    }

    async fn wait_until<F>(studio: &IdeaStudio, check: F)
    where
        F: Fn(&StudioStatus) -> bool,
    {
        for _ in 0..1_000 {
            if check(&studio.status().await) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never reached");
    }

    #[tokio::test]
    async fn bakery_batch_survives_one_failing_image() {
        let batch = drafts(4);
        let gateway = ScriptedGateway::new(batch.clone()).fail_image_for(&batch[2].image_prompt);
        let (_, studio) = studio(gateway);

        let report = studio.generate_ideas("bakery").await.unwrap().done().unwrap();
        assert_eq!(report.ideas, 4);
        assert_eq!(report.images.loaded, 3);
        assert_eq!(report.images.failed, 1);

        let ideas = studio.ideas().await.unwrap();
        assert_eq!(ideas.len(), 4);
        for (idea, draft) in ideas.iter().zip(&batch) {
            assert_eq!(idea.founding(), draft);
        }
        assert!(ideas[2].image_url().is_none());
        assert!(ideas[0].image_url().unwrap().starts_with("data:image/png;base64,"));

        let status = studio.status().await;
        assert!(!status.in_flight.generating_ideas);
        assert!(status.in_flight.loading_images.is_empty());
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn blank_prompt_makes_no_call() {
        let (gateway, studio) = studio(ScriptedGateway::new(drafts(2)));
        let outcome = studio.generate_ideas("  ").await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::EmptyPrompt));
        assert_eq!(gateway.calls("ideas"), 0);
        assert!(studio.ideas().await.is_none());
    }

    #[tokio::test]
    async fn malformed_batch_keeps_previous_collection() {
        let (gateway, studio) = studio(ScriptedGateway::new(drafts(2)));
        studio.generate_ideas("first").await.unwrap();
        let before = studio.ideas().await.unwrap();

        let mut broken = drafts(1);
        broken[0].monetization = String::new();
        gateway.set_ideas(broken);

        let err = studio.generate_ideas("second").await.unwrap_err();
        assert!(matches!(err, ServiceError::Gateway(GatewayError::Malformed(_))));
        assert_eq!(studio.ideas().await.unwrap(), before);

        let status = studio.status().await;
        assert!(!status.in_flight.generating_ideas);
        assert_eq!(
            status.last_error.as_deref(),
            Some("Failed to generate ideas. Please try again.")
        );
    }

    #[tokio::test]
    async fn expanding_twice_calls_gateway_once() {
        let (gateway, studio) = studio(ScriptedGateway::new(drafts(2)));
        studio.generate_ideas("bakery").await.unwrap();

        let first = studio.expand_idea(1).await.unwrap().done().unwrap();
        let second = studio.expand_idea(1).await.unwrap();
        assert_eq!(
            second,
            Outcome::Skipped(SkipReason::AlreadyPresent {
                kind: crate::types::EnrichmentKind::Expansion
            })
        );
        assert_eq!(gateway.calls("expand"), 1);
        assert_eq!(studio.idea(1).await.unwrap().expansion(), Some(&first));
    }

    #[tokio::test]
    async fn scaffold_before_expansion_makes_no_call() {
        let (gateway, studio) = studio(ScriptedGateway::new(drafts(1)));
        studio.generate_ideas("bakery").await.unwrap();

        let outcome = studio.generate_code_scaffold(0).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::MissingExpansion));
        assert_eq!(gateway.calls("scaffold"), 0);

        studio.expand_idea(0).await.unwrap();
        let files = studio.generate_code_scaffold(0).await.unwrap().done().unwrap();
        assert_eq!(files[0].file_name, "main.py");
        assert_eq!(gateway.calls("scaffold"), 1);
    }

    #[tokio::test]
    async fn second_expansion_is_rejected_while_first_is_pending() {
        let gateway = ScriptedGateway::new(drafts(2));
        let gate = gateway.gate();
        let (gateway, studio) = studio(gateway);
        let studio = Arc::new(studio);

        gate.add_permits(1);
        studio.generate_ideas("bakery").await.unwrap();

        let pending = {
            let studio = Arc::clone(&studio);
            tokio::spawn(async move { studio.expand_idea(0).await })
        };
        wait_until(&studio, |s| s.in_flight.expanding == Some(0)).await;

        let rejected = studio.expand_idea(1).await.unwrap();
        assert_eq!(
            rejected,
            Outcome::Skipped(SkipReason::InFlight {
                task: TaskKind::Expansion
            })
        );
        // a different kind is not blocked by the expansion
        assert!(studio.generate_audio_pitch(1).await.unwrap().done().is_some());

        gate.add_permits(1);
        assert!(pending.await.unwrap().unwrap().done().is_some());
        assert_eq!(gateway.calls("expand"), 1);
        assert_eq!(studio.status().await.in_flight.expanding, None);
    }

    #[tokio::test]
    async fn second_batch_is_rejected_while_first_runs() {
        let gateway = ScriptedGateway::new(drafts(1));
        let gate = gateway.gate();
        let (gateway, studio) = studio(gateway);
        let studio = Arc::new(studio);

        let pending = {
            let studio = Arc::clone(&studio);
            tokio::spawn(async move { studio.generate_ideas("bakery").await })
        };
        wait_until(&studio, |s| s.in_flight.generating_ideas).await;

        let rejected = studio.generate_ideas("florist").await.unwrap();
        assert_eq!(
            rejected,
            Outcome::Skipped(SkipReason::InFlight {
                task: TaskKind::Batch
            })
        );

        gate.add_permits(1);
        assert!(pending.await.unwrap().unwrap().done().is_some());
        assert_eq!(gateway.calls("ideas"), 1);
    }

    #[tokio::test]
    async fn failed_expansion_reports_and_allows_retry() {
        let (gateway, studio) = studio(ScriptedGateway::new(drafts(1)));
        studio.generate_ideas("bakery").await.unwrap();

        gateway.fail_expansions(true);
        assert!(studio.expand_idea(0).await.is_err());
        let status = studio.status().await;
        assert_eq!(status.in_flight.expanding, None);
        assert_eq!(
            status.last_error.as_deref(),
            Some("Failed to expand the idea. Please try again.")
        );
        assert!(studio.idea(0).await.unwrap().expansion().is_none());

        gateway.fail_expansions(false);
        assert!(studio.expand_idea(0).await.unwrap().done().is_some());
        assert!(studio.status().await.last_error.is_none());
    }

    #[tokio::test]
    async fn founding_fields_survive_every_enrichment() {
        let (_, studio) = studio(ScriptedGateway::new(drafts(1)));
        studio.generate_ideas("bakery").await.unwrap();
        let before = studio.idea(0).await.unwrap().founding().clone();

        studio.expand_idea(0).await.unwrap();
        studio.generate_code_scaffold(0).await.unwrap();
        studio.generate_audio_pitch(0).await.unwrap();
        studio.toggle_favorite(0).await.unwrap();

        let after = studio.idea(0).await.unwrap();
        assert_eq!(after.founding(), &before);
        assert!(after.expansion().is_some());
        assert!(after.code_scaffold().is_some());
        assert!(after.audio_pitch_base64().is_some());
    }

    #[tokio::test]
    async fn toggling_favorite_twice_is_identity() {
        let (_, studio) = studio(ScriptedGateway::new(drafts(2)));
        studio.generate_ideas("bakery").await.unwrap();
        let before = studio.idea(1).await.unwrap();

        assert_eq!(studio.toggle_favorite(1).await.unwrap(), Outcome::Done(true));
        assert_eq!(studio.summaries(true).await.len(), 1);
        assert_eq!(studio.toggle_favorite(1).await.unwrap(), Outcome::Done(false));
        assert_eq!(studio.idea(1).await.unwrap(), before);
        assert!(studio.summaries(true).await.is_empty());
    }

    #[tokio::test]
    async fn audio_pitch_is_cached_after_first_request() {
        let (gateway, studio) = studio(ScriptedGateway::new(drafts(1)));
        studio.generate_ideas("bakery").await.unwrap();

        let first = studio.audio_pitch(0).await.unwrap().done().unwrap();
        let second = studio.audio_pitch(0).await.unwrap().done().unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.calls("audio"), 1);
    }

    #[tokio::test]
    async fn every_change_is_persisted_and_clear_removes_record() {
        let storage = Arc::new(MemoryStore::new());
        let (_, studio) = studio(ScriptedGateway::new(drafts(3)));
        let studio = studio.with_observer(Arc::new(PersistenceAdapter::new(storage.clone())));

        // clearing before anything exists still leaves no record
        studio.clear_all().await;
        assert!(storage.get(IDEAS_STORAGE_KEY).unwrap().is_none());

        studio.generate_ideas("bakery").await.unwrap();
        studio.toggle_favorite(0).await.unwrap();
        let saved = storage.get(IDEAS_STORAGE_KEY).unwrap().unwrap();
        assert!(saved.contains("\"isFavorite\":true"));
        assert!(!saved.contains("imageUrl"));

        studio.clear_all().await;
        assert!(storage.get(IDEAS_STORAGE_KEY).unwrap().is_none());
        assert_eq!(studio.ideas().await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn restored_session_keeps_favorites_and_reloads_images() {
        let storage = Arc::new(MemoryStore::new());
        let adapter = Arc::new(PersistenceAdapter::new(storage.clone()));
        {
            let (_, first) = studio(ScriptedGateway::new(drafts(2)));
            let first = first.with_observer(adapter.clone());
            first.generate_ideas("bakery").await.unwrap();
            first.expand_idea(0).await.unwrap();
            first.toggle_favorite(1).await.unwrap();
        }

        let (gateway, second) = studio(ScriptedGateway::new(Vec::new()));
        let second = second.with_observer(adapter.clone());
        let pass = second.restore(adapter.load()).await;
        assert_eq!(pass.len(), 2);

        let ideas = second.ideas().await.unwrap();
        assert_eq!(ideas.len(), 2);
        assert!(!ideas[0].is_favorite());
        assert!(ideas[1].is_favorite());
        assert!(ideas.iter().all(|idea| {
            idea.image_url().is_none()
                && idea.expansion().is_none()
                && idea.code_scaffold().is_none()
                && idea.audio_pitch_base64().is_none()
        }));

        let report = second.run_image_pass(pass).await;
        assert_eq!(report.loaded, 2);
        assert_eq!(gateway.calls("ideas"), 0);
        assert!(second.idea(0).await.unwrap().image_url().is_some());
    }

    struct FullStore;

    impl KeyValueStore for FullStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn storage_failure_is_reported_but_memory_stays_authoritative() {
        let (_, studio) = studio(ScriptedGateway::new(drafts(2)));
        let studio = studio.with_observer(Arc::new(PersistenceAdapter::new(Arc::new(FullStore))));

        let outcome = studio.generate_ideas("bakery").await.unwrap();
        assert!(outcome.done().is_some());
        assert_eq!(studio.ideas().await.unwrap().len(), 2);
        assert_eq!(
            studio.status().await.last_error.as_deref(),
            Some("Failed to save ideas. Storage may be full.")
        );
    }

    #[tokio::test]
    async fn abandoned_expansion_still_settles() {
        let gateway = ScriptedGateway::new(drafts(2));
        let gate = gateway.gate();
        let (gateway, studio) = studio(gateway);
        gate.add_permits(1);
        studio.generate_ideas("bakery").await.unwrap();

        let abandoned = timeout(Duration::from_millis(20), studio.expand_idea(0)).await;
        assert!(abandoned.is_err());
        assert_eq!(studio.status().await.in_flight.expanding, Some(0));

        gate.add_permits(1);
        wait_until(&studio, |s| s.in_flight.expanding.is_none()).await;
        assert!(studio.idea(0).await.unwrap().expansion().is_some());
        assert_eq!(
            studio.expand_idea(0).await.unwrap(),
            Outcome::Skipped(SkipReason::AlreadyPresent {
                kind: crate::types::EnrichmentKind::Expansion
            })
        );

        gate.add_permits(1);
        assert!(studio.expand_idea(1).await.unwrap().done().is_some());
        assert_eq!(gateway.calls("expand"), 2);
    }

    #[tokio::test]
    async fn abandoned_batch_releases_its_slot() {
        let gateway = ScriptedGateway::new(drafts(3));
        let gate = gateway.gate();
        let (gateway, studio) = studio(gateway);

        let abandoned = timeout(Duration::from_millis(20), studio.generate_ideas("bakery")).await;
        assert!(abandoned.is_err());
        assert!(studio.status().await.in_flight.generating_ideas);

        gate.add_permits(1);
        wait_until(&studio, |s| !s.in_flight.generating_ideas).await;
        let ideas = studio.ideas().await.unwrap();
        assert_eq!(ideas.len(), 3);
        assert!(ideas.iter().all(|idea| idea.image_url().is_some()));

        gate.add_permits(1);
        assert!(studio.generate_ideas("florist").await.unwrap().done().is_some());
        assert_eq!(gateway.calls("ideas"), 2);
    }

    struct HeldObserver {
        hold: AtomicBool,
        release: StdMutex<mpsc::Receiver<()>>,
        threads: StdMutex<Vec<ThreadId>>,
        favorites: StdMutex<Vec<usize>>,
    }

    impl StoreObserver for HeldObserver {
        fn ideas_changed(&self, ideas: Option<&[StoredIdea]>) -> ServiceResult<()> {
            self.threads.lock().unwrap().push(thread::current().id());
            if self.hold.load(Ordering::SeqCst) {
                let _ = self.release.lock().unwrap().recv();
            }
            let favorites = ideas.map_or(0, |ideas| ideas.iter().filter(|i| i.is_favorite).count());
            self.favorites.lock().unwrap().push(favorites);
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_writes_stay_off_the_runtime_and_the_lock() {
        let (release, held) = mpsc::channel();
        let observer = Arc::new(HeldObserver {
            hold: AtomicBool::new(false),
            release: StdMutex::new(held),
            threads: StdMutex::new(Vec::new()),
            favorites: StdMutex::new(Vec::new()),
        });
        let (_, studio) = studio(ScriptedGateway::new(drafts(2)));
        let studio = Arc::new(studio.with_observer(observer.clone()));

        studio.generate_ideas("bakery").await.unwrap();
        let written = observer.threads.lock().unwrap().len();
        assert!(written >= 1);

        observer.hold.store(true, Ordering::SeqCst);
        let toggle = {
            let studio = Arc::clone(&studio);
            tokio::spawn(async move { studio.toggle_favorite(0).await })
        };
        for _ in 0..1_000 {
            if observer.threads.lock().unwrap().len() > written {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(observer.threads.lock().unwrap().len(), written + 1);

        // the write is parked, yet the studio still answers
        assert!(studio.idea(0).await.unwrap().is_favorite());
        assert!(studio.status().await.last_error.is_none());

        release.send(()).unwrap();
        assert_eq!(toggle.await.unwrap().unwrap(), Outcome::Done(true));

        let runtime_thread = thread::current().id();
        assert!(observer.threads.lock().unwrap().iter().all(|id| *id != runtime_thread));
        assert_eq!(observer.favorites.lock().unwrap().last(), Some(&1));
    }
}
