use crate::core::settings::StorySettings;
use crate::core::state::{Catalog, Character, Hook, Outline, Suggestion, WritingProgress};
use crate::services::backend::StoryBackend;
use crate::services::pool::CandidatePool;
use crate::services::requests;
use crate::services::stream::decode_stream;
use anyhow::{anyhow, bail, Context, Result};
use futures_util::StreamExt;
use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Suggesting,
    Suggested,
    GeneratingHooks,
    HooksReady,
    GeneratingOutline,
    OutlineReady,
    Writing,
    Complete,
}

impl Stage {
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Stage::Suggesting | Stage::GeneratingHooks | Stage::GeneratingOutline | Stage::Writing
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Idle => "idle",
            Stage::Suggesting => "suggesting",
            Stage::Suggested => "suggested",
            Stage::GeneratingHooks => "generating hooks",
            Stage::HooksReady => "hooks ready",
            Stage::GeneratingOutline => "generating outline",
            Stage::OutlineReady => "outline ready",
            Stage::Writing => "writing",
            Stage::Complete => "complete",
        };
        f.write_str(label)
    }
}

/// Actions from the wrong stage (including while a request is in flight) are
/// logged no-ops. A failed request restores the stage it started from.
pub struct WorkflowController {
    backend: Box<dyn StoryBackend>,
    stage: Stage,
    catalog: Catalog,
    pool: CandidatePool,
    suggestion: Option<Suggestion>,
    hook_batch: Option<Vec<Arc<Hook>>>,
    selected_hook: Option<Arc<Hook>>,
    outline: Option<Outline>,
    settings: StorySettings,
    progress: WritingProgress,
    story_path: Option<String>,
    last_error: Option<String>,
}

impl WorkflowController {
    pub async fn new(backend: Box<dyn StoryBackend>, settings: StorySettings) -> Result<Self> {
        let catalog = backend
            .load_catalog()
            .await
            .context("Failed to load character catalog")?;
        Ok(Self::with_catalog(backend, catalog, settings))
    }

    pub fn with_catalog(
        backend: Box<dyn StoryBackend>,
        catalog: Catalog,
        settings: StorySettings,
    ) -> Self {
        let pool = CandidatePool::from_catalog(&catalog);
        Self {
            backend,
            stage: Stage::Idle,
            catalog,
            pool,
            suggestion: None,
            hook_batch: None,
            selected_hook: None,
            outline: None,
            settings,
            progress: WritingProgress::default(),
            story_path: None,
            last_error: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn pool(&self) -> &CandidatePool {
        &self.pool
    }

    pub fn suggestion(&self) -> Option<&Suggestion> {
        self.suggestion.as_ref()
    }

    pub fn protagonist(&self) -> Option<&Character> {
        self.suggestion
            .as_ref()
            .and_then(|s| self.catalog.find(&s.suggested_name))
    }

    pub fn hook_batch(&self) -> Option<&[Arc<Hook>]> {
        self.hook_batch.as_deref()
    }

    pub fn selected_hook(&self) -> Option<&Arc<Hook>> {
        self.selected_hook.as_ref()
    }

    pub fn outline(&self) -> Option<&Outline> {
        self.outline.as_ref()
    }

    pub fn progress(&self) -> &WritingProgress {
        &self.progress
    }

    pub fn story_path(&self) -> Option<&str> {
        self.story_path.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn settings(&self) -> &StorySettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut StorySettings {
        &mut self.settings
    }

    // --- Suggestion stage ---

    pub async fn request_suggestion(&mut self) -> Result<()> {
        if !matches!(self.stage, Stage::Idle | Stage::Suggested) {
            self.ignore("request suggestion");
            return Ok(());
        }
        let restore = self.stage;
        self.fetch_suggestion(restore).await
    }

    pub async fn reject_suggestion(&mut self) -> Result<()> {
        if self.stage != Stage::Suggested {
            self.ignore("reject suggestion");
            return Ok(());
        }
        let Some(rejected) = self.suggestion.take() else {
            bail!("No suggestion to reject");
        };
        info!("Rejected {}", rejected.suggested_name);
        self.pool.reject(&rejected.suggested_name);

        let result = self.fetch_suggestion(Stage::Suggested).await;
        if result.is_err() {
            // Keep something to accept or reject again.
            self.suggestion = Some(rejected);
        }
        result
    }

    async fn fetch_suggestion(&mut self, restore: Stage) -> Result<()> {
        if self.pool.ensure_available(&self.catalog) {
            info!(
                "Candidate pool exhausted, resetting to {} characters",
                self.pool.len()
            );
        }
        if self.pool.is_empty() {
            return self.fail(restore, anyhow!("The character catalog is empty"));
        }

        info!("Requesting a protagonist from {} candidates", self.pool.len());
        self.stage = Stage::Suggesting;
        match self.request_suggestion_from_pool().await {
            Ok(suggestion) => {
                info!("Suggested protagonist: {}", suggestion.suggested_name);
                self.suggestion = Some(suggestion);
                self.finish(Stage::Suggested);
                Ok(())
            }
            Err(e) => self.fail(restore, e.context("Suggestion failed")),
        }
    }

    async fn request_suggestion_from_pool(&self) -> Result<Suggestion> {
        let request = requests::build_suggestion_request(self.pool.candidates());
        let suggestion = self.backend.suggest(&request).await?;
        if suggestion.suggested_name.trim().is_empty() {
            bail!("Backend returned no suggested character");
        }
        Ok(suggestion)
    }

    // --- Hook stage ---

    pub async fn accept_suggestion(&mut self) -> Result<()> {
        if self.stage != Stage::Suggested {
            self.ignore("accept suggestion");
            return Ok(());
        }
        self.generate_hooks(Stage::Suggested).await
    }

    pub async fn regenerate_hooks(&mut self) -> Result<()> {
        if self.stage != Stage::HooksReady {
            self.ignore("regenerate hooks");
            return Ok(());
        }
        self.generate_hooks(Stage::HooksReady).await
    }

    async fn generate_hooks(&mut self, restore: Stage) -> Result<()> {
        self.stage = Stage::GeneratingHooks;
        match self.request_hooks().await {
            Ok(hooks) => {
                info!("{} story hooks generated", hooks.len());
                self.hook_batch = Some(hooks.into_iter().map(Arc::new).collect());
                self.selected_hook = None;
                self.outline = None;
                self.finish(Stage::HooksReady);
                Ok(())
            }
            Err(e) => self.fail(restore, e.context("Hook generation failed")),
        }
    }

    async fn request_hooks(&self) -> Result<Vec<Hook>> {
        let protagonist = self.require_protagonist()?;
        info!(
            "Generating {} hooks for {}",
            self.settings.hook_count(),
            protagonist.full_name
        );
        let request = requests::build_hook_request(
            protagonist,
            self.catalog.characters(),
            self.settings.hook_count(),
            self.settings.temperature(),
        );
        let hooks = self.backend.generate_hooks(&request).await?;
        if hooks.is_empty() {
            bail!("Backend returned no hooks");
        }
        Ok(hooks)
    }

    // --- Outline stage ---

    pub async fn select_hook(&mut self, index: usize) -> Result<()> {
        if self.stage != Stage::HooksReady {
            self.ignore("select hook");
            return Ok(());
        }
        let hook = self
            .hook_batch
            .as_ref()
            .and_then(|batch| batch.get(index))
            .cloned()
            .ok_or_else(|| anyhow!("No hook at position {}", index + 1))?;

        self.selected_hook = Some(hook.clone());
        let result = self.generate_outline(hook, Stage::HooksReady).await;
        if result.is_err() {
            self.selected_hook = None;
        }
        result
    }

    pub async fn reject_outline(&mut self) -> Result<()> {
        if self.stage != Stage::OutlineReady {
            self.ignore("reject outline");
            return Ok(());
        }
        let hook = self
            .selected_hook
            .clone()
            .ok_or_else(|| anyhow!("No hook selected"))?;
        info!("Regenerating outline");
        self.generate_outline(hook, Stage::OutlineReady).await
    }

    async fn generate_outline(&mut self, hook: Arc<Hook>, restore: Stage) -> Result<()> {
        self.stage = Stage::GeneratingOutline;
        match self.request_outline(&hook).await {
            Ok(outline) => {
                info!("Outline generated: {}", outline.title);
                self.outline = Some(outline);
                self.finish(Stage::OutlineReady);
                Ok(())
            }
            Err(e) => self.fail(restore, e.context("Outline generation failed")),
        }
    }

    async fn request_outline(&self, hook: &Hook) -> Result<Outline> {
        let protagonist = self.require_protagonist()?;
        info!(
            "Developing outline for \"{}\" ({}-{} chapters)",
            hook.title,
            self.settings.min_chapters(),
            self.settings.max_chapters()
        );
        let request = requests::build_outline_request(
            hook,
            protagonist,
            self.catalog.characters(),
            self.settings.story_format(),
            self.settings.temperature(),
            self.settings.min_chapters(),
            self.settings.max_chapters(),
        );
        self.backend.generate_outline(&request).await
    }

    pub fn back_to_hooks(&mut self) {
        if self.stage != Stage::OutlineReady {
            self.ignore("go back to hooks");
            return;
        }
        self.outline = None;
        self.selected_hook = None;
        self.stage = Stage::HooksReady;
    }

    // --- Writing stage ---

    pub async fn accept_outline<F>(&mut self, mut on_progress: F) -> Result<()>
    where
        F: FnMut(&WritingProgress),
    {
        if self.stage != Stage::OutlineReady {
            self.ignore("accept outline");
            return Ok(());
        }
        let Some(outline) = self.outline.as_ref() else {
            bail!("No outline to write");
        };

        info!("Writing \"{}\"", outline.title);
        self.stage = Stage::Writing;
        self.progress = WritingProgress::default();

        let result = stream_story(
            self.backend.as_ref(),
            outline,
            &mut self.progress,
            &mut on_progress,
        )
        .await;

        match result {
            Ok(path) => {
                match &path {
                    Some(path) => info!("Story saved to: {}", path),
                    None => warn!("Writing finished without a story location"),
                }
                self.story_path = path;
                self.finish(Stage::Complete);
                Ok(())
            }
            Err(e) => self.fail(Stage::OutlineReady, e.context("Writing failed")),
        }
    }

    // --- Session ---

    pub async fn rescan_catalog(&mut self) -> Result<()> {
        if self.stage.is_busy() {
            self.ignore("rescan catalog");
            return Ok(());
        }
        let catalog = self
            .backend
            .load_catalog()
            .await
            .context("Rescan failed")?;
        info!("Scan complete: {} characters found", catalog.len());
        self.catalog = catalog;
        self.pool.reset(&self.catalog);
        Ok(())
    }

    // The pool survives so rejections carry over into the next story.
    pub fn start_over(&mut self) {
        if self.stage.is_busy() {
            self.ignore("start over");
            return;
        }
        self.suggestion = None;
        self.hook_batch = None;
        self.selected_hook = None;
        self.outline = None;
        self.progress = WritingProgress::default();
        self.story_path = None;
        self.last_error = None;
        self.stage = Stage::Idle;
    }

    fn require_protagonist(&self) -> Result<&Character> {
        let suggestion = self
            .suggestion
            .as_ref()
            .ok_or_else(|| anyhow!("No protagonist accepted"))?;
        self.catalog.find(&suggestion.suggested_name).ok_or_else(|| {
            anyhow!(
                "Suggested character \"{}\" is not in the catalog",
                suggestion.suggested_name
            )
        })
    }

    fn finish(&mut self, stage: Stage) {
        self.stage = stage;
        self.last_error = None;
    }

    fn fail(&mut self, restore: Stage, error: anyhow::Error) -> Result<()> {
        self.stage = restore;
        let message = format!("{:#}", error);
        error!("{}", message);
        self.last_error = Some(message);
        Err(error)
    }

    fn ignore(&self, action: &str) {
        warn!("Ignoring \"{}\" while {}", action, self.stage);
    }
}

async fn stream_story<F>(
    backend: &dyn StoryBackend,
    outline: &Outline,
    progress: &mut WritingProgress,
    on_progress: &mut F,
) -> Result<Option<String>>
where
    F: FnMut(&WritingProgress),
{
    let request = requests::build_write_request(outline);
    let chunks = backend.write_story(&request).await?;
    let mut events = decode_stream(chunks);

    while let Some(event) = events.next().await {
        let event = event?;
        let terminal = progress.apply(&event);
        on_progress(progress);
        if terminal {
            return Ok(progress.path.clone());
        }
    }

    bail!("Stream closed before the story was complete")
}
