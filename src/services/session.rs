use crate::core::config::Config;
use crate::core::state::{Catalog, CastMember, Character, Hook, Outline};
use crate::services::workflow::{Stage, WorkflowController};
use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, CustomType, Select, Text};
use log::{info, warn};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Suggest,
    Accept,
    Reject,
    AskAgain,
    PickHook,
    RegenerateHooks,
    Write,
    RegenerateOutline,
    BackToHooks,
    ViewCast,
    NewStory,
    Settings,
    Rescan,
    StartOver,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Suggest => "Suggest a protagonist",
            Action::Accept => "Accept and generate hooks",
            Action::Reject => "Reject (never suggest again this round)",
            Action::AskAgain => "Ask again",
            Action::PickHook => "Pick a hook",
            Action::RegenerateHooks => "Generate new hooks",
            Action::Write => "Write the story",
            Action::RegenerateOutline => "Generate a different outline",
            Action::BackToHooks => "Back to hooks",
            Action::ViewCast => "View cast member",
            Action::NewStory => "Start a new story",
            Action::Settings => "Edit settings",
            Action::Rescan => "Rescan characters",
            Action::StartOver => "Start over",
            Action::Quit => "Quit",
        };
        f.write_str(label)
    }
}

fn actions(stage: Stage) -> Vec<Action> {
    let mut actions = match stage {
        Stage::Idle => vec![Action::Suggest, Action::Rescan],
        Stage::Suggested => vec![Action::Accept, Action::Reject, Action::AskAgain],
        Stage::HooksReady => vec![Action::PickHook, Action::RegenerateHooks],
        Stage::OutlineReady => vec![
            Action::Write,
            Action::RegenerateOutline,
            Action::ViewCast,
            Action::BackToHooks,
        ],
        Stage::Complete => vec![Action::NewStory],
        _ => Vec::new(),
    };
    if !matches!(stage, Stage::Idle | Stage::Complete) {
        actions.push(Action::StartOver);
    }
    actions.push(Action::Settings);
    actions.push(Action::Quit);
    actions
}

fn hook_label(index: usize, hook: &Hook) -> String {
    format!("{}. {} [{}]", index + 1, hook.title, hook.tone)
}

fn character_details(character: &Character, role: &str) -> String {
    let mut lines = vec![character.full_name.clone()];
    if !character.species.is_empty() {
        lines.push(format!("  Species: {}", character.species));
    }
    lines.push(format!("  Role: {}", role));
    if !character.personality.is_empty() {
        lines.push(format!("  Personality: {}", character.personality));
    }
    // The visual description is the better portrait; fall back to the biography.
    let about = if character.visual_description.is_empty() {
        &character.biography
    } else {
        &character.visual_description
    };
    if !about.is_empty() {
        lines.push(format!("  {}", about));
    }
    if let Some(image) = character.primary_image() {
        lines.push(format!("  Portrait: {}", image));
    }
    lines.join("\n")
}

fn cast_member_details(catalog: &Catalog, member: &CastMember) -> String {
    match catalog.find(&member.name) {
        Some(character) => character_details(character, &member.role),
        None => format!(
            "{}\n  Role: {}\n  (not in the character catalog)",
            member.name, member.role
        ),
    }
}

pub struct Session {
    controller: WorkflowController,
    config: Config,
}

impl Session {
    pub fn new(controller: WorkflowController, config: Config) -> Self {
        Self { controller, config }
    }

    pub async fn run(&mut self) -> Result<()> {
        println!(
            "{} characters loaded from {}",
            self.controller.catalog().len(),
            self.config.backend.base_url
        );
        if self.config.unattended {
            return self.run_unattended().await;
        }

        loop {
            let stage = self.controller.stage();
            if stage.is_busy() {
                bail!("Workflow stuck while {}", stage);
            }
            self.show(stage);

            let action = Select::new("What next?", actions(stage)).prompt()?;
            if action == Action::Quit {
                println!("Goodbye!");
                return Ok(());
            }
            // Failures are already rolled back; report and offer the menu again.
            if let Err(e) = self.perform(action).await {
                eprintln!("Error: {:#}", e);
            }
        }
    }

    async fn run_unattended(&mut self) -> Result<()> {
        info!("Running unattended");
        self.controller.request_suggestion().await?;
        self.show(Stage::Suggested);
        self.controller.accept_suggestion().await?;
        self.show(Stage::HooksReady);
        self.controller.select_hook(0).await?;
        self.show(Stage::OutlineReady);
        self.write().await?;
        self.show(Stage::Complete);
        Ok(())
    }

    async fn perform(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Suggest | Action::AskAgain => self.controller.request_suggestion().await,
            Action::Accept => self.controller.accept_suggestion().await,
            Action::Reject => self.controller.reject_suggestion().await,
            Action::PickHook => self.pick_hook().await,
            Action::RegenerateHooks => self.controller.regenerate_hooks().await,
            Action::Write => self.write().await,
            Action::RegenerateOutline => self.controller.reject_outline().await,
            Action::BackToHooks => {
                self.controller.back_to_hooks();
                Ok(())
            }
            Action::ViewCast => self.view_cast(),
            Action::NewStory | Action::StartOver => {
                self.controller.start_over();
                Ok(())
            }
            Action::Settings => self.edit_settings(),
            Action::Rescan => {
                self.controller.rescan_catalog().await?;
                println!("{} characters available", self.controller.catalog().len());
                Ok(())
            }
            Action::Quit => Ok(()),
        }
    }

    async fn pick_hook(&mut self) -> Result<()> {
        let labels: Vec<String> = match self.controller.hook_batch() {
            Some(batch) => batch
                .iter()
                .enumerate()
                .map(|(i, hook)| hook_label(i, hook))
                .collect(),
            None => bail!("No hooks to choose from"),
        };
        let choice = Select::new("Select a hook:", labels).raw_prompt()?;
        println!("Developing outline...");
        self.controller.select_hook(choice.index).await
    }

    fn view_cast(&self) -> Result<()> {
        let (Some(outline), Some(suggestion)) =
            (self.controller.outline(), self.controller.suggestion())
        else {
            bail!("No outline to show");
        };
        let cast = outline.cast(&suggestion.suggested_name);
        let labels: Vec<String> = cast
            .iter()
            .map(|m| format!("{} ({})", m.name, m.role))
            .collect();
        let choice = Select::new("Cast member:", labels).raw_prompt()?;
        println!("\n{}", cast_member_details(self.controller.catalog(), &cast[choice.index]));
        Ok(())
    }

    async fn write(&mut self) -> Result<()> {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}% {msg}")?
                .progress_chars("#>-"),
        );

        let result = self
            .controller
            .accept_outline(|progress| {
                pb.set_position(progress.progress.round() as u64);
                if let Some(status) = &progress.status {
                    pb.set_message(status.clone());
                }
            })
            .await;

        match &result {
            Ok(()) => pb.finish_with_message("Done"),
            Err(_) => pb.abandon_with_message("Interrupted"),
        }
        result
    }

    fn edit_settings(&mut self) -> Result<()> {
        let settings = self.controller.settings_mut();

        let hook_count = CustomType::<u32>::new("Hooks per batch:")
            .with_default(settings.hook_count())
            .prompt()?;
        settings.set_hook_count(hook_count);

        let temperature = CustomType::<f64>::new("Temperature:")
            .with_default(settings.temperature())
            .prompt()?;
        if let Err(e) = settings.set_temperature(temperature) {
            warn!("{:#}", e);
            println!("Keeping temperature {}", settings.temperature());
        }

        let format = Text::new("Story format:")
            .with_default(settings.story_format())
            .prompt()?;
        settings.set_story_format(&format);

        let min = CustomType::<u32>::new("Minimum chapters:")
            .with_default(settings.min_chapters())
            .prompt()?;
        settings.set_min_chapters(min);
        let max = CustomType::<u32>::new("Maximum chapters:")
            .with_default(settings.max_chapters())
            .prompt()?;
        settings.set_max_chapters(max);

        println!(
            "{} hooks, temperature {}, {} with {}-{} chapters",
            settings.hook_count(),
            settings.temperature(),
            settings.story_format(),
            settings.min_chapters(),
            settings.max_chapters()
        );

        if Confirm::new("Save these settings to config.yml?")
            .with_default(true)
            .prompt()?
        {
            self.config.settings = self.controller.settings().clone();
            self.config.save()?;
            println!("Settings saved.");
        }
        Ok(())
    }

    fn show(&self, stage: Stage) {
        match stage {
            Stage::Suggested => {
                let Some(suggestion) = self.controller.suggestion() else {
                    return;
                };
                println!("\nSuggested protagonist: {}", suggestion.suggested_name);
                println!("  {}", suggestion.reason);
                if let Some(hook) = &suggestion.sample_hook {
                    println!("  Sample hook: {}", hook);
                }
                if let Some(character) = self.controller.protagonist() {
                    // The detail block falls back to the biography only without a description.
                    if !character.biography.is_empty() && !character.visual_description.is_empty() {
                        println!("  Biography: {}", character.biography);
                    }
                    println!("\n{}", character_details(character, "Suggested protagonist"));
                }
                println!("  {} candidates remain", self.controller.pool().len());
            }
            Stage::HooksReady => {
                if let Some(batch) = self.controller.hook_batch() {
                    println!();
                    for (i, hook) in batch.iter().enumerate() {
                        println!("{}", hook_label(i, hook));
                        println!("   {}", hook.idea);
                    }
                }
            }
            Stage::OutlineReady => {
                if let Some(outline) = self.controller.outline() {
                    let protagonist = self
                        .controller
                        .suggestion()
                        .map(|s| s.suggested_name.as_str())
                        .unwrap_or_default();
                    print_outline(outline, protagonist);
                }
            }
            Stage::Complete => match self.controller.story_path() {
                Some(path) => println!("\nStory complete: {}", path),
                None => println!("\nStory complete."),
            },
            _ => {}
        }
        if let Some(error) = self.controller.last_error() {
            println!("(last request failed: {})", error);
        }
    }
}

fn print_outline(outline: &Outline, protagonist: &str) {
    println!("\n{}", outline.title);
    if !outline.logline.is_empty() {
        println!("  {}", outline.logline);
    }
    if !outline.protagonist_arc.is_empty() {
        println!("\nArc: {}", outline.protagonist_arc);
    }

    println!("\nCast:");
    for member in outline.cast(protagonist) {
        let marker = if member.is_protagonist { "*" } else { "-" };
        println!("  {} {} ({})", marker, member.name, member.role);
    }

    if !outline.subplots.is_empty() {
        println!("\nSubplots:");
        for subplot in &outline.subplots {
            println!(
                "  - {} [{}]",
                subplot.title,
                subplot.involved_character_names.join(", ")
            );
        }
    }

    println!("\nChapters:");
    for chapter in &outline.chapters {
        match &chapter.title {
            Some(title) => println!("  {}. {}: {}", chapter.chapter_number, title, chapter.summary),
            None => println!("  {}. {}", chapter.chapter_number, chapter.summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_settled_stage_can_quit_and_edit_settings() {
        for stage in [
            Stage::Idle,
            Stage::Suggested,
            Stage::HooksReady,
            Stage::OutlineReady,
            Stage::Complete,
        ] {
            let menu = actions(stage);
            assert_eq!(menu.last(), Some(&Action::Quit), "{}", stage);
            assert!(menu.contains(&Action::Settings), "{}", stage);
        }
    }

    #[test]
    fn test_stage_menus() {
        assert_eq!(actions(Stage::Idle)[0], Action::Suggest);
        assert!(actions(Stage::Suggested).contains(&Action::Reject));
        assert!(actions(Stage::OutlineReady).contains(&Action::BackToHooks));
        assert!(actions(Stage::OutlineReady).contains(&Action::ViewCast));
        assert!(!actions(Stage::Idle).contains(&Action::StartOver));
        assert!(actions(Stage::HooksReady).contains(&Action::StartOver));
    }

    fn ava() -> Character {
        serde_json::from_value(serde_json::json!({
            "full_name": "Ava",
            "species": "Elf",
            "personality": "Stubborn",
            "biography": "Raised in the archive.",
            "generated_images": { "portrait": "img\\ava.png" }
        }))
        .unwrap()
    }

    #[test]
    fn test_character_details() {
        let details = character_details(&ava(), "Rival");
        assert_eq!(
            details,
            "Ava\n  Species: Elf\n  Role: Rival\n  Personality: Stubborn\n  \
             Raised in the archive.\n  Portrait: img/ava.png"
        );

        let mut described = ava();
        described.visual_description = "Silver hair.".to_string();
        assert!(character_details(&described, "Rival").contains("  Silver hair."));
        assert!(!character_details(&described, "Rival").contains("archive"));
    }

    #[test]
    fn test_cast_member_resolved_through_catalog() {
        let catalog = Catalog::new(vec![ava()]);
        let member = CastMember {
            name: "Ava".to_string(),
            role: "Mentor".to_string(),
            is_protagonist: false,
        };
        assert!(cast_member_details(&catalog, &member).contains("Species: Elf"));

        let stranger = CastMember {
            name: "Zed".to_string(),
            ..member
        };
        let details = cast_member_details(&catalog, &stranger);
        assert!(details.starts_with("Zed\n  Role: Mentor"));
        assert!(details.contains("not in the character catalog"));
    }

    #[test]
    fn test_hook_label_is_one_based() {
        let hook = Hook {
            title: "The Last Lamp".to_string(),
            tone: "Melancholic".to_string(),
            idea: String::new(),
        };
        assert_eq!(hook_label(0, &hook), "1. The Last Lamp [Melancholic]");
    }
}
