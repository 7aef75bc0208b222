use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// User-tunable generation settings. Fields are private so every edit goes
/// through the setters, which keep `1 <= min_chapters <= max_chapters`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StorySettings {
    #[serde(default = "default_hook_count")]
    hook_count: u32,
    #[serde(default = "default_temperature")]
    temperature: f64,
    #[serde(default = "default_story_format")]
    story_format: String,
    #[serde(default = "default_min_chapters")]
    min_chapters: u32,
    #[serde(default = "default_max_chapters")]
    max_chapters: u32,
}

fn default_hook_count() -> u32 {
    8
}
fn default_temperature() -> f64 {
    1.2
}
fn default_story_format() -> String {
    "Light Novel".to_string()
}
fn default_min_chapters() -> u32 {
    10
}
fn default_max_chapters() -> u32 {
    20
}

impl Default for StorySettings {
    fn default() -> Self {
        Self {
            hook_count: default_hook_count(),
            temperature: default_temperature(),
            story_format: default_story_format(),
            min_chapters: default_min_chapters(),
            max_chapters: default_max_chapters(),
        }
    }
}

impl StorySettings {
    pub fn hook_count(&self) -> u32 {
        self.hook_count
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn story_format(&self) -> &str {
        &self.story_format
    }

    pub fn min_chapters(&self) -> u32 {
        self.min_chapters
    }

    pub fn max_chapters(&self) -> u32 {
        self.max_chapters
    }

    pub fn set_hook_count(&mut self, count: u32) {
        self.hook_count = count.max(1);
    }

    pub fn set_temperature(&mut self, temperature: f64) -> Result<()> {
        if !temperature.is_finite() || temperature <= 0.0 {
            bail!("Temperature must be a positive number, got {}", temperature);
        }
        self.temperature = temperature;
        Ok(())
    }

    pub fn set_story_format(&mut self, format: &str) {
        let format = format.trim();
        self.story_format = if format.is_empty() {
            default_story_format()
        } else {
            format.to_string()
        };
    }

    pub fn set_min_chapters(&mut self, min: u32) {
        self.min_chapters = min.max(1);
        if self.min_chapters > self.max_chapters {
            self.max_chapters = self.min_chapters;
        }
    }

    pub fn set_max_chapters(&mut self, max: u32) {
        self.max_chapters = max.max(1);
        if self.max_chapters < self.min_chapters {
            self.min_chapters = self.max_chapters;
        }
    }

    pub fn normalized(mut self) -> Self {
        self.set_hook_count(self.hook_count);
        if self.set_temperature(self.temperature).is_err() {
            log::warn!(
                "Invalid temperature {} in settings, using {}",
                self.temperature,
                default_temperature()
            );
            self.temperature = default_temperature();
        }
        let format = std::mem::take(&mut self.story_format);
        self.set_story_format(&format);
        let max = self.max_chapters;
        self.set_min_chapters(self.min_chapters);
        self.set_max_chapters(max);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = StorySettings::default();
        assert_eq!(settings.hook_count(), 8);
        assert_eq!(settings.temperature(), 1.2);
        assert_eq!(settings.story_format(), "Light Novel");
        assert!(settings.min_chapters() <= settings.max_chapters());
    }

    #[test]
    fn test_min_past_max_raises_max() {
        let mut settings = StorySettings::default();
        settings.set_max_chapters(5);
        settings.set_min_chapters(10);
        assert_eq!(settings.min_chapters(), 10);
        assert_eq!(settings.max_chapters(), 10);
    }

    #[test]
    fn test_max_below_min_lowers_min() {
        let mut settings = StorySettings::default();
        settings.set_min_chapters(10);
        settings.set_max_chapters(5);
        assert_eq!(settings.min_chapters(), 5);
        assert_eq!(settings.max_chapters(), 5);
    }

    #[test]
    fn test_rejects_bad_temperature() {
        let mut settings = StorySettings::default();
        assert!(settings.set_temperature(0.0).is_err());
        assert!(settings.set_temperature(f64::NAN).is_err());
        assert_eq!(settings.temperature(), 1.2);
        settings.set_temperature(0.7).unwrap();
        assert_eq!(settings.temperature(), 0.7);
    }

    #[test]
    fn test_zero_counts_are_raised() {
        let mut settings = StorySettings::default();
        settings.set_hook_count(0);
        settings.set_max_chapters(0);
        assert_eq!(settings.hook_count(), 1);
        assert_eq!(settings.max_chapters(), 1);
        assert_eq!(settings.min_chapters(), 1);
    }

    #[test]
    fn test_normalized_fixes_inverted_range() {
        let yaml = "min_chapters: 12\nmax_chapters: 4\ntemperature: -1.0\nstory_format: ''\n";
        let settings: StorySettings = serde_yaml_ng::from_str(yaml).unwrap();
        let settings = settings.normalized();
        assert_eq!(settings.min_chapters(), 4);
        assert_eq!(settings.max_chapters(), 4);
        assert_eq!(settings.temperature(), 1.2);
        assert_eq!(settings.story_format(), "Light Novel");
        assert_eq!(settings.hook_count(), 8);
    }
}
