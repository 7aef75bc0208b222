use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Character {
    #[serde(alias = "name")]
    pub full_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub species: String,
    #[serde(default, alias = "backstory", deserialize_with = "null_default")]
    pub biography: String,
    #[serde(default, deserialize_with = "null_default")]
    pub personality: String,
    #[serde(default, alias = "description", deserialize_with = "null_default")]
    pub visual_description: String,
    /// Variant key -> image. Sorted keys give a stable "first image".
    #[serde(default)]
    pub generated_images: BTreeMap<String, ImageEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Character {
    pub fn image_paths(&self) -> Vec<String> {
        self.generated_images
            .values()
            .filter_map(ImageEntry::path)
            .collect()
    }

    pub fn primary_image(&self) -> Option<String> {
        self.generated_images.values().find_map(ImageEntry::path)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ImageEntry {
    Path(String),
    Record(ImageRecord),
    Other(Value),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageRecord {
    pub path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageEntry {
    pub fn path(&self) -> Option<String> {
        let raw = match self {
            ImageEntry::Path(path) => path,
            ImageEntry::Record(record) => &record.path,
            ImageEntry::Other(_) => return None,
        };
        if raw.is_empty() {
            None
        } else {
            Some(raw.replace('\\', "/"))
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(transparent)]
pub struct Catalog {
    characters: Vec<Character>,
}

impl Catalog {
    pub fn new(characters: Vec<Character>) -> Self {
        Self { characters }
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn find(&self, full_name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.full_name == full_name)
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Suggestion {
    #[serde(rename = "suggested_main_character", default)]
    pub suggested_name: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub sample_hook: Option<String>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Hook {
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub tone: String,
    #[serde(default, deserialize_with = "null_default")]
    pub idea: String,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Outline {
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(
        default,
        deserialize_with = "null_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub logline: String,
    #[serde(
        default,
        deserialize_with = "null_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub protagonist_arc: String,
    #[serde(default, deserialize_with = "null_default")]
    pub subplots: Vec<Subplot>,
    #[serde(
        default,
        deserialize_with = "side_cast::deserialize",
        serialize_with = "side_cast::serialize"
    )]
    pub selected_side_characters: Vec<SideCharacter>,
    #[serde(
        default,
        rename = "outline",
        alias = "chapters",
        deserialize_with = "null_default"
    )]
    pub chapters: Vec<Chapter>,
    // e.g. `cast_profiles`, which only the writer reads
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Subplot {
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    #[serde(default, deserialize_with = "unique_names")]
    pub involved_character_names: Vec<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub resolution_arc: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Chapter {
    #[serde(
        rename = "chapter",
        alias = "chapter_number",
        default,
        deserialize_with = "lenient_number"
    )]
    pub chapter_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub summary: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideCharacter {
    pub name: String,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CastMember {
    pub name: String,
    pub role: String,
    pub is_protagonist: bool,
}

impl Outline {
    /// Protagonist first, then the side cast in outline order.
    pub fn cast(&self, protagonist: &str) -> Vec<CastMember> {
        let mut cast = vec![CastMember {
            name: protagonist.to_string(),
            role: "Protagonist / Main Character".to_string(),
            is_protagonist: true,
        }];
        cast.extend(
            self.selected_side_characters
                .iter()
                .filter(|side| side.name != protagonist)
                .map(|side| CastMember {
                    name: side.name.clone(),
                    role: side
                        .reason
                        .clone()
                        .unwrap_or_else(|| "Side Character".to_string()),
                    is_protagonist: false,
                }),
        );
        cast
    }
}

/// Treats an explicit `null` like a missing field.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Chapter numbers arrive as `3`, `3.0` or `"3"`. Anything unreadable is 0.
fn lenient_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let number = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number
        .filter(|n| n.is_finite() && *n >= 0.0 && *n <= u32::MAX as f64)
        .map(|n| n.round() as u32)
        .unwrap_or_default())
}

fn unique_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names: Option<Vec<String>> = Option::deserialize(deserializer)?;
    let mut unique: Vec<String> = Vec::new();
    for name in names.unwrap_or_default() {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    Ok(unique)
}

/// `selected_side_characters` arrives either as `["A", "B"]` or as
/// `{"A": "why", "B": "why"}`. Both decode to the same ordered list.
mod side_cast {
    use super::SideCharacter;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::{Map, Value};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Shape {
        Names(Vec<String>),
        Justified(Map<String, Value>),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<SideCharacter>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let shape: Option<Shape> = Option::deserialize(deserializer)?;
        let cast = match shape {
            None => Vec::new(),
            Some(Shape::Names(names)) => names
                .into_iter()
                .map(|name| SideCharacter { name, reason: None })
                .collect(),
            Some(Shape::Justified(entries)) => entries
                .into_iter()
                .map(|(name, reason)| SideCharacter {
                    name,
                    reason: match reason {
                        Value::Null => None,
                        Value::String(s) => Some(s),
                        other => Some(other.to_string()),
                    },
                })
                .collect(),
        };
        Ok(cast)
    }

    pub fn serialize<S>(cast: &[SideCharacter], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if cast.iter().all(|side| side.reason.is_none()) {
            return serializer.collect_seq(cast.iter().map(|side| &side.name));
        }
        let mut map = serializer.serialize_map(Some(cast.len()))?;
        for side in cast {
            map.serialize_entry(&side.name, side.reason.as_deref().unwrap_or(""))?;
        }
        map.end()
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct StreamEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        self.complete == Some(true)
    }
}

#[derive(Serialize, Default, Clone, Debug, PartialEq)]
pub struct WritingProgress {
    pub status: Option<String>,
    pub progress: f64,
    pub path: Option<String>,
}

impl WritingProgress {
    // Progress is taken as reported, clamped to 0..=100. It may go backwards.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        if let Some(status) = &event.status {
            self.status = Some(status.clone());
        }
        if let Some(progress) = event.progress {
            if progress.is_finite() {
                self.progress = progress.clamp(0.0, 100.0);
            }
        }
        if event.is_terminal() {
            self.progress = 100.0;
            self.path = event.path.clone();
            return true;
        }
        false
    }
}
