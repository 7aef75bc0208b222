use crate::core::state::{Character, Hook, Outline};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SuggestionRequest<'a> {
    pub characters: &'a [Character],
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HookRequest<'a> {
    pub character: &'a Character,
    pub full_list: &'a [Character],
    pub hook_count: u32,
    pub temperature: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OutlineRequest<'a> {
    pub hook: &'a Hook,
    pub protagonist: &'a Character,
    pub full_list: &'a [Character],
    pub story_format: &'a str,
    pub temperature: f64,
    pub min_chapters: u32,
    pub max_chapters: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WriteRequest<'a> {
    pub outline: &'a Outline,
}

pub fn build_suggestion_request(pool: &[Character]) -> SuggestionRequest<'_> {
    SuggestionRequest { characters: pool }
}

pub fn build_hook_request<'a>(
    character: &'a Character,
    catalog: &'a [Character],
    count: u32,
    temperature: f64,
) -> HookRequest<'a> {
    HookRequest {
        character,
        full_list: catalog,
        hook_count: count,
        temperature,
    }
}

pub fn build_outline_request<'a>(
    hook: &'a Hook,
    character: &'a Character,
    catalog: &'a [Character],
    format: &'a str,
    temperature: f64,
    min_chapters: u32,
    max_chapters: u32,
) -> OutlineRequest<'a> {
    OutlineRequest {
        hook,
        protagonist: character,
        full_list: catalog,
        story_format: format,
        temperature,
        min_chapters: min_chapters.min(max_chapters),
        max_chapters: max_chapters.max(min_chapters),
    }
}

pub fn build_write_request(outline: &Outline) -> WriteRequest<'_> {
    WriteRequest { outline }
}
