//! Built-in metadata sources.

use std::fs;

use anyhow::Context;

use super::engine::ThreadedMetadata;
use super::{MetadataSource, PropertyConsumer};
use crate::tree::Member;

/// Fallback source: base properties only.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericSource;

impl MetadataSource for GenericSource {
    fn name(&self) -> &str {
        "generic"
    }

    fn applies_to(&self, _member: &Member) -> bool {
        true
    }
}

/// Task folders: type tag, settings and loaded child count.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSource;

impl MetadataSource for TaskSource {
    fn name(&self) -> &str {
        "task"
    }

    fn applies_to(&self, member: &Member) -> bool {
        member.is_task()
    }

    fn fill_in_extra(&self, member: &Member, consumer: &dyn PropertyConsumer) -> anyhow::Result<()> {
        let task = member
            .as_task()
            .with_context(|| format!("{} is not a task", member.path().display()))?;
        consumer.add_property("Task type", task.task_type().as_str());
        consumer.add_property("Settings", &task.settings().len().to_string());
        consumer.add_property("Children", &member.child_count().to_string());
        Ok(())
    }
}

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "properties", "settings", "toml", "json", "csv", "xml", "html", "css", "js",
];

/// Line, word and character counts of a text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStats {
    pub lines: usize,
    pub words: usize,
    pub chars: usize,
}

impl TextStats {
    pub fn of(text: &str) -> Self {
        Self {
            lines: text.lines().count(),
            words: text.split_whitespace().count(),
            chars: text.chars().count(),
        }
    }
}

/// Text files: counts are computed on the metadata worker and cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSource;

impl ThreadedMetadata for TextSource {
    type Payload = TextStats;

    fn name(&self) -> &str {
        "text"
    }

    fn applies_to(&self, member: &Member) -> bool {
        !member.is_folder()
            && member
                .extension()
                .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
    }

    fn description(&self, member: &Member) -> String {
        match member.extension() {
            Some(ext) => format!("Text ({})", ext),
            None => "Text".to_string(),
        }
    }

    fn compute(&self, member: &Member) -> anyhow::Result<TextStats> {
        let bytes = fs::read(member.path())
            .with_context(|| format!("Failed to read {}", member.path().display()))?;
        Ok(TextStats::of(&String::from_utf8_lossy(&bytes)))
    }

    fn deliver(&self, payload: &TextStats, consumer: &dyn PropertyConsumer) {
        consumer.add_property("Lines", &payload.lines.to_string());
        consumer.add_property("Words", &payload.words.to_string());
        consumer.add_property("Characters", &payload.chars.to_string());
    }
}

/// ISO 639-1 language codes.
const LANGUAGES: &[&str] = &[
    "aa", "ab", "ae", "af", "ak", "am", "an", "ar", "as", "av", "ay", "az", "ba", "be", "bg",
    "bh", "bi", "bm", "bn", "bo", "br", "bs", "ca", "ce", "ch", "co", "cr", "cs", "cu", "cv",
    "cy", "da", "de", "dv", "dz", "ee", "el", "en", "eo", "es", "et", "eu", "fa", "ff", "fi",
    "fj", "fo", "fr", "fy", "ga", "gd", "gl", "gn", "gu", "gv", "ha", "he", "hi", "ho", "hr",
    "ht", "hu", "hy", "hz", "ia", "id", "ie", "ig", "ii", "ik", "io", "is", "it", "iu", "ja",
    "jv", "ka", "kg", "ki", "kj", "kk", "kl", "km", "kn", "ko", "kr", "ks", "ku", "kv", "kw",
    "ky", "la", "lb", "lg", "li", "ln", "lo", "lt", "lu", "lv", "mg", "mh", "mi", "mk", "ml",
    "mn", "mr", "ms", "mt", "my", "na", "nb", "nd", "ne", "ng", "nl", "nn", "no", "nr", "nv",
    "ny", "oc", "oj", "om", "or", "os", "pa", "pi", "pl", "ps", "pt", "qu", "rm", "rn", "ro",
    "ru", "rw", "sa", "sc", "sd", "se", "sg", "si", "sk", "sl", "sm", "sn", "so", "sq", "sr",
    "ss", "st", "su", "sv", "sw", "ta", "te", "tg", "th", "ti", "tk", "tl", "tn", "to", "tr",
    "ts", "tt", "tw", "ty", "ug", "uk", "ur", "uz", "ve", "vi", "vo", "wa", "wo", "xh", "yi",
    "yo", "za", "zh", "zu",
];

/// ISO 639-2/3 codes for languages commonly localized without a two letter code.
const THREE_LETTER_LANGUAGES: &[&str] = &[
    "ast", "ceb", "chr", "ckb", "fil", "gsw", "haw", "kok", "mni", "nds", "sat", "sco", "yue",
];

fn is_language(code: &str) -> bool {
    LANGUAGES.contains(&code) || THREE_LETTER_LANGUAGES.contains(&code)
}

fn is_country(code: &str) -> bool {
    code.len() == 2 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// The locale encoded at the end of a file stem: `name_ll` or `name_ll_CC`,
/// where `ll` is a known lowercase language code and `CC` a two letter
/// uppercase country code.
///
/// This is a naming convention, not a guarantee: a stem that happens to end
/// in a language code (`notes_to`) is reported with that locale.
pub fn parse_locale(stem: &str) -> Option<String> {
    let parts: Vec<&str> = stem.split('_').collect();

    match parts.as_slice() {
        [head, .., lang, country] if !head.is_empty() && is_language(lang) && is_country(country) => {
            Some(format!("{}_{}", lang, country))
        }
        [head, .., lang] if !head.is_empty() && is_language(lang) => Some(lang.to_string()),
        _ => None,
    }
}
