use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

/// Fixed resolver messages, sent to the client verbatim.
pub const INVALID_VERSION_MESSAGE: &str = "Invalid Bible version";
pub const NOT_FOUND_MESSAGE: &str = "Text not found";

// Anchors on the LAST " <chapter>:<verse>" token, so book names with
// spaces or digits ("1 John", "Song of Solomon") stay intact.
static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+) (\d+):(\d+)$").unwrap());

static RANGE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?\s+\d+):(\d+)-(\d+)$").unwrap());

/// Supported translations. Each code must have a dataset loaded at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Translation {
    Kjv,
    Esv,
    Niv,
}

impl Translation {
    pub const ALL: [Translation; 3] = [Translation::Kjv, Translation::Esv, Translation::Niv];

    pub fn code(&self) -> &'static str {
        match self {
            Translation::Kjv => "KJV",
            Translation::Esv => "ESV",
            Translation::Niv => "NIV",
        }
    }

    pub fn parse(code: &str) -> Option<Translation> {
        Translation::ALL
            .into_iter()
            .find(|t| t.code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// book -> chapter -> verse -> text, the shape of the bundled datasets.
pub type BibleData = HashMap<String, HashMap<String, HashMap<String, String>>>;

/// Outcome of resolving one reference. Every variant is a normal value so
/// one bad lookup never interrupts the surrounding stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(String),
    NotFound,
    InvalidVersion,
    Unparseable,
}

/// Read-only verse lookup tables, one per translation. Loaded once at
/// process start and shared for the process lifetime.
#[derive(Debug)]
pub struct TranslationStore {
    versions: HashMap<Translation, BibleData>,
}

impl TranslationStore {
    /// Loads `<CODE>.json` for every supported translation from `dir`.
    /// A missing or malformed dataset is a startup error.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let mut versions = HashMap::new();
        for translation in Translation::ALL {
            let path = dir.join(format!("{}.json", translation.code()));
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read dataset {}", path.display()))?;
            let data: BibleData = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse dataset {}", path.display()))?;
            info!("loaded {} translation: {} books", translation.code(), data.len());
            versions.insert(translation, data);
        }
        Ok(TranslationStore { versions })
    }

    /// Builds a store from in-memory datasets, bypassing the filesystem.
    pub fn from_datasets(datasets: Vec<(Translation, BibleData)>) -> Self {
        TranslationStore {
            versions: datasets.into_iter().collect(),
        }
    }

    pub fn translations(&self) -> Vec<&'static str> {
        let mut codes: Vec<&'static str> = self.versions.keys().map(|t| t.code()).collect();
        codes.sort_unstable();
        codes
    }

    /// Resolves a `"Book Chapter:Verse"` reference against one translation.
    pub fn resolve(&self, reference: &str, version: &str) -> Resolution {
        let Some(data) = Translation::parse(version).and_then(|t| self.versions.get(&t)) else {
            return Resolution::InvalidVersion;
        };
        let Some(caps) = REFERENCE_PATTERN.captures(reference.trim()) else {
            return Resolution::Unparseable;
        };
        match data
            .get(&caps[1])
            .and_then(|book| book.get(&caps[2]))
            .and_then(|chapter| chapter.get(&caps[3]))
        {
            Some(text) => Resolution::Found(text.clone()),
            None => Resolution::NotFound,
        }
    }

    /// String-only resolver contract: literal verse text, or a fixed
    /// human-readable message. Never fails.
    pub fn verse_text(&self, reference: &str, version: &str) -> String {
        match self.resolve(reference, version) {
            Resolution::Found(text) => text,
            Resolution::InvalidVersion => INVALID_VERSION_MESSAGE.to_string(),
            Resolution::NotFound | Resolution::Unparseable => NOT_FOUND_MESSAGE.to_string(),
        }
    }
}

/// Expands a `"Book Chapter:Start-End"` range into ascending single-verse
/// references. Anything that is not a well-formed ascending range comes
/// back unchanged as a singleton.
pub fn expand_verse_range(reference: &str) -> Vec<String> {
    let Some(caps) = RANGE_PATTERN.captures(reference) else {
        return vec![reference.to_string()];
    };
    let book_chapter = &caps[1];
    match (caps[2].parse::<u32>(), caps[3].parse::<u32>()) {
        (Ok(start), Ok(end)) if start <= end => (start..=end)
            .map(|verse| format!("{}:{}", book_chapter, verse))
            .collect(),
        _ => vec![reference.to_string()],
    }
}
