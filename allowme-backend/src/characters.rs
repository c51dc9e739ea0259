//! Character-file annotation.
//!
//! The agent runtime loads persona definitions from `*.character.json` files.
//! Each file's `system` prompt carries one sentence stating the student's
//! grade, kept in sync with the profile store.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::Database;
use crate::profile_hooks::{ProfileListener, ProfileSaved};

pub const CHARACTER_FILE_SUFFIX: &str = ".character.json";

static GRADE_SENTENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"The student is in [^\n]*? grade\.").expect("grade sentence pattern is valid")
});

/// The sentence stays on one line so it can always be found again
fn grade_sentence(grade: &str) -> String {
    let grade = grade.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("The student is in {} grade.", grade)
}

/// Put exactly one grade sentence into `system`.
///
/// The first existing sentence is replaced and any others removed; without
/// one, the sentence is appended on a new line.
pub fn apply_grade_sentence(system: &str, grade: &str) -> String {
    let sentence = grade_sentence(grade);
    let mut matches = GRADE_SENTENCE.find_iter(system);
    let Some(first) = matches.next() else {
        if system.is_empty() {
            return sentence;
        }
        return format!("{}\n{}", system, sentence);
    };

    let mut result = String::with_capacity(system.len() + sentence.len());
    result.push_str(&system[..first.start()]);
    result.push_str(&sentence);
    let mut rest_start = first.end();
    for extra in matches {
        let before = &system[rest_start..extra.start()];
        // Drop the separator that introduced the duplicate
        result.push_str(before.strip_suffix('\n').unwrap_or(before));
        rest_start = extra.end();
    }
    result.push_str(&system[rest_start..]);
    result
}

/// Which character files to annotate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharacterTarget {
    All,
    /// A single `<name>.character.json`
    Named(String),
}

/// Rewrites persona files in a directory with the student's grade
#[derive(Debug, Clone)]
pub struct CharacterAnnotator {
    dir: PathBuf,
}

impl CharacterAnnotator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All `*.character.json` files in the directory, sorted by name
    pub fn find_character_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("[CHARACTERS] Characters directory {:?} unreadable: {}", self.dir, e);
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(CHARACTER_FILE_SUFFIX))
            })
            .collect();
        files.sort();
        files
    }

    fn named_file(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            log::warn!("[CHARACTERS] Invalid character name {:?}", name);
            return None;
        }
        Some(self.dir.join(format!("{}{}", name, CHARACTER_FILE_SUFFIX)))
    }

    /// Rewrite one file's `system` field. Returns false (and logs) on any failure.
    pub fn annotate_file(&self, path: &Path, grade: &str) -> bool {
        match annotate_file(path, grade) {
            Ok(()) => {
                log::info!("[CHARACTERS] Updated {:?} with grade {}", path, grade);
                true
            }
            Err(e) => {
                log::warn!("[CHARACTERS] Not updating {:?}: {}", path, e);
                false
            }
        }
    }

    /// Annotate the targeted files with `grade`. Returns the number of files updated.
    pub fn annotate(&self, grade: &str, target: &CharacterTarget) -> usize {
        let files = match target {
            CharacterTarget::All => self.find_character_files(),
            CharacterTarget::Named(name) => self.named_file(name).into_iter().collect(),
        };
        if files.is_empty() {
            log::info!("[CHARACTERS] No character files found in {:?}", self.dir);
            return 0;
        }

        files
            .iter()
            .filter(|path| self.annotate_file(path, grade))
            .count()
    }

    /// Look up the user's grade in the store and annotate the targeted files.
    ///
    /// Returns false when there is no grade on file or nothing was updated.
    pub fn annotate_for_user(&self, db: &Database, user_id: &str, target: &CharacterTarget) -> bool {
        let profile = match db.get_profile_by_user_id(user_id) {
            Ok(profile) => profile,
            Err(e) => {
                log::error!("[CHARACTERS] Failed to load profile for user {}: {}", user_id, e);
                return false;
            }
        };
        let Some(grade) = profile.as_ref().and_then(|p| p.grade()) else {
            log::info!("[CHARACTERS] No grade information found for user {}", user_id);
            return false;
        };
        self.annotate(grade, target) > 0
    }

    /// Annotate every character file for every completed profile with a grade.
    /// Returns the number of profiles processed.
    pub fn annotate_completed_profiles(&self, db: &Database) -> usize {
        let profiles = match db.list_completed_profiles() {
            Ok(profiles) => profiles,
            Err(e) => {
                log::error!("[CHARACTERS] Failed to list completed profiles: {}", e);
                return 0;
            }
        };

        let mut processed = 0;
        for profile in &profiles {
            let Some(grade) = profile.grade() else { continue };
            log::info!("[CHARACTERS] Processing user {}", profile.user_id);
            self.annotate(grade, &CharacterTarget::All);
            processed += 1;
        }
        processed
    }
}

fn annotate_file(path: &Path, grade: &str) -> Result<(), String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("read failed: {}", e))?;
    let mut character: Value =
        serde_json::from_str(&raw).map_err(|e| format!("invalid JSON: {}", e))?;

    let system = character
        .get_mut("system")
        .ok_or_else(|| "no system field".to_string())?;
    let Value::String(text) = system else {
        return Err("system field is not a string".to_string());
    };
    *text = apply_grade_sentence(text, grade);

    let mut serialized = serde_json::to_string_pretty(&character)
        .map_err(|e| format!("serialize failed: {}", e))?;
    serialized.push('\n');
    fs::write(path, serialized).map_err(|e| format!("write failed: {}", e))
}

impl ProfileListener for CharacterAnnotator {
    fn name(&self) -> &'static str {
        "characters"
    }

    fn on_profile_saved(&self, event: &ProfileSaved) -> Result<(), String> {
        if !event.grade_changed() {
            return Ok(());
        }
        let Some(grade) = event.profile.grade() else {
            return Ok(());
        };
        if !self.dir.is_dir() {
            return Err(format!("characters directory {:?} not found", self.dir));
        }
        self.annotate(grade, &CharacterTarget::All);
        Ok(())
    }
}
