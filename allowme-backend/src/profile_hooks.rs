//! Profile hooks: side effects triggered by profile writes.
//!
//! The store emits a [`ProfileSaved`] event after every successful profile
//! create or update. Listeners (the agent `.env` synchronizer and the
//! character-file annotator) subscribe to it. Listener failures are logged
//! and never fail the write that triggered them.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::models::{Profile, ProfileFields};

/// Emitted by the store once a profile row has been written
#[derive(Debug, Clone)]
pub struct ProfileSaved {
    /// The profile as stored after the write
    pub profile: Profile,
    /// The profile before the write, None if it was just created
    pub previous: Option<Profile>,
    /// The fields supplied in this write
    pub fields: ProfileFields,
}

impl ProfileSaved {
    pub fn created(profile: Profile, fields: ProfileFields) -> Self {
        Self { profile, previous: None, fields }
    }

    pub fn updated(previous: Profile, profile: Profile, fields: ProfileFields) -> Self {
        Self { profile, previous: Some(previous), fields }
    }

    /// Whether persona files need the grade sentence rewritten.
    ///
    /// True when the profile is completed with a grade and either the grade
    /// or the completion state changed in this write.
    pub fn grade_changed(&self) -> bool {
        let Some(grade) = self.profile.grade() else {
            return false;
        };
        if !self.profile.is_completed {
            return false;
        }
        match &self.previous {
            None => true,
            Some(prev) => !prev.is_completed || prev.grade() != Some(grade),
        }
    }

    /// Environment variables to push to the agent.
    ///
    /// On create this is every non-empty secret of the profile; on update only
    /// the non-empty secrets supplied in the update.
    pub fn env_updates(&self) -> Vec<(&'static str, String)> {
        match self.previous {
            None => self.profile.env_vars(),
            Some(_) => self.fields.env_vars(),
        }
    }
}

/// A subscriber to profile events
pub trait ProfileListener: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn on_profile_saved(&self, event: &ProfileSaved) -> Result<(), String>;
}

/// Registry of profile listeners, invoked in subscription order
#[derive(Default)]
pub struct ProfileHooks {
    listeners: RwLock<Vec<Arc<dyn ProfileListener>>>,
}

impl ProfileHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn ProfileListener>) {
        log::debug!("[PROFILE_HOOK] Subscribed '{}'", listener.name());
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every listener. Errors are logged and swallowed.
    pub fn emit(&self, event: &ProfileSaved) {
        // Snapshot so listeners may subscribe others without deadlocking
        let listeners: Vec<Arc<dyn ProfileListener>> = self.listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.on_profile_saved(event) {
                log::warn!(
                    "[PROFILE_HOOK:{}] Failed for user {}: {}",
                    listener.name(),
                    event.profile.user_id,
                    e
                );
            }
        }
    }
}
