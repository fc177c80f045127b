//! Process-wide library state.
//!
//! [`Library::init`] hands out reference-counted handles. The first handle
//! installs the default [`LibrarySettings`]; dropping the last one resets
//! them. Repositories opened afterwards build their object database from
//! the settings current at open time.

use std::sync::{Mutex, MutexGuard, PoisonError};

use gitcore_hash::HashAlgorithm;
use gitcore_odb::OdbOptions;

/// Defaults applied to newly opened object databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibrarySettings {
    pub cache_capacity: usize,
    /// Zlib level for new loose objects, 0..=9.
    pub compression_level: u32,
    pub max_delta_depth: usize,
}

impl LibrarySettings {
    pub const DEFAULT: Self = Self {
        cache_capacity: 1024,
        compression_level: 6,
        max_delta_depth: 512,
    };

    pub fn odb_options(&self, hash_algorithm: HashAlgorithm) -> OdbOptions {
        OdbOptions {
            compression_level: self.compression_level.min(9),
            cache_capacity: self.cache_capacity,
            hash_algorithm,
            max_delta_depth: self.max_delta_depth,
        }
    }
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

struct State {
    handles: usize,
    settings: LibrarySettings,
}

static STATE: Mutex<State> = Mutex::new(State {
    handles: 0,
    settings: LibrarySettings::DEFAULT,
});

fn state() -> MutexGuard<'static, State> {
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live reference to the library state.
#[derive(Debug)]
pub struct Library {
    _private: (),
}

impl Library {
    pub fn init() -> Self {
        let mut state = state();
        if state.handles == 0 {
            state.settings = LibrarySettings::DEFAULT;
            tracing::debug!("library initialized");
        }
        state.handles += 1;
        Self { _private: () }
    }

    /// Settings in effect; the defaults when no handle is alive.
    pub fn settings() -> LibrarySettings {
        state().settings
    }

    pub fn set_settings(&self, settings: LibrarySettings) {
        tracing::debug!(?settings, "library settings changed");
        state().settings = settings;
    }

    /// Number of live handles.
    pub fn handles() -> usize {
        state().handles
    }
}

impl Clone for Library {
    fn clone(&self) -> Self {
        state().handles += 1;
        Self { _private: () }
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        let mut state = state();
        state.handles = state.handles.saturating_sub(1);
        if state.handles == 0 {
            state.settings = LibrarySettings::DEFAULT;
            tracing::debug!("library shut down");
        }
    }
}
