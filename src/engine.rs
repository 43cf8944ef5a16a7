//! # Location Engine
//!
//! Runs one significant-location invocation against a GPS source and an
//! attachment store.
//!
//! ## Architecture
//!
//! The engine owns no history of its own. Each call:
//! - validates parameters and the requested window
//! - dispatches to the frequency or density+partition extractor
//! - on the density path, loads the subject's reduction state, folds new
//!   readings into it and writes it back with a single `set`
//!
//! Density-path calls for the same subject are serialized through a
//! process-wide lock registry so concurrent invocations cannot lose each
//! other's reduction updates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};
use once_cell::sync::Lazy;

use crate::reduction::{reduce, ReductionParams, ReductionState, REDUCED_ATTACHMENT_KEY};
use crate::{
    density, frequency, AttachmentStore, ExtractionMethod, GpsSource, Location, LocationConfig,
    LocationError, Result,
};

// ============================================================================
// Per-subject locking
// ============================================================================

/// Registry of per-subject locks. Holds only subjects with calls in flight.
static SUBJECT_LOCKS: Lazy<Mutex<HashMap<String, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Run `f` while holding the lock for `subject_id`.
///
/// Calls for different subjects do not block each other. A lock poisoned by a
/// panicking holder is recovered; the guarded data is `()`.
///
/// The last caller to leave removes the subject's entry from the registry.
pub fn with_subject_lock<F, R>(subject_id: &str, f: F) -> R
where
    F: FnOnce() -> R,
{
    let lock = {
        let mut registry = lock_registry();
        registry
            .entry(subject_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    };

    let result = {
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    };

    // Clones are only handed out under the registry lock, so a count of two
    // (registry + ours) cannot grow while we hold it
    let mut registry = lock_registry();
    if Arc::strong_count(&lock) == 2 {
        registry.remove(subject_id);
    }
    result
}

fn lock_registry() -> MutexGuard<'static, HashMap<String, Arc<Mutex<()>>>> {
    SUBJECT_LOCKS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Engine
// ============================================================================

/// Significant-location engine over a pair of collaborators.
pub struct LocationEngine<G: GpsSource, A: AttachmentStore> {
    gps: G,
    attachments: A,
    config: LocationConfig,
}

impl<G: GpsSource, A: AttachmentStore> LocationEngine<G, A> {
    pub fn new(gps: G, attachments: A, config: LocationConfig) -> Self {
        Self {
            gps,
            attachments,
            config,
        }
    }

    pub fn config(&self) -> &LocationConfig {
        &self.config
    }

    /// Replace the parameters used by later invocations.
    pub fn set_config(&mut self, config: LocationConfig) {
        self.config = config;
    }

    /// Detect significant locations for `subject_id` in `[start, end)`.
    ///
    /// Results are ordered by rank, starting at 0.
    pub fn significant_locations(
        &self,
        subject_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Location>> {
        self.config.validate()?;
        if start > end {
            return Err(LocationError::InvalidWindow { start, end });
        }

        info!(
            "[LocationEngine] {:?} for {} in [{}, {})",
            self.config.method, subject_id, start, end
        );

        let locations = match self.config.method {
            ExtractionMethod::Frequency => {
                frequency::extract_locations(&self.gps, subject_id, start, end, &self.config)?
            }
            ExtractionMethod::DensityPartition => with_subject_lock(subject_id, || {
                let state = self.refresh_reduction(subject_id, end)?;
                density::extract_locations(&self.gps, subject_id, start, end, &state, &self.config)
            })?,
        };

        info!(
            "[LocationEngine] {} locations for {}",
            locations.len(),
            subject_id
        );
        Ok(locations)
    }

    /// Bring the subject's reduction state up to `end` and persist it if it
    /// changed.
    ///
    /// Callers must hold the subject's lock.
    fn refresh_reduction(&self, subject_id: &str, end: i64) -> Result<ReductionState> {
        let stored = self.attachments.get(subject_id, REDUCED_ATTACHMENT_KEY)?;
        let previous = ReductionState::from_attachment(stored)?;

        let params = ReductionParams::from(&self.config);
        let state = reduce(&self.gps, subject_id, end, &previous, &params)?;

        if state != previous {
            self.attachments
                .set(subject_id, REDUCED_ATTACHMENT_KEY, &state.to_attachment()?)?;
            debug!(
                "[LocationEngine] Stored reduction state for {} (watermark {} -> {})",
                subject_id, previous.watermark, state.watermark
            );
        }
        Ok(state)
    }

    /// Load the persisted reduction state for `subject_id` without updating it.
    pub fn reduction_state(&self, subject_id: &str) -> Result<ReductionState> {
        ReductionState::from_attachment(self.attachments.get(subject_id, REDUCED_ATTACHMENT_KEY)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
