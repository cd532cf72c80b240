//! Host-side SD card state
//!
//! Tracks card availability, the listing accumulated between
//! `Begin file list` and `End file list`, and the selected print target.

use printkit_core::SdFile;

/// SD card state as observed from firmware replies
#[derive(Debug, Default)]
pub struct SdCardState {
    ready: bool,
    files: Vec<SdFile>,
    listing: Option<Vec<SdFile>>,
    selected: Option<(String, Option<u64>)>,
}

impl SdCardState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the card is initialized
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Record a card status change; returns `true` when it changed
    pub fn set_ready(&mut self, ready: bool) -> bool {
        let changed = self.ready != ready;
        self.ready = ready;
        if !ready {
            self.selected = None;
            self.files.clear();
        }
        changed
    }

    /// The last completed listing
    pub fn files(&self) -> &[SdFile] {
        &self.files
    }

    /// Start accumulating a fresh listing (`Begin file list`)
    pub fn begin_listing(&mut self) {
        self.listing = Some(Vec::new());
    }

    /// Whether a listing is currently accumulating
    pub fn listing_in_progress(&self) -> bool {
        self.listing.is_some()
    }

    /// Add one entry to the accumulating listing
    pub fn add_entry(&mut self, entry: SdFile) {
        if let Some(listing) = &mut self.listing {
            listing.push(entry);
        }
    }

    /// Finish the listing (`End file list`); returns the fresh list
    pub fn end_listing(&mut self) -> Vec<SdFile> {
        let files = self.listing.take().unwrap_or_default();
        self.files = files.clone();
        files
    }

    /// Record the firmware's file-selection confirmation
    pub fn set_selected(&mut self, name: impl Into<String>, size: Option<u64>) {
        self.selected = Some((name.into(), size));
    }

    /// The selected file, if any
    pub fn selected(&self) -> Option<(&str, Option<u64>)> {
        self.selected
            .as_ref()
            .map(|(name, size)| (name.as_str(), *size))
    }

    /// Whether `name` is the currently selected print target
    pub fn is_selected(&self, name: &str) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|(selected, _)| selected.eq_ignore_ascii_case(name))
    }

    /// Drop the selection (cancel, release)
    pub fn clear_selection(&mut self) {
        self.selected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_accumulation() {
        let mut state = SdCardState::new();
        state.begin_listing();
        assert!(state.listing_in_progress());
        state.add_entry(SdFile::new("A.GCO"));
        state.add_entry(SdFile::new("B.GCO"));
        let files = state.end_listing();
        assert_eq!(files.len(), 2);
        assert_eq!(state.files().len(), 2);
        assert!(!state.listing_in_progress());
    }

    #[test]
    fn test_entries_outside_listing_dropped() {
        let mut state = SdCardState::new();
        state.add_entry(SdFile::new("STRAY.GCO"));
        assert!(state.files().is_empty());
    }

    #[test]
    fn test_selection_case_insensitive() {
        let mut state = SdCardState::new();
        state.set_selected("FOO.GCO", Some(1024));
        assert!(state.is_selected("foo.gco"));
        assert!(!state.is_selected("bar.gco"));
    }

    #[test]
    fn test_release_clears_state() {
        let mut state = SdCardState::new();
        state.set_ready(true);
        state.set_selected("FOO.GCO", None);
        assert!(state.set_ready(false));
        assert!(state.selected().is_none());
    }
}
