//! Ephemeral multi-user presence: who is in the document and where their
//! cursor was last seen.
//!
//! ```text
//! USER_JOIN ──▶ roster entry (colour assigned)
//! CURSOR_MOVE ─▶ indicator moved, expiry = now + ttl
//! sweep(now) ──▶ expired indicators removed
//! USER_LEAVE ─▶ roster entry + indicator removed
//! ```
//!
//! Nothing here is persisted or authoritative.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::CursorRange;

/// Colours handed to collaborators in order of first appearance.
pub const DEFAULT_PALETTE: &[&str] = &[
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
];

// ───────────────────────────────────────────────────────────────────
// Colour assignment
// ───────────────────────────────────────────────────────────────────

/// Stable per-user colour assignment over a fixed palette.
///
/// Once every slot is taken assignment wraps around and colours repeat.
#[derive(Debug, Clone)]
pub struct ColorPalette {
    colors: &'static [&'static str],
    assigned: HashMap<String, usize>,
    next: usize,
}

impl ColorPalette {
    /// Palette over `colors`. Panics if `colors` is empty.
    pub fn new(colors: &'static [&'static str]) -> Self {
        assert!(!colors.is_empty(), "palette needs at least one colour");
        Self {
            colors,
            assigned: HashMap::new(),
            next: 0,
        }
    }

    /// Colour for `user_id`, assigning the next slot on first sight.
    pub fn color_for(&mut self, user_id: &str) -> &'static str {
        let slot = match self.assigned.get(user_id) {
            Some(slot) => *slot,
            None => {
                let slot = self.next % self.colors.len();
                self.next += 1;
                self.assigned.insert(user_id.to_string(), slot);
                slot
            }
        };
        self.colors[slot]
    }

    /// Number of distinct colours.
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    /// Always `false` for a constructed palette.
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

impl Default for ColorPalette {
    fn default() -> Self {
        Self::new(DEFAULT_PALETTE)
    }
}

// ───────────────────────────────────────────────────────────────────
// Collaborators
// ───────────────────────────────────────────────────────────────────

/// Visual cursor marker with a fixed time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorIndicator {
    pub range: CursorRange,
    pub expires_at: Instant,
}

/// A remote participant as seen by this client.
#[derive(Debug, Clone)]
pub struct Collaborator {
    pub user_id: String,
    pub display_name: String,
    pub color: &'static str,
    pub last_known_cursor: Option<CursorRange>,
    /// Announced through `USER_JOIN` rather than inferred from a cursor.
    pub joined: bool,
    indicator: Option<CursorIndicator>,
}

impl Collaborator {
    fn new(user_id: &str, display_name: &str, color: &'static str, joined: bool) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            color,
            last_known_cursor: None,
            joined,
            indicator: None,
        }
    }

    /// Live cursor indicator, if one has not decayed.
    pub fn indicator(&self) -> Option<&CursorIndicator> {
        self.indicator.as_ref()
    }
}

/// Render data for one live remote cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorView {
    pub user_id: String,
    pub display_name: String,
    pub color: &'static str,
    pub range: CursorRange,
}

// ───────────────────────────────────────────────────────────────────
// Tracker
// ───────────────────────────────────────────────────────────────────

/// Roster plus cursor indicators for every remote participant.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    palette: ColorPalette,
    collaborators: HashMap<String, Collaborator>,
    cursor_ttl: Duration,
}

impl PresenceTracker {
    /// Empty tracker using [`DEFAULT_PALETTE`].
    pub fn new(cursor_ttl: Duration) -> Self {
        Self::with_palette(cursor_ttl, ColorPalette::default())
    }

    /// Empty tracker assigning colours from `palette`.
    pub fn with_palette(cursor_ttl: Duration, palette: ColorPalette) -> Self {
        Self {
            palette,
            collaborators: HashMap::new(),
            cursor_ttl,
        }
    }

    /// Add a participant to the roster. Returns `true` if they were new.
    ///
    /// A repeated join only refreshes the display name.
    pub fn join(&mut self, user_id: &str, display_name: &str) -> bool {
        if let Some(existing) = self.collaborators.get_mut(user_id) {
            existing.display_name = display_name.to_string();
            existing.joined = true;
            return false;
        }
        let color = self.palette.color_for(user_id);
        self.collaborators.insert(
            user_id.to_string(),
            Collaborator::new(user_id, display_name, color, true),
        );
        true
    }

    /// Remove a participant and their indicator.
    pub fn leave(&mut self, user_id: &str) -> Option<Collaborator> {
        self.collaborators.remove(user_id)
    }

    /// Move (or create) a participant's indicator and re-arm its expiry.
    ///
    /// Returns `true` when the participant was not known before.
    pub fn move_cursor(
        &mut self,
        user_id: &str,
        display_name: &str,
        range: CursorRange,
        now: Instant,
    ) -> bool {
        let created = !self.collaborators.contains_key(user_id);
        if created {
            let color = self.palette.color_for(user_id);
            self.collaborators.insert(
                user_id.to_string(),
                Collaborator::new(user_id, display_name, color, false),
            );
        }
        if let Some(collaborator) = self.collaborators.get_mut(user_id) {
            collaborator.last_known_cursor = Some(range);
            collaborator.indicator = Some(CursorIndicator {
                range,
                expires_at: now + self.cursor_ttl,
            });
        }
        created
    }

    /// Remove indicators whose time-to-live has elapsed.
    ///
    /// Participants that were only ever seen through their cursor leave the
    /// roster with it. Returns the affected user ids.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        for collaborator in self.collaborators.values_mut() {
            if let Some(indicator) = collaborator.indicator {
                if indicator.expires_at <= now {
                    collaborator.indicator = None;
                    expired.push(collaborator.user_id.clone());
                }
            }
        }
        self.collaborators
            .retain(|_, c| c.joined || c.indicator.is_some());
        expired
    }

    /// Earliest pending indicator expiry.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.collaborators
            .values()
            .filter_map(|c| c.indicator.map(|i| i.expires_at))
            .min()
    }

    /// Roster entry for `user_id`.
    pub fn collaborator(&self, user_id: &str) -> Option<&Collaborator> {
        self.collaborators.get(user_id)
    }

    /// Whether `user_id` currently shows a cursor.
    pub fn has_indicator(&self, user_id: &str) -> bool {
        self.collaborators
            .get(user_id)
            .is_some_and(|c| c.indicator.is_some())
    }

    /// Number of known participants.
    pub fn len(&self) -> usize {
        self.collaborators.len()
    }

    /// Whether nobody else is known.
    pub fn is_empty(&self) -> bool {
        self.collaborators.is_empty()
    }

    /// Display names, sorted for stable rendering.
    pub fn roster(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collaborators
            .values()
            .map(|c| c.display_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Live indicators, sorted by user id.
    pub fn cursors(&self) -> Vec<CursorView> {
        let mut cursors: Vec<CursorView> = self
            .collaborators
            .values()
            .filter_map(|c| {
                c.indicator.map(|indicator| CursorView {
                    user_id: c.user_id.clone(),
                    display_name: c.display_name.clone(),
                    color: c.color,
                    range: indicator.range,
                })
            })
            .collect();
        cursors.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        cursors
    }

    /// Forget everyone. Colour assignments are kept.
    pub fn clear(&mut self) {
        self.collaborators.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(5);

    // ── Palette ──────────────────────────────────────────────────

    #[test]
    fn test_palette_stable_per_user() {
        let mut palette = ColorPalette::default();
        let first = palette.color_for("alice");
        palette.color_for("bob");
        assert_eq!(palette.color_for("alice"), first);
    }

    #[test]
    fn test_palette_distinct_until_exhausted() {
        let mut palette = ColorPalette::default();
        let colors: Vec<&str> = (0..DEFAULT_PALETTE.len())
            .map(|i| palette.color_for(&format!("user-{i}")))
            .collect();
        let mut unique = colors.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), DEFAULT_PALETTE.len());
    }

    #[test]
    fn test_palette_wraps_around() {
        static TWO: &[&str] = &["#000", "#fff"];
        let mut palette = ColorPalette::new(TWO);
        assert_eq!(palette.color_for("a"), "#000");
        assert_eq!(palette.color_for("b"), "#fff");
        assert_eq!(palette.color_for("c"), "#000");
    }

    // ── Roster ───────────────────────────────────────────────────

    #[test]
    fn test_join_and_leave() {
        let mut tracker = PresenceTracker::new(TTL);
        assert!(tracker.join("u1", "Ada"));
        assert!(!tracker.join("u1", "Ada L."));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.collaborator("u1").unwrap().display_name, "Ada L.");

        assert!(tracker.leave("u1").is_some());
        assert!(tracker.is_empty());
        assert!(tracker.leave("u1").is_none());
    }

    #[test]
    fn test_color_survives_rejoin() {
        let mut tracker = PresenceTracker::new(TTL);
        tracker.join("u1", "Ada");
        tracker.join("u2", "Bo");
        let color = tracker.collaborator("u1").unwrap().color;
        tracker.leave("u1");
        tracker.join("u1", "Ada");
        assert_eq!(tracker.collaborator("u1").unwrap().color, color);
    }

    #[test]
    fn test_roster_sorted() {
        let mut tracker = PresenceTracker::new(TTL);
        tracker.join("u2", "Zed");
        tracker.join("u1", "Ada");
        assert_eq!(tracker.roster(), vec!["Ada".to_string(), "Zed".to_string()]);
    }

    // ── Cursors ──────────────────────────────────────────────────

    #[test]
    fn test_cursor_from_unknown_user_creates_entry() {
        let mut tracker = PresenceTracker::new(TTL);
        let now = Instant::now();
        assert!(tracker.move_cursor("u9", "Cy", CursorRange::new(3, 2), now));
        let collaborator = tracker.collaborator("u9").unwrap();
        assert!(!collaborator.joined);
        assert_eq!(collaborator.last_known_cursor, Some(CursorRange::new(3, 2)));
        assert!(tracker.has_indicator("u9"));
    }

    #[test]
    fn test_cursor_decay() {
        let mut tracker = PresenceTracker::new(TTL);
        let start = Instant::now();
        tracker.join("u1", "Ada");
        tracker.move_cursor("u1", "Ada", CursorRange::caret(4), start);
        assert_eq!(tracker.next_expiry(), Some(start + TTL));

        assert!(tracker.sweep(start + Duration::from_secs(4)).is_empty());
        assert!(tracker.has_indicator("u1"));

        assert_eq!(tracker.sweep(start + TTL), vec!["u1".to_string()]);
        assert!(!tracker.has_indicator("u1"));
        // Joined users stay on the roster.
        assert!(tracker.collaborator("u1").is_some());
        assert!(tracker.next_expiry().is_none());
    }

    #[test]
    fn test_fresh_move_rearms_decay() {
        let mut tracker = PresenceTracker::new(TTL);
        let start = Instant::now();
        tracker.move_cursor("u1", "Ada", CursorRange::caret(1), start);
        tracker.move_cursor("u1", "Ada", CursorRange::caret(1), start + Duration::from_secs(3));
        assert!(tracker.sweep(start + Duration::from_secs(6)).is_empty());
        assert_eq!(tracker.sweep(start + Duration::from_secs(8)).len(), 1);
    }

    #[test]
    fn test_implicit_collaborator_removed_on_decay() {
        let mut tracker = PresenceTracker::new(TTL);
        let start = Instant::now();
        tracker.move_cursor("ghost", "Ghost", CursorRange::caret(0), start);
        tracker.sweep(start + TTL);
        assert!(tracker.collaborator("ghost").is_none());
    }

    #[test]
    fn test_cursors_view() {
        let mut tracker = PresenceTracker::new(TTL);
        let now = Instant::now();
        tracker.join("u1", "Ada");
        tracker.move_cursor("u2", "Bo", CursorRange::new(1, 1), now);
        let cursors = tracker.cursors();
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[0].user_id, "u2");
        assert_eq!(cursors[0].range, CursorRange::new(1, 1));
    }
}
