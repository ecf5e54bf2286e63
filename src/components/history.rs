use image::RgbaImage;
use std::collections::VecDeque;
use std::sync::Arc;

// ============================================================================
// MASK SNAPSHOT
// ============================================================================

/// One captured state of the mask raster, at the display resolution it was
/// painted at. Cloning shares the pixels; a snapshot is never written to
/// after it has been captured.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskSnapshot {
    pixels: Arc<RgbaImage>,
}

impl MaskSnapshot {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// Fully transparent snapshot of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(RgbaImage::new(width, height))
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// True when both handles point at the same captured raster.
    pub fn same_capture(&self, other: &MaskSnapshot) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    pub fn memory_size(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

// ============================================================================
// MASK HISTORY - linear undo over full-surface snapshots
// ============================================================================

/// Ordered snapshots plus a cursor. Whenever the history is non-empty the
/// cursor is a valid index; pushing always discards whatever lies beyond it.
pub struct MaskHistory {
    entries: VecDeque<MaskSnapshot>,
    cursor: usize,
    /// `None` = bounded only by memory.
    max_entries: Option<usize>,
}

impl Default for MaskHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

impl MaskHistory {
    /// `max_entries == 0` disables the cap.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            // A cap below two would make every stroke un-undoable.
            max_entries: (max_entries > 0).then(|| max_entries.max(2)),
        }
    }

    pub fn push(&mut self, snapshot: MaskSnapshot) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push_back(snapshot);
        self.cursor = self.entries.len() - 1;
        self.prune();
    }

    /// Step back one snapshot. Returns the snapshot now under the cursor,
    /// or `None` when already at the oldest entry.
    pub fn undo(&mut self) -> Option<&MaskSnapshot> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor)
    }

    pub fn current(&self) -> Option<&MaskSnapshot> {
        self.entries.get(self.cursor)
    }

    /// Clear the mask as an undoable step: `blank` becomes the new head and
    /// the snapshot it replaces stays one undo away.
    pub fn reset(&mut self, blank: MaskSnapshot) {
        self.push(blank);
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the current snapshot, `None` while empty.
    pub fn cursor(&self) -> Option<usize> {
        (!self.entries.is_empty()).then_some(self.cursor)
    }

    pub fn memory_usage(&self) -> usize {
        self.entries.iter().map(MaskSnapshot::memory_size).sum()
    }

    fn prune(&mut self) {
        let Some(max) = self.max_entries else { return };
        while self.entries.len() > max {
            self.entries.pop_front();
            self.cursor = self.cursor.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn inked(width: u32, height: u32, x: u32, y: u32) -> MaskSnapshot {
        let mut img = RgbaImage::new(width, height);
        img.put_pixel(x, y, Rgba([255, 0, 0, 128]));
        MaskSnapshot::new(img)
    }

    fn seeded(max: usize) -> (MaskHistory, MaskSnapshot) {
        let mut history = MaskHistory::new(max);
        let blank = MaskSnapshot::blank(8, 8);
        history.push(blank.clone());
        (history, blank)
    }

    #[test]
    fn empty_history_has_no_current() {
        let mut history = MaskHistory::new(10);
        assert!(history.current().is_none());
        assert!(history.cursor().is_none());
        assert!(history.undo().is_none());
    }

    #[test]
    fn n_undos_return_to_the_blank_snapshot() {
        let (mut history, blank) = seeded(0);
        for i in 0..5 {
            history.push(inked(8, 8, i, i));
        }
        assert_eq!(history.cursor(), Some(5));

        for _ in 0..5 {
            assert!(history.undo().is_some());
        }
        assert!(history.current().unwrap().same_capture(&blank));

        // Extra undos stay put at index 0.
        assert!(history.undo().is_none());
        assert!(history.undo().is_none());
        assert_eq!(history.cursor(), Some(0));
    }

    #[test]
    fn push_after_undo_discards_redo_tail() {
        let (mut history, _) = seeded(0);
        let first = inked(8, 8, 1, 1);
        history.push(first.clone());
        history.push(inked(8, 8, 2, 2));
        history.push(inked(8, 8, 3, 3));

        history.undo();
        history.undo();
        let replacement = inked(8, 8, 4, 4);
        history.push(replacement.clone());

        assert_eq!(history.len(), 3);
        assert_eq!(history.cursor(), Some(2));
        assert!(history.current().unwrap().same_capture(&replacement));
        history.undo();
        assert!(history.current().unwrap().same_capture(&first));
    }

    #[test]
    fn clear_is_undoable() {
        let (mut history, _) = seeded(0);
        let drawn = inked(8, 8, 3, 3);
        history.push(drawn.clone());

        history.reset(MaskSnapshot::blank(8, 8));
        assert_eq!(history.current().unwrap().pixels().get_pixel(3, 3)[3], 0);

        let restored = history.undo().unwrap();
        assert!(restored.same_capture(&drawn));
    }

    #[test]
    fn cap_prunes_oldest_and_keeps_cursor_valid() {
        let (mut history, blank) = seeded(3);
        let pushed: Vec<MaskSnapshot> = (0..6).map(|i| inked(8, 8, i, 0)).collect();
        for snapshot in &pushed {
            history.push(snapshot.clone());
        }
        let last = &pushed[5];
        assert_eq!(history.len(), 3);
        assert_eq!(history.cursor(), Some(2));
        assert!(history.current().unwrap().same_capture(last));

        history.undo();
        history.undo();
        assert!(!history.can_undo());
        assert!(history.current().unwrap().same_capture(&pushed[3]));
        assert!(!history.current().unwrap().same_capture(&blank));
    }

    #[test]
    fn memory_usage_counts_every_entry() {
        let (mut history, _) = seeded(0);
        history.push(inked(8, 8, 0, 0));
        assert_eq!(history.memory_usage(), 2 * 8 * 8 * 4);
    }
}
