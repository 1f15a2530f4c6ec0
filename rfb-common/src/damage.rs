//! Dirty-rectangle accumulation for one framebuffer update.
//!
//! Decoders report every rectangle they touch. Before the update is handed to
//! the presentation side the list is coalesced: rectangles that overlap, abut,
//! or are contained in another are merged when the merged box wastes no more
//! area than the two parts cover. Past [`MAX_RECTS`] entries the tracker
//! collapses everything into a single bounding box.

use crate::Rect;

/// Upper bound on distinct rectangles kept before collapsing to a bounding box.
pub const MAX_RECTS: usize = 64;

#[derive(Debug, Default, Clone)]
pub struct DamageTracker {
    rects: Vec<Rect>,
}

impl DamageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dirty rectangle. Empty rectangles are ignored.
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut pending = rect;
        // Merging can enable further merges, so keep folding until stable.
        loop {
            let hit = self
                .rects
                .iter()
                .position(|existing| Self::should_merge(existing, &pending));
            match hit {
                Some(idx) => {
                    let existing = self.rects.swap_remove(idx);
                    pending = existing.union(&pending);
                }
                None => break,
            }
        }
        self.rects.push(pending);

        if self.rects.len() > MAX_RECTS {
            let bounds = self.bounding_box();
            self.rects.clear();
            self.rects.push(bounds);
        }
    }

    fn should_merge(a: &Rect, b: &Rect) -> bool {
        if a.contains_rect(b) || b.contains_rect(a) {
            return true;
        }
        if !a.touches(b) {
            return false;
        }
        a.union(b).area() <= a.area() + b.area()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Smallest rectangle covering all recorded damage.
    pub fn bounding_box(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::default(), |acc, r| acc.union(r))
    }

    /// Drain the coalesced list, leaving the tracker empty for the next update.
    pub fn take(&mut self) -> Vec<Rect> {
        std::mem::take(&mut self.rects)
    }

    /// Repaint rectangles for a display scaled by `percent`.
    pub fn scaled(&self, percent: u32) -> Vec<Rect> {
        self.rects.iter().map(|r| r.scaled(percent)).collect()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }
}
