//! Least ongoing connections selection, round robin among ties.

/// Selector state: the position the next scan starts from.
///
/// Candidates are scanned starting at the cursor and the first one with the
/// strictly smallest load wins, so backends with equal load are handed out
/// in rotation. The cursor moves past every pick.
#[derive(Debug, Default)]
pub struct LeastOngoing {
    cursor: usize,
}

impl LeastOngoing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick an index among `len` candidates.
    ///
    /// `load(i)` returns the ongoing count of candidate `i`, or `None` if it
    /// is not eligible.
    pub fn select<F>(&mut self, len: usize, load: F) -> Option<usize>
    where
        F: Fn(usize) -> Option<usize>,
    {
        if len == 0 {
            return None;
        }

        let start = self.cursor % len;
        let mut best: Option<(usize, usize)> = None;
        for offset in 0..len {
            let index = (start + offset) % len;
            if let Some(ongoing) = load(index) {
                if best.map_or(true, |(_, min)| ongoing < min) {
                    best = Some((index, ongoing));
                }
            }
        }

        let (index, _) = best?;
        self.cursor = (index + 1) % len;
        Some(index)
    }
}
