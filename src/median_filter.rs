//! Median Smoother — running median over the envelope stream
//!
//! Odd-window running median for suppressing impulse noise on the AM
//! envelope ahead of threshold detection. The history starts zero-filled,
//! so early outputs are medians over a zero-padded window; edges pass with
//! a symmetric group delay that cancels across a pulse. A reusable scratch
//! buffer keeps the per-sample path allocation-free.
//!
//! ## Example
//!
//! ```rust
//! use keyburst::median_filter::MedianFilter;
//!
//! let mut filter = MedianFilter::new(3);
//! // A lone spike never makes it past the window.
//! let out = filter.process(&[0, 0, 30_000, 0, 0]);
//! assert_eq!(out, vec![0, 0, 0, 0, 0]);
//! ```

/// Running median filter over 16-bit samples.
#[derive(Debug, Clone)]
pub struct MedianFilter {
    window: Vec<i16>,
    scratch: Vec<i16>,
    pos: usize,
}

impl MedianFilter {
    /// Create a filter with the given window size.
    ///
    /// The window is rounded up to the next odd value and is at least 1.
    pub fn new(window_size: usize) -> Self {
        let size = window_size.max(1) | 1;
        Self {
            window: vec![0; size],
            scratch: vec![0; size],
            pos: 0,
        }
    }

    /// Window size in samples.
    pub fn window_size(&self) -> usize {
        self.window.len()
    }

    /// Push one sample and return the median of the current window.
    pub fn process_sample(&mut self, sample: i16) -> i16 {
        self.window[self.pos] = sample;
        self.pos = (self.pos + 1) % self.window.len();

        self.scratch.copy_from_slice(&self.window);
        self.scratch.sort_unstable();
        self.scratch[self.window.len() / 2]
    }

    /// Process a block of samples.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        input.iter().map(|&x| self.process_sample(x)).collect()
    }

    /// Reset the history to zero.
    pub fn reset(&mut self) {
        self.window.fill(0);
        self.pos = 0;
    }
}
