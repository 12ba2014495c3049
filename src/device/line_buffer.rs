//! Line buffer bank.
//!
//! Three rotating row buffers hold the most recent three image rows, all
//! channels interleaved, so every 3x3 window is assembled on chip. Each
//! input pixel crosses the input port once and is reused by up to three
//! window rows.
//!
//! ```text
//!             slot 0        slot 1        slot 2
//!           ┌─────────┐   ┌─────────┐   ┌─────────┐
//!  oldest ─►│ row y   │   │ row y+1 │   │ row y+2 │◄─ newest
//!           └─────────┘   └─────────┘   └─────────┘
//!  enqueue(row y+3): slot 0 is overwritten, oldest -> slot 1
//! ```
//!
//! Eviction rotates an index; it never shifts rows.
//!
//! # Window Convention
//!
//! `window_at(col, channel)` is top-left aligned: window row 0 is the oldest
//! buffered row and window column 0 is image column `col`. Output pixel
//! `(y, x)` reads `window_at(x, c)` while rows `y..y+3` are buffered. There
//! is no padding: a window needs three buffered rows and `col + 3 <= width`.
//!
//! # Eviction Ordering
//!
//! A [`Window`] borrows the bank, and eviction needs `&mut self`, so a row
//! cannot be overwritten while a window that reads it is alive:
//!
//! ```compile_fail
//! use conv3_emu::device::LineBufferBank;
//! use conv3_emu::Fixed16;
//!
//! let mut bank = LineBufferBank::new(8, 1);
//! let row = [Fixed16::ONE; 4];
//! for _ in 0..3 {
//!     bank.enqueue_row(&row).unwrap();
//! }
//! let window = bank.window_at(0, 0).unwrap();
//! bank.enqueue_row(&row).unwrap(); // evicts a row the window still reads
//! let _ = window.sample(0, 0);
//! ```

use crate::device::params::{KERNEL_SIZE, LINE_BUFFER_ROWS};
use crate::error::{CapacityError, Result, StateError};
use crate::fixed::Fixed16;

/// Three-row line buffer bank.
#[derive(Debug, Clone)]
pub struct LineBufferBank {
    max_width: usize,
    max_channels: usize,
    slots: [Vec<Fixed16>; LINE_BUFFER_ROWS],
    oldest: usize,
    buffered: usize,
    width: Option<usize>,
    channels: usize,
    rows_enqueued: u64,
    evictions: u64,
}

impl LineBufferBank {
    /// Create a bank sized for `max_width` pixels of `max_channels` channels.
    pub fn new(max_width: usize, max_channels: usize) -> Self {
        let capacity = max_width * max_channels;
        Self {
            max_width,
            max_channels,
            slots: std::array::from_fn(|_| Vec::with_capacity(capacity)),
            oldest: 0,
            buffered: 0,
            width: None,
            channels: 1,
            rows_enqueued: 0,
            evictions: 0,
        }
    }

    /// Empty the bank and fix the geometry of the rows that follow.
    pub fn begin_image(&mut self, width: usize, channels: usize) -> Result<()> {
        if width > self.max_width {
            return Err(CapacityError::RowTooWide { width, max: self.max_width }.into());
        }
        if channels > self.max_channels {
            return Err(CapacityError::TooManyInputChannels {
                channels,
                max: self.max_channels,
            }
            .into());
        }
        if channels == 0 {
            return Err(CapacityError::ShapeMismatch { what: "channels", expected: 1, got: 0 }.into());
        }

        self.reset();
        self.width = Some(width);
        self.channels = channels;
        Ok(())
    }

    /// Drop all buffered rows.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.oldest = 0;
        self.buffered = 0;
    }

    /// Push a row (channel-interleaved), evicting the oldest once full.
    ///
    /// Rejected rows leave the bank unchanged.
    pub fn enqueue_row(&mut self, row: &[Fixed16]) -> Result<()> {
        let channels = self.channels;
        if row.len() % channels != 0 {
            return Err(CapacityError::RaggedRow { len: row.len(), channels }.into());
        }
        let width = row.len() / channels;
        if width > self.max_width {
            return Err(CapacityError::RowTooWide { width, max: self.max_width }.into());
        }
        match self.width {
            Some(expected) if expected != width => {
                return Err(CapacityError::ShapeMismatch {
                    what: "row",
                    expected: expected * channels,
                    got: row.len(),
                }
                .into());
            }
            Some(_) => {}
            None => self.width = Some(width),
        }

        let slot = if self.buffered < LINE_BUFFER_ROWS {
            let slot = (self.oldest + self.buffered) % LINE_BUFFER_ROWS;
            self.buffered += 1;
            slot
        } else {
            let slot = self.oldest;
            self.oldest = (self.oldest + 1) % LINE_BUFFER_ROWS;
            self.evictions += 1;
            slot
        };

        self.slots[slot].clear();
        self.slots[slot].extend_from_slice(row);
        self.rows_enqueued += 1;
        Ok(())
    }

    /// The 3x3 window with top-left corner at (oldest row, `col`) for `channel`.
    pub fn window_at(&self, col: usize, channel: usize) -> Result<Window<'_>> {
        if self.buffered < LINE_BUFFER_ROWS {
            return Err(StateError::NotPrimed { rows_buffered: self.buffered }.into());
        }
        let width = self.width.unwrap_or(0);
        if col + KERNEL_SIZE > width || channel >= self.channels {
            return Err(StateError::WindowOutOfRange {
                col,
                channel,
                width,
                channels: self.channels,
            }
            .into());
        }

        let rows = std::array::from_fn(|i| self.slots[(self.oldest + i) % LINE_BUFFER_ROWS].as_slice());
        Ok(Window {
            rows,
            col,
            channel,
            channels: self.channels,
        })
    }

    /// Rows currently held (0..=3).
    pub fn rows_buffered(&self) -> usize {
        self.buffered
    }

    /// True once a window can be read.
    pub fn is_primed(&self) -> bool {
        self.buffered == LINE_BUFFER_ROWS
    }

    /// Row width in pixels, once known.
    pub fn width(&self) -> Option<usize> {
        self.width
    }

    /// Channels per pixel.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Rows accepted since creation.
    pub fn rows_enqueued(&self) -> u64 {
        self.rows_enqueued
    }

    /// Rows evicted since creation.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

/// A 3x3 neighbourhood of one channel, read in place from the bank.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    rows: [&'a [Fixed16]; KERNEL_SIZE],
    col: usize,
    channel: usize,
    channels: usize,
}

impl Window<'_> {
    /// Sample at kernel position (`row`, `col`).
    #[inline]
    pub fn sample(&self, row: usize, col: usize) -> Fixed16 {
        self.rows[row][(self.col + col) * self.channels + self.channel]
    }

    /// Copy out as a 3x3 array.
    pub fn to_array(&self) -> [[Fixed16; KERNEL_SIZE]; KERNEL_SIZE] {
        std::array::from_fn(|r| std::array::from_fn(|c| self.sample(r, c)))
    }
}
