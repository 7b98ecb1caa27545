//! Frame detection over the byte ring.
//!
//! The detector scans for telegrams delimited by configured start/end bytes.
//! Several delimiter specs coexist so ASCII (`/` .. `!` + newline), HDLC
//! (`0x7E` .. `0x7E`) and M-Bus (`0x68` .. `0x16`) frames can arrive on the
//! same port. Detection is incremental: a partial frame stays in progress
//! across calls until its end byte arrives or the inter-frame timeout
//! invalidates it.

use crate::ring::ByteRing;

/// Wire format of a detected frame. Closed set; decoders are selected by a
/// `match` on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Ascii,
    Hdlc,
    MBus,
    Unknown,
}

/// Configuration for one frame delimiter pair.
#[derive(Debug, Clone, Copy)]
pub struct DelimiterSpec {
    /// Byte marking the start of the frame.
    pub start: u8,
    /// Byte marking the end of the frame.
    pub end: u8,
    pub format: FrameFormat,
    /// If true the frame ends at the first newline after the end byte
    /// (the ASCII checksum line carries trailing CRC characters).
    pub line_based: bool,
}

impl DelimiterSpec {
    /// The default spec set for a P1 diagnostic port: ASCII, HDLC, M-Bus.
    pub fn defaults() -> Vec<DelimiterSpec> {
        vec![
            DelimiterSpec {
                start: b'/',
                end: b'!',
                format: FrameFormat::Ascii,
                line_based: true,
            },
            DelimiterSpec {
                start: 0x7E,
                end: 0x7E,
                format: FrameFormat::Hdlc,
                line_based: false,
            },
            DelimiterSpec {
                start: 0x68,
                end: 0x16,
                format: FrameFormat::MBus,
                line_based: false,
            },
        ]
    }
}

/// Descriptor for one complete frame found in the ring.
///
/// Offsets are absolute ring positions; the descriptor is valid until the
/// next append overwrites the region.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// Absolute ring position of the start byte.
    pub start: usize,
    /// Absolute ring position of the last byte (end delimiter, or the
    /// newline for line-based frames).
    pub end: usize,
    /// Total size including delimiters (and trailing newline if line-based).
    pub size: usize,
    pub complete: bool,
    pub format: FrameFormat,
}

/// Zero-copy view of a frame's bytes through the ring.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    ring: &'a ByteRing,
    start: usize,
    size: usize,
}

impl<'a> FrameView<'a> {
    pub fn new(ring: &'a ByteRing, info: &FrameInfo) -> Self {
        FrameView {
            ring,
            start: info.start,
            size: info.size,
        }
    }

    /// Byte at frame-relative index `i`; 0 when out of bounds.
    pub fn byte(&self, i: usize) -> u8 {
        if i >= self.size {
            return 0;
        }
        self.ring.byte_at((self.start + i) % self.ring.capacity())
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Copy the frame bytes out. Diagnostics only; the decode path never
    /// needs a contiguous copy.
    pub fn to_vec(&self) -> Vec<u8> {
        (0..self.size).map(|i| self.byte(i)).collect()
    }
}

/// Incremental multi-format frame detector.
#[derive(Debug)]
pub struct FrameDetector {
    specs: Vec<DelimiterSpec>,
    timeout_ms: u64,
    in_progress: bool,
    start_index: usize,
    active: Option<usize>,
    frame_count: u32,
}

impl FrameDetector {
    /// Create a detector for the given ordered delimiter specs and
    /// inter-frame timeout in milliseconds (0 disables the timeout).
    pub fn new(specs: Vec<DelimiterSpec>, timeout_ms: u64) -> Self {
        FrameDetector {
            specs,
            timeout_ms,
            in_progress: false,
            start_index: 0,
            active: None,
            frame_count: 0,
        }
    }

    /// Drop any in-progress frame state.
    pub fn reset(&mut self) {
        self.in_progress = false;
        self.start_index = 0;
        self.active = None;
    }

    /// Number of complete frames detected over the detector's lifetime.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Scan the ring for the next complete frame.
    ///
    /// On success the descriptor is returned and the ring's read cursor has
    /// been advanced past the frame. Garbage bytes before a start delimiter
    /// are consumed silently.
    pub fn detect(&mut self, ring: &mut ByteRing, now_ms: u64) -> Option<FrameInfo> {
        // A stalled frame is invalid: the meter bursts a telegram in one go.
        if self.in_progress
            && self.timeout_ms > 0
            && now_ms.saturating_sub(ring.last_byte_at()) > self.timeout_ms
        {
            ring.advance_read(1); // skip the stale start byte
            self.reset();
        }

        if !self.in_progress && !self.find_frame_start(ring) {
            return None;
        }

        // Ring overflow may have evicted the start byte from under us.
        if let Some(active) = self.active {
            if ring.available() == 0 || ring.byte(0) != self.specs[active].start {
                self.reset();
                return None;
            }
        }

        self.extract_complete_frame(ring)
    }

    /// Advance past garbage to the next configured start delimiter.
    fn find_frame_start(&mut self, ring: &mut ByteRing) -> bool {
        if ring.available() == 0 || self.specs.is_empty() {
            return false;
        }

        for i in 0..ring.available() {
            let current = ring.byte(i);
            for (spec_idx, spec) in self.specs.iter().enumerate() {
                if current == spec.start {
                    ring.advance_read(i);
                    self.start_index = ring.read_index();
                    self.active = Some(spec_idx);
                    self.in_progress = true;
                    return true;
                }
            }
        }

        // Nothing but garbage: consume it so it is not rescanned.
        let n = ring.available();
        ring.advance_read(n);
        false
    }

    /// Look for the active spec's end delimiter past the start byte.
    fn extract_complete_frame(&mut self, ring: &mut ByteRing) -> Option<FrameInfo> {
        let spec = self.specs[self.active?];

        let mut end_rel: Option<usize> = None;
        // The start byte itself never closes the frame, even when the start
        // and end delimiters are the same byte (HDLC flag).
        for i in 1..ring.available() {
            if ring.byte(i) == spec.end {
                end_rel = Some(i);
                break;
            }
        }
        let mut end_rel = end_rel?;

        if spec.line_based {
            // The frame runs to the first newline after the end byte.
            let mut newline = None;
            for i in end_rel + 1..ring.available() {
                if ring.byte(i) == b'\n' {
                    newline = Some(i);
                    break;
                }
            }
            end_rel = newline?;
        }

        let size = end_rel + 1;
        let info = FrameInfo {
            start: self.start_index,
            end: (self.start_index + end_rel) % ring.capacity(),
            size,
            complete: true,
            format: spec.format,
        };

        ring.advance_read(size);
        self.reset();
        self.frame_count += 1;
        Some(info)
    }
}
