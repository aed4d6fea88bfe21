//! # GPIO Ready-Line Monitor
//!
//! The crate modules signal "response ready" by pulling a shared attention
//! line low. This module watches that line through the SoC GPIO register
//! block, memory-mapped from `/dev/mem` the way the controller hardware
//! exposes it.
//!
//! ## Register Model
//!
//! The GPIO block of the first-generation Raspberry Pi SoC sits at physical
//! address `0x2020_0000`. Pin levels are read from the two `GPLEV` words at
//! word offsets 13 and 14 of the block; pin `n` lives in bank `n / 32` at
//! bit `n % 32`. The line is wired active low, so a cleared bit means a
//! module has a response waiting.
//!
//! Opening `/dev/mem` requires root (or `CAP_SYS_RAWIO`); the gateway is
//! expected to run with that privilege on the controller board.

use std::fs::OpenOptions;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use memmap2::{MmapMut, MmapOptions};
use tokio::time::sleep;

use crate::error::{HvlinkError, HvlinkResult};

/// Physical address of the GPIO register block
const GPIO_REGISTER_BASE: u64 = 0x2020_0000;

/// Size of the GPIO register block in bytes
const GPIO_REGISTER_LEN: usize = 0xB4;

/// Word offset of the first pin-level register (GPLEV0)
const GPIO_LEVEL_WORD: usize = 13;

/// Highest valid GPIO line on the SoC
pub(crate) const GPIO_LINE_MAX: u8 = 53;

/// Interval between level polls
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Default GPIO line wired to the module attention signal
pub const DEFAULT_READY_LINE: u8 = 23;

/// Word offset and bit mask addressing one line's level bit
fn level_word_and_mask(line: u8) -> (usize, u32) {
    let bank = (line / 32) as usize;
    (GPIO_LEVEL_WORD + bank, 1u32 << (line % 32))
}

/// Observer for the module attention line
///
/// Implementations report the instantaneous line state; waiting is a
/// shared poll loop over that state. Ready means the line reads low.
#[async_trait]
pub trait ReadyLine: Send + Sync {
    /// The GPIO line number being watched
    fn line(&self) -> u8;

    /// Sample the line once
    fn is_ready(&self) -> bool;

    /// Poll until the line goes ready or the timeout expires
    ///
    /// Samples immediately, then every 5 ms. A line that is already low
    /// returns without sleeping.
    async fn wait_ready(&self, timeout: Duration) -> HvlinkResult<()> {
        let polls = timeout.as_millis() / POLL_INTERVAL.as_millis();
        for _ in 0..polls {
            if self.is_ready() {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
        debug!(
            "GPIO line {} still high after {} ms",
            self.line(),
            timeout.as_millis()
        );
        Err(HvlinkError::ready_timeout(
            self.line(),
            timeout.as_millis() as u64,
        ))
    }
}

/// Ready line backed by the memory-mapped GPIO block
pub struct MemoryMappedReadyLine {
    map: MmapMut,
    line: u8,
}

impl MemoryMappedReadyLine {
    /// Map the GPIO register block and watch the given line
    pub fn open(line: u8) -> HvlinkResult<Self> {
        if line > GPIO_LINE_MAX {
            return Err(HvlinkError::configuration(format!(
                "GPIO line {} out of range (0-{})",
                line, GPIO_LINE_MAX
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/mem")
            .map_err(|e| HvlinkError::io(format!("Failed to open /dev/mem: {}", e)))?;

        let map = unsafe {
            MmapOptions::new()
                .offset(GPIO_REGISTER_BASE)
                .len(GPIO_REGISTER_LEN)
                .map_mut(&file)
                .map_err(|e| {
                    HvlinkError::io(format!("Failed to map GPIO registers: {}", e))
                })?
        };

        Ok(Self { map, line })
    }
}

#[async_trait]
impl ReadyLine for MemoryMappedReadyLine {
    fn line(&self) -> u8 {
        self.line
    }

    fn is_ready(&self) -> bool {
        let (word, mask) = level_word_and_mask(self.line);
        // Volatile: the register changes under us between reads
        let value =
            unsafe { std::ptr::read_volatile((self.map.as_ptr() as *const u32).add(word)) };
        value & mask == 0
    }
}

#[cfg(test)]
pub(crate) struct MockReadyLine {
    line: u8,
    ready: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockReadyLine {
    pub fn new(line: u8, initially_ready: bool) -> Self {
        Self {
            line,
            ready: std::sync::atomic::AtomicBool::new(initially_ready),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
#[async_trait]
impl ReadyLine for MockReadyLine {
    fn line(&self) -> u8 {
        self.line
    }

    fn is_ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_level_word_and_mask() {
        assert_eq!(level_word_and_mask(0), (13, 1));
        assert_eq!(level_word_and_mask(23), (13, 1 << 23));
        assert_eq!(level_word_and_mask(31), (13, 1 << 31));
        assert_eq!(level_word_and_mask(32), (14, 1));
        assert_eq!(level_word_and_mask(53), (14, 1 << 21));
    }

    #[test]
    fn test_open_rejects_out_of_range_line() {
        let result = MemoryMappedReadyLine::open(54);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wait_ready_returns_immediately_when_low() {
        let line = MockReadyLine::new(23, true);
        let started = std::time::Instant::now();
        line.wait_ready(Duration::from_secs(2)).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let line = MockReadyLine::new(23, false);
        let result = line.wait_ready(Duration::from_millis(20)).await;
        match result {
            Err(HvlinkError::ReadySignalTimeout { line, .. }) => assert_eq!(line, 23),
            other => panic!("expected ready timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_ready_observes_late_transition() {
        let line = Arc::new(MockReadyLine::new(23, false));
        let flipper = Arc::clone(&line);
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            flipper.set_ready(true);
        });
        line.wait_ready(Duration::from_secs(2)).await.unwrap();
    }
}
