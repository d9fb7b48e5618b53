//! Block-size arithmetic shared by both scheduling strategies.

use super::ShiftDecimatorError;
use crate::dsp::{Complex32, Taps};

pub(crate) const SAMPLE_BYTES: u64 = std::mem::size_of::<Complex32>() as u64;

/// Byte length of `count` complex samples.
pub(crate) fn sample_bytes(count: usize) -> u64 {
    count as u64 * SAMPLE_BYTES
}

/// Per-stage sizes for a taps cascade and a maximum block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    histories: Vec<usize>,
    workgroup_size: u32,
    max_block_size: usize,
}

impl BlockLayout {
    pub fn new(taps: &Taps, workgroup_size: u32, max_block_size: usize) -> Self {
        Self {
            histories: (0..taps.stage_count()).map(|s| taps.history_len(s)).collect(),
            workgroup_size,
            max_block_size,
        }
    }

    pub fn stage_count(&self) -> usize {
        self.histories.len()
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Block sizes must be a multiple of this so every stage dispatches whole workgroups.
    pub fn alignment(&self) -> usize {
        (self.workgroup_size as usize) << self.stage_count()
    }

    pub fn history_len(&self, stage: usize) -> usize {
        self.histories[stage]
    }

    /// Samples entering `stage` for a block of `count`.
    pub fn stage_input(&self, count: usize, stage: usize) -> usize {
        count >> stage
    }

    pub fn output_len(&self, count: usize) -> usize {
        count >> self.stage_count()
    }

    /// Ring buffer length of `stage`: history followed by the largest stage input.
    pub fn ring_capacity(&self, stage: usize) -> usize {
        self.histories[stage] + self.stage_input(self.max_block_size, stage)
    }

    /// Smallest block every check accepts.
    pub fn min_block_size(&self) -> usize {
        let alignment = self.alignment();
        let needed = self
            .histories
            .iter()
            .enumerate()
            .map(|(stage, &history)| history << stage)
            .max()
            .unwrap_or(0)
            .max(1);
        needed.div_ceil(alignment) * alignment
    }

    pub fn validate(&self, count: usize) -> Result<(), ShiftDecimatorError> {
        if count == 0 {
            return Err(ShiftDecimatorError::EmptyBlock);
        }
        if count > self.max_block_size {
            return Err(ShiftDecimatorError::BlockTooLarge {
                count,
                max: self.max_block_size,
            });
        }
        let alignment = self.alignment();
        if count % alignment != 0 {
            return Err(ShiftDecimatorError::Misaligned {
                count,
                multiple: alignment,
            });
        }
        // the history copy reads the tail of the stage input, which must not overlap the front
        for (stage, &history) in self.histories.iter().enumerate() {
            let input = self.stage_input(count, stage);
            if input < history {
                return Err(ShiftDecimatorError::ShorterThanHistory {
                    stage,
                    input,
                    history,
                });
            }
        }
        Ok(())
    }

    /// Check that an interleaved buffer of `len` floats holds the block and the returned samples.
    pub fn check_buffer(&self, len: usize, count: usize, returned: usize) -> Result<(), ShiftDecimatorError> {
        let needed = 2 * count.max(returned);
        if len < needed {
            return Err(ShiftDecimatorError::BufferTooSmall { needed, len });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> BlockLayout {
        // stage lengths 9, 9, 9, 11, 21, 41
        BlockLayout::new(&Taps::half_band_cascade(64).unwrap(), 64, 512 * 1024)
    }

    #[test]
    fn test_sizes() {
        let layout = layout();
        assert_eq!(layout.stage_count(), 6);
        assert_eq!(layout.alignment(), 4096);
        assert_eq!(layout.output_len(8192), 128);
        assert_eq!(layout.stage_input(8192, 5), 256);
        assert_eq!(layout.ring_capacity(0), 8 + 512 * 1024);
        assert_eq!(layout.ring_capacity(5), 40 + 16 * 1024);
        assert_eq!(sample_bytes(3), 24);
    }

    #[test]
    fn test_validate() {
        let layout = layout();
        assert!(layout.validate(4096).is_ok());
        assert!(matches!(layout.validate(0), Err(ShiftDecimatorError::EmptyBlock)));
        assert!(matches!(
            layout.validate(4095),
            Err(ShiftDecimatorError::Misaligned { multiple: 4096, .. })
        ));
        assert!(matches!(
            layout.validate(1024 * 1024),
            Err(ShiftDecimatorError::BlockTooLarge { .. })
        ));
    }

    #[test]
    fn test_short_stage_input_is_rejected() {
        let taps = Taps::new(vec![vec![1.0; 3], vec![1.0; 41]]).unwrap();
        let layout = BlockLayout::new(&taps, 4, 4096);
        // stage 1 sees 32 samples but needs 40 of history
        assert!(matches!(
            layout.validate(64),
            Err(ShiftDecimatorError::ShorterThanHistory { stage: 1, input: 32, history: 40 })
        ));
        assert_eq!(layout.min_block_size(), 80);
        assert!(layout.validate(80).is_ok());
    }

    #[test]
    fn test_check_buffer() {
        let layout = layout();
        assert!(layout.check_buffer(8192, 4096, 64).is_ok());
        assert!(matches!(
            layout.check_buffer(8191, 4096, 64),
            Err(ShiftDecimatorError::BufferTooSmall { needed: 8192, len: 8191 })
        ));
    }
}
