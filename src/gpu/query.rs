//! Timestamp queries leased from the context's query pool.

use std::sync::Arc;

use ash::vk;

use super::context::Context;
use super::recording::Recording;

/// A contiguous range of timestamp queries, returned to the pool on drop.
pub struct TimestampQueries {
    context: Arc<Context>,
    pool: vk::QueryPool,
    first: u32,
    count: u32,
    period_ns: f32,
}

impl TimestampQueries {
    pub(crate) fn new(
        context: &Arc<Context>,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
        period_ns: f32,
    ) -> Self {
        Self {
            context: Arc::clone(context),
            pool,
            first,
            count,
            period_ns,
        }
    }

    pub fn first(&self) -> u32 {
        self.first
    }

    /// Reset `count` queries starting at `offset` within the lease.
    pub fn reset(&self, recording: &Recording<'_>, offset: u32, count: u32) {
        debug_assert!(offset + count <= self.count);
        unsafe {
            recording.device().cmd_reset_query_pool(
                recording.raw(),
                self.pool,
                self.first + offset,
                count,
            );
        }
    }

    /// Write a timestamp once all prior commands reach `stage`.
    pub fn write(&self, recording: &Recording<'_>, offset: u32, stage: vk::PipelineStageFlags) {
        debug_assert!(offset < self.count);
        unsafe {
            recording.device().cmd_write_timestamp(
                recording.raw(),
                stage,
                self.pool,
                self.first + offset,
            );
        }
    }

    /// Elapsed microseconds for consecutive (start, end) pairs beginning at `offset`.
    ///
    /// Returns `None` while any of the queries is still unavailable.
    pub fn read_intervals(&self, offset: u32, pairs: u32) -> Option<Vec<f64>> {
        let mut results = vec![[0u64; 2]; (pairs * 2) as usize];
        unsafe {
            self.context.device().get_query_pool_results(
                self.pool,
                self.first + offset,
                &mut results,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WITH_AVAILABILITY,
            )
        }
        .ok()?;

        if results.iter().any(|[_, available]| *available == 0) {
            return None;
        }
        Some(
            results
                .chunks_exact(2)
                .map(|pair| {
                    let ticks = pair[1][0].wrapping_sub(pair[0][0]);
                    ticks as f64 * self.period_ns as f64 / 1000.0
                })
                .collect(),
        )
    }
}

impl Drop for TimestampQueries {
    fn drop(&mut self) {
        self.context.release_queries(self.first, self.count);
    }
}
