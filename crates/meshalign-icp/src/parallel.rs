use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while dispatching a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParallelError {
    /// A local pool for [`ExecutionStrategy::Fixed`] could not be created.
    #[error("cannot build a local thread pool: {0}")]
    BuildError(String),

    /// `Fixed(0)` was requested.
    #[error("fixed strategy needs at least one thread, got {0}")]
    InvalidThreadCount(usize),

    /// `Chunked(0)` was requested.
    #[error("chunked strategy needs a chunk size of at least one, got {0}")]
    InvalidChunkSize(usize),

    /// The query and result slices differ in length.
    #[error("{0} queries but {1} result slots")]
    SizeMismatch(usize, usize),
}

/// Controls how batched queries are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Use the global Rayon thread pool, one task per query.
    ///
    /// This maximizes parallelism but may have overhead for small batches.
    #[default]
    ParallelElements,

    /// Use the global Rayon thread pool, one task per chunk of `n` queries.
    ///
    /// Usually the better choice for large batches of cheap queries.
    Chunked(usize),

    /// Run on the calling thread. Best for small clouds and for debugging.
    Serial,

    /// Run on a dedicated pool of `n` threads.
    ///
    /// The pool is built on every call. Intended for benchmarks and for keeping
    /// registration off the global pool.
    Fixed(usize),
}

impl ExecutionStrategy {
    /// Check the strategy parameters without running anything.
    pub fn validate(&self) -> Result<(), ParallelError> {
        match *self {
            ExecutionStrategy::Chunked(0) => Err(ParallelError::InvalidChunkSize(0)),
            ExecutionStrategy::Fixed(0) => Err(ParallelError::InvalidThreadCount(0)),
            _ => Ok(()),
        }
    }
}

/// Map every element of a slice into the matching slot of an output slice.
///
/// Every source element writes only to its own destination slot, so `op`
/// needs no synchronization as long as it only reads shared state.
pub trait ExecuteExt<S> {
    /// Call `op(&self[i], &mut dst[i])` for every `i`, scheduled by `strategy`.
    ///
    /// Fails without calling `op` if the lengths differ or the strategy is invalid.
    fn execute_with<D, F>(
        &self,
        strategy: ExecutionStrategy,
        dst: &mut [D],
        op: F,
    ) -> Result<(), ParallelError>
    where
        D: Send,
        F: Fn(&S, &mut D) + Sync + Send;
}

impl<S: Sync> ExecuteExt<S> for [S] {
    fn execute_with<D, F>(
        &self,
        strategy: ExecutionStrategy,
        dst: &mut [D],
        op: F,
    ) -> Result<(), ParallelError>
    where
        D: Send,
        F: Fn(&S, &mut D) + Sync + Send,
    {
        if self.len() != dst.len() {
            return Err(ParallelError::SizeMismatch(self.len(), dst.len()));
        }
        strategy.validate()?;

        match strategy {
            ExecutionStrategy::Serial => {
                self.iter().zip(dst.iter_mut()).for_each(|(s, d)| op(s, d));
            }
            ExecutionStrategy::ParallelElements => {
                self.par_iter()
                    .zip(dst.par_iter_mut())
                    .for_each(|(s, d)| op(s, d));
            }
            ExecutionStrategy::Chunked(size) => {
                self.par_chunks(size)
                    .zip(dst.par_chunks_mut(size))
                    .for_each(|(src_chunk, dst_chunk)| {
                        src_chunk
                            .iter()
                            .zip(dst_chunk.iter_mut())
                            .for_each(|(s, d)| op(s, d));
                    });
            }
            ExecutionStrategy::Fixed(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| ParallelError::BuildError(e.to_string()))?;

                pool.install(|| {
                    self.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(s, d)| op(s, d));
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_strategies_agree() -> Result<(), ParallelError> {
        let src = (0..1000).collect::<Vec<u32>>();
        for strategy in [
            ExecutionStrategy::Serial,
            ExecutionStrategy::ParallelElements,
            ExecutionStrategy::Chunked(7),
            ExecutionStrategy::Fixed(2),
        ] {
            let mut dst = vec![0u64; src.len()];
            src.execute_with(strategy, &mut dst, |s, d| *d = *s as u64 * 2)?;
            assert!(dst.iter().enumerate().all(|(i, &d)| d == i as u64 * 2));
        }
        Ok(())
    }

    #[test]
    fn test_execute_size_mismatch() {
        let src = vec![1, 2, 3];
        let mut dst = vec![0; 2];
        let res = src.execute_with(ExecutionStrategy::Serial, &mut dst, |_, _| {});
        assert_eq!(res, Err(ParallelError::SizeMismatch(3, 2)));
    }

    #[test]
    fn test_execute_invalid_parameters() {
        let src = vec![1];
        let mut dst = vec![0];
        let res = src.execute_with(ExecutionStrategy::Chunked(0), &mut dst, |_, _| {});
        assert_eq!(res, Err(ParallelError::InvalidChunkSize(0)));
        let res = src.execute_with(ExecutionStrategy::Fixed(0), &mut dst, |_, _| {});
        assert_eq!(res, Err(ParallelError::InvalidThreadCount(0)));
    }
}
