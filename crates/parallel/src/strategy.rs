//! Parallel processing strategies

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use habitat_core::{Error, Result};

/// Processing mode for batch stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Single-threaded processing
    Sequential,
    /// Parallel processing using all available cores
    #[default]
    Parallel,
    /// Parallel with specified number of threads
    ParallelWith(usize),
}

impl ProcessingMode {
    /// Mode for an optional configured thread count
    pub fn from_threads(threads: Option<usize>) -> Self {
        match threads {
            None => ProcessingMode::Parallel,
            Some(1) => ProcessingMode::Sequential,
            Some(n) => ProcessingMode::ParallelWith(n),
        }
    }
}

/// Strategy for parallel execution
pub trait ParallelStrategy {
    /// Map a function over indices and collect results in index order
    fn par_map<T, F>(&self, range: std::ops::Range<usize>, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send;
}

impl ParallelStrategy for ProcessingMode {
    #[cfg(feature = "parallel")]
    fn par_map<T, F>(&self, range: std::ops::Range<usize>, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match self {
            ProcessingMode::Sequential => Ok(range.map(f).collect()),
            ProcessingMode::Parallel => Ok(range.into_par_iter().map(f).collect()),
            ProcessingMode::ParallelWith(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(*threads)
                    .build()
                    .map_err(|e| Error::configuration("threads", e.to_string()))?;
                Ok(pool.install(|| range.into_par_iter().map(f).collect()))
            }
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn par_map<T, F>(&self, range: std::ops::Range<usize>, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        if let ProcessingMode::ParallelWith(0) = self {
            return Err(Error::configuration("threads", "must be at least 1"));
        }
        Ok(range.map(f).collect())
    }
}

/// Get the number of available CPU cores
#[cfg(feature = "parallel")]
pub fn num_cpus() -> usize {
    rayon::current_num_threads()
}

#[cfg(not(feature = "parallel"))]
pub fn num_cpus() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_par_map_preserves_order() {
        for mode in [
            ProcessingMode::Sequential,
            ProcessingMode::Parallel,
            ProcessingMode::ParallelWith(3),
        ] {
            let out = mode.par_map(0..100, |i| i * 2).unwrap();
            assert_eq!(out, (0..100).map(|i| i * 2).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_from_threads() {
        assert_eq!(ProcessingMode::from_threads(None), ProcessingMode::Parallel);
        assert_eq!(ProcessingMode::from_threads(Some(1)), ProcessingMode::Sequential);
        assert_eq!(ProcessingMode::from_threads(Some(4)), ProcessingMode::ParallelWith(4));
    }
}
