#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{MagError, MagResult};

/// Index-aligned map over a batch, parallel when the `parallel` feature is on.
pub(crate) fn map_indexed<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        items.par_iter().enumerate().map(|(i, item)| f(i, item)).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        items.iter().enumerate().map(|(i, item)| f(i, item)).collect()
    }
}

/// Index-aligned fallible map that stops early on failure and reports the
/// error of the lowest-index failing element.
pub(crate) fn try_map_indexed<T, R, F>(items: &[T], f: F) -> MagResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> MagResult<R> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        // rayon stops at some failing element, not necessarily the first one
        match items.par_iter().enumerate().map(|(i, item)| f(i, item)).collect() {
            Ok(out) => Ok(out),
            Err(err) => Err(items
                .iter()
                .enumerate()
                .find_map(|(i, item)| f(i, item).err())
                .unwrap_or(err)),
        }
    }
    #[cfg(not(feature = "parallel"))]
    {
        items.iter().enumerate().map(|(i, item)| f(i, item)).collect()
    }
}

/// Times accompanying a batch: either one per element or a single shared one.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Times<'a> {
    Shared(f64),
    PerElement(&'a [f64]),
}

impl<'a> Times<'a> {
    pub(crate) fn for_batch(times: &'a [f64], len: usize) -> MagResult<Self> {
        match times.len() {
            n if n == len => Ok(Times::PerElement(times)),
            1 => Ok(Times::Shared(times[0])),
            n => Err(MagError::domain(format!(
                "{n} times for a batch of {len} elements"
            ))),
        }
    }

    pub(crate) fn get(&self, i: usize) -> f64 {
        match self {
            Times::Shared(t) => *t,
            Times::PerElement(times) => times[i],
        }
    }
}
