//! Per-entity map, sequential or rayon-parallel
//!
//! Output order always matches input order, so aggregation downstream is
//! deterministic regardless of scheduling.

/// Map `f` over `items`, in parallel when requested
#[cfg(feature = "rayon")]
pub fn map_ordered<T, U, F>(items: &[T], parallel: bool, f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    use rayon::prelude::*;

    if parallel {
        items.par_iter().map(f).collect()
    } else {
        items.iter().map(f).collect()
    }
}

/// Map `f` over `items` (sequential: built without the `rayon` feature)
#[cfg(not(feature = "rayon"))]
pub fn map_ordered<T, U, F>(items: &[T], _parallel: bool, f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    items.iter().map(f).collect()
}
