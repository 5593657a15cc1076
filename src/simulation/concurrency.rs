//! Data-parallel "dispatch" helpers.
//!
//! Every helper returns only after all work items are done, which is the
//! barrier between two dependent passes.

use rayon::prelude::*;

pub fn par_iter_mut0<F: Fn(usize) + Send + Sync>(n: usize, f: F) {
    (0..n).into_par_iter().for_each(|idx| {
        f(idx);
    });
}

pub fn par_iter_mut1<T1: Send + Sync, F: Fn(usize, &mut T1) + Send + Sync>(arr1: &mut [T1], f: F) {
    arr1.into_par_iter().enumerate().for_each(|(idx, v1)| {
        f(idx, v1);
    });
}

pub fn par_iter_mut2<T1: Send + Sync, T2: Send + Sync, F: Fn(usize, &mut T1, &mut T2) + Send + Sync>(
    arr1: &mut [T1],
    arr2: &mut [T2],
    f: F,
) {
    arr1.into_par_iter()
        .zip(arr2.into_par_iter())
        .enumerate()
        .for_each(|(idx, (v1, v2))| {
            f(idx, v1, v2);
        });
}

/// Runs `f` once per chunk of `chunk_size` elements ("one thread group per block").
/// The first argument is the global index of the chunk's first element.
pub fn par_chunks_mut1<T1: Send + Sync, F: Fn(usize, &mut [T1]) + Send + Sync>(
    arr1: &mut [T1],
    chunk_size: usize,
    f: F,
) {
    arr1.par_chunks_mut(chunk_size)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            f(chunk_idx * chunk_size, chunk);
        });
}
