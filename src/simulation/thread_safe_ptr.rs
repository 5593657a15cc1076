use std::marker::PhantomData;

/// Mutable view of a slice that can be shared between the work items of one
/// parallel pass for scatter writes.
///
/// The compiler cannot check the write pattern, so every write is `unsafe`:
/// within one pass each element may be written by at most one work item and
/// must not be read by any other.
pub struct ThreadSafeMutSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}
unsafe impl<T: Send> Sync for ThreadSafeMutSlice<'_, T> {}
unsafe impl<T: Send> Send for ThreadSafeMutSlice<'_, T> {}

impl<'a, T: Copy> ThreadSafeMutSlice<'a, T> {
    pub fn new(slice: &'a mut [T]) -> ThreadSafeMutSlice<'a, T> {
        ThreadSafeMutSlice {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    ///
    /// No other work item may access element `idx` during the current pass.
    pub unsafe fn write(&self, idx: usize, value: T) {
        assert!(idx < self.len, "scatter write out of bounds: {} >= {}", idx, self.len);
        self.ptr.add(idx).write(value);
    }
}
