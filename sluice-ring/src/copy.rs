//! Element copies between caller memory and ring storage.
//!
//! A reserved range is exclusive to its holder, so these copies need no
//! synchronization. A range that crosses the end of storage is split into two
//! contiguous moves.

use core::ptr;

/// Splits `n` slots starting at ring index `head` into the pre-wrap and
/// post-wrap segment lengths, plus the storage offset of the first.
#[inline]
fn segments(mask: u32, head: u32, n: u32) -> (usize, usize, usize) {
    let size = mask as usize + 1;
    let idx = (head & mask) as usize;
    let n = n as usize;
    if idx + n <= size {
        (idx, n, 0)
    } else {
        (idx, size - idx, n - (size - idx))
    }
}

/// Copies `n` elements from `src` into storage starting at index `head`.
///
/// # Safety
///
/// `base` must point to `mask + 1` slots, `src` must be valid for `n` reads,
/// `n <= mask + 1`, and the caller must hold a reservation covering the range.
#[inline]
pub(crate) unsafe fn write<T: Copy>(base: *mut T, mask: u32, head: u32, src: *const T, n: u32) {
    let (idx, first, second) = segments(mask, head, n);
    unsafe {
        ptr::copy_nonoverlapping(src, base.add(idx), first);
        if second > 0 {
            ptr::copy_nonoverlapping(src.add(first), base, second);
        }
    }
}

/// Copies `n` elements from storage starting at index `head` into `dst`.
///
/// # Safety
///
/// `base` must point to `mask + 1` slots, `dst` must be valid for `n` writes,
/// `n <= mask + 1`, and the range must be published and reserved by the caller.
#[inline]
pub(crate) unsafe fn read<T: Copy>(base: *const T, mask: u32, head: u32, dst: *mut T, n: u32) {
    let (idx, first, second) = segments(mask, head, n);
    unsafe {
        ptr::copy_nonoverlapping(base.add(idx), dst, first);
        if second > 0 {
            ptr::copy_nonoverlapping(base, dst.add(first), second);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_at_wrap_point() {
        assert_eq!(segments(7, 2, 4), (2, 4, 0));
        assert_eq!(segments(7, 6, 4), (6, 2, 2));
        assert_eq!(segments(7, 8, 8), (0, 8, 0));
        assert_eq!(segments(7, u32::MAX, 2), (7, 1, 1));
    }

    #[test]
    fn wrapped_write_then_read() {
        let mut storage = [0u32; 8];
        let src = [1, 2, 3, 4, 5];
        let mut dst = [0u32; 5];
        unsafe {
            write(storage.as_mut_ptr(), 7, 6, src.as_ptr(), 5);
            read(storage.as_ptr(), 7, 6, dst.as_mut_ptr(), 5);
        }
        assert_eq!(storage, [3, 4, 5, 0, 0, 0, 1, 2]);
        assert_eq!(dst, src);
    }
}
