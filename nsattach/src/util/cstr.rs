//! NUL-terminated string arrays for `execve`-style calls.

use std::ffi::{CStr, CString, NulError};
use std::ptr;

/// Null-terminated array of NUL-terminated strings.
///
/// Built before forking so the child can hand `as_ptr()` straight to
/// `execve` without allocating.
pub(crate) struct CStringArray {
    strings: Vec<CString>,
    pointers: Vec<*const libc::c_char>,
}

// SAFETY: the pointers only ever point into the heap buffers owned by
// `strings`, which move together with the array.
unsafe impl Send for CStringArray {}

impl CStringArray {
    pub(crate) fn new() -> Self {
        Self {
            strings: Vec::new(),
            pointers: vec![ptr::null()],
        }
    }

    /// Build from Rust strings, rejecting interior NULs.
    pub(crate) fn from_strs<I, S>(items: I) -> Result<Self, NulError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        let mut this = Self::new();
        for item in items {
            this.push(CString::new(item)?);
        }
        Ok(this)
    }

    pub(crate) fn push(&mut self, element: CString) {
        let last = self.pointers.len() - 1;
        self.pointers.insert(last, element.as_ptr());
        self.strings.push(element);
    }

    /// Pointer to the array. The last element is a null pointer.
    pub(crate) fn as_ptr(&self) -> *const *const libc::c_char {
        self.pointers.as_ptr()
    }

    pub(crate) fn first(&self) -> Option<&CStr> {
        self.strings.first().map(CString::as_c_str)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.strings.iter().map(CString::as_c_str)
    }

    pub(crate) fn len(&self) -> usize {
        self.strings.len()
    }
}

impl Default for CStringArray {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_is_null_terminated() {
        let array = CStringArray::from_strs(["a", "bc"]).unwrap();
        assert_eq!(array.len(), 2);
        unsafe {
            let ptr = array.as_ptr();
            assert_eq!(CStr::from_ptr(*ptr).to_bytes(), b"a");
            assert_eq!(CStr::from_ptr(*ptr.add(1)).to_bytes(), b"bc");
            assert!((*ptr.add(2)).is_null());
        }
    }

    #[test]
    fn test_interior_nul_rejected() {
        assert!(CStringArray::from_strs(["ok", "bad\0"]).is_err());
    }

    #[test]
    fn test_empty_array() {
        let array = CStringArray::new();
        assert!(array.first().is_none());
        unsafe { assert!((*array.as_ptr()).is_null()) };
    }
}
