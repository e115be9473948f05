//! Opaque identifiers exchanged with the native runtime.

use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroU64;

/// Address of one native object.
///
/// The bridge never dereferences a handle; it only compares, hashes and hands
/// it back to the [`NativeRuntime`](crate::NativeRuntime). Zero is reserved as
/// the "no object" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Handle(usize);

impl Handle {
    /// The null handle.
    pub const NULL: Handle = Handle(0);

    /// Create a handle from a raw address.
    #[inline]
    pub const fn from_addr(addr: usize) -> Self {
        Handle(addr)
    }

    /// Create a handle from a native pointer.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Handle(ptr as usize)
    }

    /// The raw address.
    #[inline]
    pub const fn addr(self) -> usize {
        self.0
    }

    /// The address as an untyped pointer, for passing back across FFI.
    #[inline]
    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `None` for the null handle.
    #[inline]
    pub const fn non_null(self) -> Option<Handle> {
        if self.is_null() { None } else { Some(self) }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Token native code stores to call back into a managed wrapper.
///
/// Encodes a slot index and a generation. The generation changes every time a
/// slot is reused, so a token kept past its wrapper's disposal resolves to
/// nothing rather than to whichever wrapper took the slot next. The raw form
/// is never zero, which lets native code use zero as "no callback".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(NonZeroU64);

impl CallbackHandle {
    const INDEX_MASK: u64 = 0xffff_ffff;

    /// Pack a slot index and generation.
    ///
    /// Returns `None` if the index does not fit in 32 bits.
    pub fn new(index: usize, generation: u32) -> Option<Self> {
        let index = u32::try_from(index).ok()?.checked_add(1)?;
        let raw = (u64::from(generation) << 32) | u64::from(index);
        NonZeroU64::new(raw).map(CallbackHandle)
    }

    /// Rebuild a token from the value native code stored.
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        let handle = CallbackHandle(NonZeroU64::new(raw)?);
        (raw & Self::INDEX_MASK != 0).then_some(handle)
    }

    /// The value handed to native code.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0.get()
    }

    #[inline]
    pub fn index(self) -> usize {
        ((self.0.get() & Self::INDEX_MASK) - 1) as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("index", &self.index())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle() {
        assert!(Handle::NULL.is_null());
        assert!(Handle::default().is_null());
        assert_eq!(Handle::NULL.non_null(), None);
        assert_eq!(Handle::from_addr(0x10).non_null(), Some(Handle::from_addr(0x10)));
    }

    #[test]
    fn handle_from_pointer() {
        let value = 7u32;
        let handle = Handle::from_ptr(&value as *const u32);
        assert!(!handle.is_null());
        assert_eq!(handle.as_ptr() as usize, handle.addr());
    }

    #[test]
    fn handle_formatting() {
        let handle = Handle::from_addr(0xbeef);
        assert_eq!(format!("{}", handle), "0xbeef");
        assert_eq!(format!("{:?}", handle), "Handle(0xbeef)");
    }

    #[test]
    fn callback_handle_packs_index_and_generation() {
        let token = CallbackHandle::new(5, 9).unwrap();
        assert_eq!(token.index(), 5);
        assert_eq!(token.generation(), 9);
        assert_eq!(CallbackHandle::from_raw(token.to_raw()), Some(token));
    }

    #[test]
    fn callback_handle_index_zero_is_nonzero_raw() {
        let token = CallbackHandle::new(0, 0).unwrap();
        assert_ne!(token.to_raw(), 0);
        assert_eq!(token.index(), 0);
    }

    #[test]
    fn callback_handle_rejects_invalid_raw() {
        assert_eq!(CallbackHandle::from_raw(0), None);
        // generation bits only, no index
        assert_eq!(CallbackHandle::from_raw(1 << 32), None);
    }

    #[test]
    fn callback_handle_rejects_oversized_index() {
        assert!(CallbackHandle::new(u32::MAX as usize, 0).is_none());
        assert!(CallbackHandle::new(u32::MAX as usize - 1, 0).is_some());
    }
}
