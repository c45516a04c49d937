/// Marker for record types that may cross a process boundary by raw byte copy.
///
/// The queue publishes records by overwriting slot bytes in place and reads
/// them back with plain loads, possibly in a different process that mapped
/// the segment at a different address. That is only sound for inert data.
///
/// # Safety
///
/// Implementors must guarantee all of the following:
///
/// - The type contains no references, pointers, or handles to process-local
///   resources. An address stored into shared memory is meaningless to a
///   peer process.
/// - Every bit pattern of `size_of::<Self>()` bytes is a valid value,
///   including all zeroes. Slots start zeroed, and staged copies in the
///   locked write path start zeroed before the caller fills them in.
/// - The type is `#[repr(C)]` (or a primitive), so every party mapping the
///   segment agrees on its layout.
pub unsafe trait Payload: Copy + Send + 'static {}

macro_rules! impl_payload {
    ($($t:ty),* $(,)?) => {
        $(
            // SAFETY: primitive scalars are inert and valid for every bit
            // pattern of their size. `bool` and `char` are excluded for
            // exactly that reason.
            unsafe impl Payload for $t {}
        )*
    };
}

impl_payload!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

// SAFETY: an array of inert records is itself inert.
unsafe impl<P: Payload, const LEN: usize> Payload for [P; LEN] {}
