use crate::error::Result;

/// Encodes a business value into bytes. One half of the codec SPI
/// (spec §6 "Codec SPI"). Specific encodings (text, binary length-prefixed,
/// ...) are external collaborators; the core only depends on this trait.
pub trait Encoder<T> {
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<()>;
}

/// Decodes a business value from bytes previously produced by the matching
/// [`Encoder`]. `decode` takes the full buffer plus an offset rather than a
/// `Read`, so a caller that already has bytes in memory (an external-sort
/// run buffer, a shuffler frame) is not forced through a stream adapter.
pub trait Decoder<T> {
    /// Decodes one value starting at `offset`. Returns the value and the
    /// number of bytes consumed.
    fn decode(&self, bytes: &[u8], offset: usize) -> Result<(T, usize)>;
}

/// Binds an [`Encoder`] and [`Decoder`] for the same type `T`. Most codec
/// implementations implement `Codec` once and get both halves for free via
/// the blanket impls below, mirroring the teacher's `Codec: Encoder +
/// Decoder` composition pattern.
pub trait Codec<T>: Encoder<T> + Decoder<T> {}

impl<T, C> Codec<T> for C where C: Encoder<T> + Decoder<T> {}

/// Produces codec instances on demand. Useful when a codec needs per-call
/// state (e.g. a fresh string-interning table) rather than being a stateless
/// singleton.
pub trait CodecFactory<T> {
    type Codec: Codec<T>;

    fn new_codec(&self) -> Self::Codec;
}
