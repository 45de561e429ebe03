//! A newline-delimited text codec. One of the "specific file codecs" spec
//! §1 names as an external collaborator rather than core functionality —
//! the core only ever depends on `flux_core::{Encoder, Decoder, Codec}`.

const NEWLINE: u8 = b'\n';

/// Encodes `String`s as UTF-8 followed by `\n`, decodes by scanning for the
/// first `\n`. Grounded on the teacher's `LineDelimitedCodec`, which frames
/// the same way over its buffer-pool abstraction; this port frames directly
/// over the plain `Vec<u8>`/`&[u8]` shape `flux_core::{Encoder, Decoder}`
/// use instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineDelimitedCodec;

impl LineDelimitedCodec {
    pub fn new() -> Self {
        Self
    }
}

impl flux_core::Encoder<String> for LineDelimitedCodec {
    fn encode(&self, value: &String, out: &mut Vec<u8>) -> flux_core::Result<()> {
        if value.as_bytes().contains(&NEWLINE) {
            return Err(flux_core::FluxError::validation(
                "LineDelimitedCodec::encode: value contains an embedded newline",
            ));
        }
        out.extend_from_slice(value.as_bytes());
        out.push(NEWLINE);
        Ok(())
    }
}

impl flux_core::Decoder<String> for LineDelimitedCodec {
    fn decode(&self, bytes: &[u8], offset: usize) -> flux_core::Result<(String, usize)> {
        let slice = &bytes[offset..];
        let newline_pos = slice.iter().position(|b| *b == NEWLINE).ok_or_else(|| {
            flux_core::FluxError::validation("LineDelimitedCodec::decode: no trailing newline")
        })?;
        let line = std::str::from_utf8(&slice[..newline_pos])
            .map_err(|err| {
                flux_core::FluxError::with_source(
                    flux_core::FluxErrorKind::Validation,
                    "LineDelimitedCodec::decode: payload is not valid UTF-8",
                    err,
                )
            })?
            .to_string();
        Ok((line, newline_pos + 1))
    }
}
