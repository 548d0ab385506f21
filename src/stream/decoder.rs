//! Incremental text decoding across chunk boundaries.

use crate::error::{Error, Result};

/// Text encodings understood by [`IncrementalDecoder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1: every byte is one character, so decoding never fails.
    Latin1,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Latin1 => "latin-1",
        }
    }
}

/// Stateful decoder that holds back an incomplete multi-byte sequence until
/// the bytes completing it arrive.
#[derive(Debug)]
pub struct IncrementalDecoder {
    encoding: Encoding,
    pending: Vec<u8>,
    /// Bytes decoded so far, for error offsets.
    consumed: usize,
}

impl IncrementalDecoder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            pending: Vec::new(),
            consumed: 0,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Decodes as much of `bytes` as possible.
    ///
    /// # Errors
    /// [`Error::Decode`] with the stream offset of the first invalid byte.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<String> {
        match self.encoding {
            Encoding::Latin1 => {
                self.consumed += bytes.len();
                Ok(bytes.iter().map(|&b| char::from(b)).collect())
            }
            Encoding::Utf8 => {
                self.pending.extend_from_slice(bytes);
                let valid = match std::str::from_utf8(&self.pending) {
                    Ok(_) => self.pending.len(),
                    Err(error) if error.error_len().is_none() => error.valid_up_to(),
                    Err(error) => return Err(self.error_at(error.valid_up_to())),
                };

                let text = std::str::from_utf8(&self.pending[..valid])
                    .map_err(|error| self.error_at(error.valid_up_to()))?
                    .to_owned();
                self.pending.drain(..valid);
                self.consumed += valid;

                Ok(text)
            }
        }
    }

    /// Flushes at end of input.
    ///
    /// # Errors
    /// [`Error::Decode`] if bytes of an unfinished sequence are left over.
    pub fn finish(&mut self) -> Result<String> {
        if self.pending.is_empty() {
            return Ok(String::new());
        }

        Err(self.error_at(0))
    }

    /// True when an incomplete sequence is being held back.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn error_at(&self, offset: usize) -> Error {
        Error::Decode {
            encoding: self.encoding.name(),
            offset: self.consumed + offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split_multibyte_character_is_held_back() {
        let mut decoder = IncrementalDecoder::new(Encoding::Utf8);
        let bytes = "é".as_bytes();

        assert_eq!(decoder.decode(&bytes[..1]).unwrap(), "");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(&bytes[1..]).unwrap(), "é");
        assert_eq!(decoder.finish().unwrap(), "");
    }

    #[test]
    fn test_invalid_byte_reports_stream_offset() {
        let mut decoder = IncrementalDecoder::new(Encoding::Utf8);
        decoder.decode(b"abc").unwrap();

        let err = decoder.decode(b"d\xffe").unwrap_err();
        assert!(matches!(
            err,
            Error::Decode {
                encoding: "utf-8",
                offset: 4
            }
        ));
    }

    #[test]
    fn test_truncated_sequence_fails_on_finish() {
        let mut decoder = IncrementalDecoder::new(Encoding::Utf8);
        let euro = "€".as_bytes();

        assert_eq!(decoder.decode(&euro[..2]).unwrap(), "");
        assert!(matches!(
            decoder.finish(),
            Err(Error::Decode { offset: 0, .. })
        ));
    }

    #[test]
    fn test_latin1_maps_bytes_to_chars() {
        let mut decoder = IncrementalDecoder::new(Encoding::Latin1);
        assert_eq!(decoder.decode(&[0x63, 0x61, 0x66, 0xe9]).unwrap(), "café");
    }

    proptest! {
        #[test]
        fn utf8_decodes_identically_for_any_split(
            text in "\\PC{0,40}",
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let bytes = text.as_bytes();
            let mut points: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
            points.push(0);
            points.push(bytes.len());
            points.sort_unstable();

            let mut decoder = IncrementalDecoder::new(Encoding::Utf8);
            let mut decoded = String::new();
            for pair in points.windows(2) {
                decoded.push_str(&decoder.decode(&bytes[pair[0]..pair[1]]).unwrap());
            }
            decoded.push_str(&decoder.finish().unwrap());

            prop_assert_eq!(decoded, text);
        }
    }
}
