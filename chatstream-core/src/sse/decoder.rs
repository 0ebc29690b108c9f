/// Incremental UTF-8 decoder.
///
/// Bytes of a multi-byte sequence that straddle a chunk boundary are carried
/// over to the next call. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + bad..];
                        }
                        None => {
                            // incomplete sequence at the end of the input
                            self.carry = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still carried. A dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.carry.is_empty() {
            return String::new();
        }
        let tail = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&tail).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.carry.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_multibyte_sequence_is_reassembled() {
        let bytes = "你好 🎉".as_bytes();
        for split in 0..=bytes.len() {
            let mut dec = Utf8Decoder::new();
            let mut out = dec.decode(&bytes[..split]);
            out.push_str(&dec.decode(&bytes[split..]));
            out.push_str(&dec.finish());
            assert_eq!(out, "你好 🎉", "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let bytes = "añb€c".as_bytes();
        let mut dec = Utf8Decoder::new();
        let mut out = String::new();
        for b in bytes {
            out.push_str(&dec.decode(std::slice::from_ref(b)));
        }
        assert!(!dec.has_pending());
        assert_eq!(out, "añb€c");
    }

    #[test]
    fn invalid_bytes_become_replacement() {
        let mut dec = Utf8Decoder::new();
        let out = dec.decode(&[b'a', 0xff, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn dangling_tail_is_flushed_lossy() {
        let mut dec = Utf8Decoder::new();
        let euro = "€".as_bytes();
        assert_eq!(dec.decode(&euro[..2]), "");
        assert!(dec.has_pending());
        assert_eq!(dec.finish(), "\u{FFFD}");
        assert!(!dec.has_pending());
    }
}
