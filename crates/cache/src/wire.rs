/*
 * vDIME dark internet mail environment client
 *
 * Copyright (C) 2003 - viridIT SAS
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

//! Serialization helpers shared by all persistable cache payloads.
//!
//! Variable-length chunks are written as a little-endian `u64` length
//! followed by the bytes; strings as NUL-terminated runs (the empty string
//! encodes to a single zero byte and decodes back to "no value"); arrays as
//! a length-prefixed concatenation of items.

use crate::Error;

/// Append a variable-length chunk.
pub fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    buf.extend_from_slice(data);
}

/// Append an optional NUL-terminated string.
pub fn put_str(buf: &mut Vec<u8>, value: Option<&str>) {
    if let Some(value) = value {
        buf.extend_from_slice(value.as_bytes());
    }

    buf.push(0);
}

/// Append an array of fixed-size items as a length-prefixed concatenation.
///
/// # Errors
///
/// Fails if any item does not measure exactly `item_size` bytes.
pub fn put_array(
    buf: &mut Vec<u8>,
    items: &[impl AsRef<[u8]>],
    item_size: usize,
) -> Result<(), Error> {
    buf.extend_from_slice(&(items.len() as u64).to_le_bytes());

    for item in items {
        let item = item.as_ref();

        if item.len() != item_size {
            return Err(Error::Encode {
                with_source: format!(
                    "array item measured {} bytes, expected {item_size}",
                    item.len()
                ),
            });
        }

        buf.extend_from_slice(item);
    }

    Ok(())
}

/// Append an array of NUL-terminated strings.
pub fn put_str_array(buf: &mut Vec<u8>, items: &[String]) {
    buf.extend_from_slice(&(items.len() as u64).to_le_bytes());

    for item in items {
        put_str(buf, Some(item));
    }
}

/// Append an array serialized with a caller-supplied per-item serializer.
pub fn put_array_with<T>(buf: &mut Vec<u8>, items: &[T], mut each: impl FnMut(&mut Vec<u8>, &T)) {
    buf.extend_from_slice(&(items.len() as u64).to_le_bytes());

    for item in items {
        each(buf, item);
    }
}

/// Bounds-checked reader over a serialized payload, the inverse of the
/// `put_*` helpers.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Whether every byte of the buffer has been consumed.
    #[must_use]
    pub const fn finished(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn underflow(what: &str) -> Error {
        Error::Decode {
            with_source: format!("buffer ended before {what}"),
        }
    }

    /// Take `len` raw bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Self::underflow("fixed-size field"))?;

        let out = &self.buf[self.pos..end];
        self.pos = end;

        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("len 2")))
    }

    pub fn u64(&mut self) -> Result<u64, Error> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("len 8")))
    }

    pub fn i8(&mut self) -> Result<i8, Error> {
        #[allow(clippy::cast_possible_wrap)]
        Ok(self.take(1)?[0] as i8)
    }

    fn len_prefix(&mut self, what: &str) -> Result<usize, Error> {
        let len = self.u64()?;

        usize::try_from(len)
            .ok()
            .filter(|len| self.pos + len <= self.buf.len())
            .ok_or_else(|| Self::underflow(what))
    }

    /// Read a variable-length chunk written by [`put_bytes`].
    pub fn bytes(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.len_prefix("variable-length chunk")?;

        Ok(self.take(len)?.to_vec())
    }

    /// Read an optional NUL-terminated string written by [`put_str`].
    pub fn str_nul(&mut self) -> Result<Option<String>, Error> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Self::underflow("string terminator"))?;

        let value = std::str::from_utf8(&rest[..nul])
            .map_err(|e| Error::Decode {
                with_source: format!("string was not valid utf-8: {e}"),
            })?
            .to_owned();

        self.pos += nul + 1;

        Ok((!value.is_empty()).then_some(value))
    }

    /// Read an array of fixed-size items written by [`put_array`].
    pub fn array(&mut self, item_size: usize) -> Result<Vec<Vec<u8>>, Error> {
        let count = self.u64()?;
        let count = usize::try_from(count)
            .ok()
            .filter(|count| {
                count
                    .checked_mul(item_size)
                    .map_or(false, |total| self.pos + total <= self.buf.len())
            })
            .ok_or_else(|| Self::underflow("fixed-size array"))?;

        (0..count).map(|_| Ok(self.take(item_size)?.to_vec())).collect()
    }

    /// Read an array of strings written by [`put_str_array`].
    pub fn str_array(&mut self) -> Result<Vec<String>, Error> {
        let count = self.u64()?;
        let count = usize::try_from(count)
            .ok()
            .filter(|count| *count <= self.buf.len() - self.pos)
            .ok_or_else(|| Self::underflow("string array"))?;

        (0..count)
            .map(|_| Ok(self.str_nul()?.unwrap_or_default()))
            .collect()
    }

    /// Read an array written by [`put_array_with`] using a per-item parser.
    pub fn array_with<T>(
        &mut self,
        mut each: impl FnMut(&mut Self) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        let count = self.u64()?;
        let count = usize::try_from(count)
            .ok()
            .filter(|count| *count <= self.buf.len() - self.pos)
            .ok_or_else(|| Self::underflow("custom array"))?;

        (0..count).map(|_| each(self)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bytes_round_trip() {
        let mut buf = vec![];
        put_bytes(&mut buf, b"abc");
        put_bytes(&mut buf, b"");

        let mut rd = Reader::new(&buf);
        assert_eq!(rd.bytes().unwrap(), b"abc");
        assert_eq!(rd.bytes().unwrap(), b"");
        assert!(rd.finished());
    }

    #[test]
    fn empty_string_is_one_zero_byte() {
        let mut buf = vec![];
        put_str(&mut buf, None);
        assert_eq!(buf, vec![0]);

        let mut rd = Reader::new(&buf);
        assert_eq!(rd.str_nul().unwrap(), None);
        assert!(rd.finished());
    }

    #[test]
    fn string_round_trip() {
        let mut buf = vec![];
        put_str(&mut buf, Some("mx1.darkmail.example"));

        let mut rd = Reader::new(&buf);
        assert_eq!(rd.str_nul().unwrap().as_deref(), Some("mx1.darkmail.example"));
    }

    #[test]
    fn fixed_array_round_trip() {
        let items = vec![vec![1u8; 32], vec![2u8; 32]];
        let mut buf = vec![];
        put_array(&mut buf, &items, 32).unwrap();

        let mut rd = Reader::new(&buf);
        assert_eq!(rd.array(32).unwrap(), items);
    }

    #[test]
    fn fixed_array_rejects_bad_item_size() {
        let mut buf = vec![];
        assert!(put_array(&mut buf, &[vec![1u8; 31]], 32).is_err());
    }

    #[test]
    fn str_array_round_trip() {
        let items = vec!["mx1.example".to_owned(), "mx2.example".to_owned()];
        let mut buf = vec![];
        put_str_array(&mut buf, &items);

        let mut rd = Reader::new(&buf);
        assert_eq!(rd.str_array().unwrap(), items);
    }

    #[test]
    fn custom_array_round_trip() {
        let items = vec![(1u8, "a".to_owned()), (2, "bb".to_owned())];
        let mut buf = vec![];
        put_array_with(&mut buf, &items, |buf, (n, s)| {
            buf.push(*n);
            put_str(buf, Some(s));
        });

        let mut rd = Reader::new(&buf);
        let restored = rd
            .array_with(|rd| Ok((rd.u8()?, rd.str_nul()?.unwrap_or_default())))
            .unwrap();
        assert_eq!(restored, items);
    }

    #[rstest::rstest]
    // truncated length prefix
    #[case(&[1, 0, 0][..])]
    // length prefix pointing past the end
    #[case(&[9, 0, 0, 0, 0, 0, 0, 0, 1, 2][..])]
    fn underflow_is_an_error(#[case] buf: &[u8]) {
        assert!(Reader::new(buf).bytes().is_err());
    }

    #[test]
    fn missing_nul_is_an_error() {
        assert!(Reader::new(b"abc").str_nul().is_err());
    }
}
