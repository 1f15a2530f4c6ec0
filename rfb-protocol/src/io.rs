//! Buffered I/O streams for RFB protocol communication.
//!
//! [`RfbInStream`] is the pipeline's bit reader: big-endian integer and byte
//! block reads from any [`AsyncRead`], plus the Tight "compact length" and a
//! running count of consumed bytes. [`RfbOutStream`] batches client messages
//! and writes them on [`RfbOutStream::flush`].
//!
//! # Examples
//!
//! ```
//! use rfb_protocol::io::RfbInStream;
//! use std::io::Cursor;
//!
//! # async fn example() -> std::io::Result<()> {
//! let mut input = RfbInStream::new(Cursor::new(vec![0x00, 0x04, 0x90, 0x4E]));
//! assert_eq!(input.read_u16().await?, 4);
//! assert_eq!(input.read_compact_length().await?, 10000);
//! assert_eq!(input.bytes_read(), 4);
//! # Ok(())
//! # }
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Buffered reader for server-to-client traffic.
pub struct RfbInStream<R> {
    reader: R,
    buffer: BytesMut,
    consumed: u64,
}

impl<R: AsyncRead + Unpin> RfbInStream<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, 8192)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(capacity),
            consumed: 0,
        }
    }

    /// Fill the internal buffer until at least `n` bytes are available.
    ///
    /// Fails with [`std::io::ErrorKind::UnexpectedEof`] if the peer closes first.
    async fn ensure_bytes(&mut self, n: usize) -> std::io::Result<()> {
        while self.buffer.len() < n {
            let bytes_read = self.reader.read_buf(&mut self.buffer).await?;
            if bytes_read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("expected {} bytes, got {}", n, self.buffer.len()),
                ));
            }
        }
        Ok(())
    }

    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        self.ensure_bytes(1).await?;
        self.consumed += 1;
        Ok(self.buffer.get_u8())
    }

    pub async fn read_u16(&mut self) -> std::io::Result<u16> {
        self.ensure_bytes(2).await?;
        self.consumed += 2;
        Ok(self.buffer.get_u16())
    }

    pub async fn read_u32(&mut self) -> std::io::Result<u32> {
        self.ensure_bytes(4).await?;
        self.consumed += 4;
        Ok(self.buffer.get_u32())
    }

    pub async fn read_i32(&mut self) -> std::io::Result<i32> {
        self.ensure_bytes(4).await?;
        self.consumed += 4;
        Ok(self.buffer.get_i32())
    }

    /// Fill `buf` completely.
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.ensure_bytes(buf.len()).await?;
        self.consumed += buf.len() as u64;
        self.buffer.copy_to_slice(buf);
        Ok(())
    }

    /// Read exactly `n` bytes into a fresh vector.
    pub async fn read_vec(&mut self, n: usize) -> std::io::Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        self.read_bytes(&mut out).await?;
        Ok(out)
    }

    /// Read a Tight compact length: 1-3 bytes, 7 bits in each of the first two
    /// (continuation flag in the top bit) and all 8 bits of the third.
    pub async fn read_compact_length(&mut self) -> std::io::Result<usize> {
        let b0 = self.read_u8().await?;
        let mut len = usize::from(b0 & 0x7F);
        if b0 & 0x80 != 0 {
            let b1 = self.read_u8().await?;
            len |= usize::from(b1 & 0x7F) << 7;
            if b1 & 0x80 != 0 {
                let b2 = self.read_u8().await?;
                len |= usize::from(b2) << 14;
            }
        }
        Ok(len)
    }

    pub async fn skip(&mut self, n: usize) -> std::io::Result<()> {
        let mut remaining = n;
        // Skip in bounded chunks so large payloads never balloon the buffer.
        while remaining > 0 {
            let chunk = remaining.min(64 * 1024);
            self.ensure_bytes(chunk).await?;
            self.buffer.advance(chunk);
            self.consumed += chunk as u64;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Bytes already buffered and not yet consumed.
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes consumed since creation.
    pub fn bytes_read(&self) -> u64 {
        self.consumed
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Buffered writer for client-to-server traffic.
pub struct RfbOutStream<W> {
    writer: W,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> RfbOutStream<W> {
    pub fn new(writer: W) -> Self {
        Self::with_capacity(writer, 8192)
    }

    pub fn with_capacity(writer: W, capacity: usize) -> Self {
        Self {
            writer,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.put_u16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buffer.put_i32(value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write everything buffered and flush the underlying writer.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            self.writer.write_all(&self.buffer).await?;
            self.buffer.clear();
        }
        self.writer.flush().await
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_integers() {
        let data = vec![42u8, 0x12, 0x34, 0x12, 0x34, 0x56, 0x78, 0xFF, 0xFF, 0xFF, 0xFE];
        let mut stream = RfbInStream::new(Cursor::new(data));

        assert_eq!(stream.read_u8().await.unwrap(), 42);
        assert_eq!(stream.read_u16().await.unwrap(), 0x1234);
        assert_eq!(stream.read_u32().await.unwrap(), 0x1234_5678);
        assert_eq!(stream.read_i32().await.unwrap(), -2);
        assert_eq!(stream.bytes_read(), 11);
    }

    #[tokio::test]
    async fn test_read_bytes_and_vec() {
        let mut stream = RfbInStream::new(Cursor::new(vec![1, 2, 3, 4, 5]));

        let mut buf = [0u8; 3];
        stream.read_bytes(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(stream.read_vec(2).await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_skip_counts_bytes() {
        let mut stream = RfbInStream::new(Cursor::new(vec![1, 2, 3, 4, 5]));

        stream.skip(2).await.unwrap();
        assert_eq!(stream.read_u8().await.unwrap(), 3);
        stream.skip(1).await.unwrap();
        assert_eq!(stream.read_u8().await.unwrap(), 5);
        assert_eq!(stream.bytes_read(), 5);
    }

    #[tokio::test]
    async fn test_skip_large() {
        let data = vec![7u8; 200_000];
        let mut stream = RfbInStream::new(Cursor::new(data));
        stream.skip(199_999).await.unwrap();
        assert_eq!(stream.read_u8().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_read_eof() {
        let mut stream = RfbInStream::new(Cursor::new(vec![1, 2]));

        stream.read_u8().await.unwrap();
        let err = stream.read_u16().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_compact_length_forms() {
        // one byte
        let mut s = RfbInStream::new(Cursor::new(vec![0x7F]));
        assert_eq!(s.read_compact_length().await.unwrap(), 127);
        // two bytes: 0x90 0x4E -> 0x10 | 0x4E << 7
        let mut s = RfbInStream::new(Cursor::new(vec![0x90, 0x4E]));
        assert_eq!(s.read_compact_length().await.unwrap(), 10000);
        // three bytes, third byte uses all 8 bits
        let mut s = RfbInStream::new(Cursor::new(vec![0xFF, 0xFF, 0xFF]));
        assert_eq!(s.read_compact_length().await.unwrap(), 0x3F_FFFF);
    }

    #[tokio::test]
    async fn test_write_and_flush() {
        let mut out = RfbOutStream::new(Vec::new());
        out.write_u8(3);
        out.write_u16(0x0102);
        out.write_u32(0x0304_0506);
        out.write_i32(-1);
        out.write_bytes(&[9]);
        assert_eq!(out.buffered(), 12);
        out.flush().await.unwrap();
        assert_eq!(out.buffered(), 0);
        assert_eq!(
            out.get_ref(),
            &vec![3, 1, 2, 3, 4, 5, 6, 0xFF, 0xFF, 0xFF, 0xFF, 9]
        );
    }

    fn encode_compact(len: usize) -> Vec<u8> {
        let mut out = vec![(len & 0x7F) as u8];
        if len > 0x7F {
            out[0] |= 0x80;
            out.push(((len >> 7) & 0x7F) as u8);
            if len > 0x3FFF {
                out[1] |= 0x80;
                out.push(((len >> 14) & 0xFF) as u8);
            }
        }
        out
    }

    proptest! {
        #[test]
        fn compact_length_decodes_every_encodable_value(len in 0usize..0x40_0000) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let bytes = encode_compact(len);
            let consumed = bytes.len() as u64;
            let (decoded, read) = rt.block_on(async move {
                let mut s = RfbInStream::new(Cursor::new(bytes));
                let v = s.read_compact_length().await.unwrap();
                (v, s.bytes_read())
            });
            prop_assert_eq!(decoded, len);
            prop_assert_eq!(read, consumed);
        }
    }
}
