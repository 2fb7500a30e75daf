//! Inbound line decoding
//!
//! Like `LinesCodec`, but invalid UTF-8 is replaced with U+FFFD instead of
//! failing the connection. Overlong lines are still an error.

use bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, LinesCodecError};

/// Newline-delimited decoder with lossy UTF-8
#[derive(Debug, Clone)]
pub struct LossyLinesCodec {
    inner: AnyDelimiterCodec,
}

impl LossyLinesCodec {
    /// Decoder rejecting lines longer than `max_length` bytes
    pub fn new_with_max_length(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_length),
        }
    }
}

impl Decoder for LossyLinesCodec {
    type Item = String;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        match self.inner.decode(buf) {
            Ok(chunk) => Ok(chunk.map(|c| to_line(&c))),
            Err(e) => Err(map_error(e)),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        match self.inner.decode_eof(buf) {
            Ok(chunk) => Ok(chunk.map(|c| to_line(&c))),
            Err(e) => Err(map_error(e)),
        }
    }
}

fn to_line(chunk: &[u8]) -> String {
    let chunk = chunk.strip_suffix(b"\r").unwrap_or(chunk);
    String::from_utf8_lossy(chunk).into_owned()
}

fn map_error(e: AnyDelimiterCodecError) -> LinesCodecError {
    match e {
        AnyDelimiterCodecError::MaxChunkLengthExceeded => LinesCodecError::MaxLineLengthExceeded,
        AnyDelimiterCodecError::Io(e) => LinesCodecError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::FramedRead;

    use super::*;

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let (a, mut b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            b.write_all(b"ok\r\n\xff\xfehi\nlast").await.unwrap();
        });

        let mut lines = FramedRead::new(a, LossyLinesCodec::new_with_max_length(32));
        assert_eq!(lines.next().await.unwrap().unwrap(), "ok");
        assert_eq!(lines.next().await.unwrap().unwrap(), "\u{FFFD}\u{FFFD}hi");
        assert_eq!(lines.next().await.unwrap().unwrap(), "last");
        assert!(lines.next().await.is_none());
    }

    #[tokio::test]
    async fn test_overlong_line_is_an_error() {
        let (a, mut b) = tokio::io::duplex(256);
        tokio::spawn(async move {
            b.write_all(&[b'x'; 40]).await.unwrap();
            b.write_all(b"\n").await.unwrap();
        });

        let mut lines = FramedRead::new(a, LossyLinesCodec::new_with_max_length(16));
        assert!(matches!(
            lines.next().await.unwrap(),
            Err(LinesCodecError::MaxLineLengthExceeded)
        ));
    }
}
