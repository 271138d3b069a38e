//! Newline-delimited text frames
//!
//! Peer links carry one base64 frame per line. Base64 never contains a
//! newline, so no escaping is needed.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::{TransportError, TransportResult};

/// Largest accepted frame, excluding the terminator
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Reads one frame per line from a byte stream
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader
    pub fn new(reader: R) -> Self {
        FrameReader {
            inner: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` on a clean end of stream. A trailing frame without
    /// a terminator is still returned.
    pub async fn next_frame(&mut self) -> TransportResult<Option<String>> {
        self.buf.clear();

        let n = (&mut self.inner)
            .take(MAX_FRAME_LEN as u64 + 1)
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

        if n == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        } else if self.buf.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge {
                limit: MAX_FRAME_LEN,
            });
        }

        String::from_utf8(std::mem::take(&mut self.buf))
            .map(Some)
            .map_err(|e| TransportError::InvalidData(e.to_string()))
    }
}

/// Write one frame followed by a newline, then flush
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &str) -> TransportResult<()> {
    if frame.contains('\n') {
        return Err(TransportError::InvalidData(
            "frame contains a newline".to_string(),
        ));
    }

    let send = |e: std::io::Error| TransportError::SendFailed(e.to_string());
    writer.write_all(frame.as_bytes()).await.map_err(send)?;
    writer.write_all(b"\n").await.map_err(send)?;
    writer.flush().await.map_err(send)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut client_write) = tokio::io::split(client);
        let (server_read, _) = tokio::io::split(server);

        write_frame(&mut client_write, "first").await.unwrap();
        write_frame(&mut client_write, "second").await.unwrap();
        drop(client_write);

        let mut reader = FrameReader::new(server_read);
        assert_eq!(reader.next_frame().await.unwrap().as_deref(), Some("first"));
        assert_eq!(reader.next_frame().await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let mut reader = FrameReader::new(&b""[..]);
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crlf_and_unterminated_tail() {
        let mut reader = FrameReader::new(&b"one\r\ntwo"[..]);
        assert_eq!(reader.next_frame().await.unwrap().as_deref(), Some("one"));
        assert_eq!(reader.next_frame().await.unwrap().as_deref(), Some("two"));
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_consumed() {
        let mut reader = FrameReader::new(&b"\xff\xfe\nnext\n"[..]);
        assert!(matches!(
            reader.next_frame().await,
            Err(TransportError::InvalidData(_))
        ));
        assert_eq!(reader.next_frame().await.unwrap().as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let data = vec![b'A'; MAX_FRAME_LEN + 10];
        let mut reader = FrameReader::new(&data[..]);
        assert!(matches!(
            reader.next_frame().await,
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_frame_at_limit_accepted() {
        let mut data = vec![b'A'; MAX_FRAME_LEN];
        data.push(b'\n');
        let mut reader = FrameReader::new(&data[..]);
        assert_eq!(reader.next_frame().await.unwrap().unwrap().len(), MAX_FRAME_LEN);
    }

    #[tokio::test]
    async fn test_newline_in_frame_refused() {
        let mut sink = Vec::new();
        assert!(write_frame(&mut sink, "a\nb").await.is_err());
        assert!(sink.is_empty());
    }
}
