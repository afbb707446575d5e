//! DAP wire protocol codec
//!
//! The DAP protocol uses HTTP-style headers followed by JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Largest body we accept from an adapter
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

fn eof_as_crash(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::AdapterCrashed
    } else {
        Error::Io(e)
    }
}

/// Read a DAP message from the stream
///
/// Parses the Content-Length header and reads the JSON body. Not
/// cancellation safe: a dropped call loses its partial frame, so only the
/// client's reader task drives it.
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, Error> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await.map_err(eof_as_crash)?;

        if bytes_read == 0 {
            return Err(Error::AdapterCrashed);
        }

        let line = line.trim();
        if line.is_empty() {
            break;
        }

        // Other headers (Content-Type) are ignored
        if let Some(value) = line.strip_prefix("Content-Length:") {
            content_length = Some(value.trim().parse().map_err(|_| {
                Error::DapProtocol(format!("Invalid Content-Length: {}", value.trim()))
            })?);
        }
    }

    let len = content_length
        .ok_or_else(|| Error::DapProtocol("Missing Content-Length header".to_string()))?;

    if len > MAX_MESSAGE_BYTES {
        return Err(Error::DapProtocol(format!(
            "Content-Length too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(eof_as_crash)?;

    String::from_utf8(body).map_err(|e| Error::DapProtocol(format!("Invalid UTF-8: {}", e)))
}

/// Write a DAP message to the stream
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    json: &str,
) -> Result<(), Error> {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_two_messages_back_to_back() {
        let data = b"Content-Length: 2\r\n\r\n{}Content-Length: 13\r\nContent-Type: application/json\r\n\r\n{\"seq\":2}    ";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        assert_eq!(read_message(&mut reader).await.unwrap(), "{}");
        assert_eq!(read_message(&mut reader).await.unwrap(), "{\"seq\":2}    ");
    }

    #[tokio::test]
    async fn test_missing_length_is_protocol_error() {
        let data = b"Content-Type: application/json\r\n\r\n{}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::DapProtocol(_)));
    }

    #[tokio::test]
    async fn test_truncated_body_means_adapter_crashed() {
        let data = b"Content-Length: 40\r\n\r\n{\"seq\":";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::AdapterCrashed));
    }

    #[tokio::test]
    async fn test_write_message_counts_bytes_not_chars() {
        let mut output = Vec::new();
        write_message(&mut output, "{\"v\":\"é\"}").await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("Content-Length: 10\r\n\r\n"));
    }
}
