//! Varint length-prefixed frames.
//!
//! Reads consume exactly one frame and nothing past it, so the stream can be
//! handed to the application untouched after the handshake.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use unsigned_varint::{decode, encode};

use crate::HandshakeError;

/// Longest encoded `usize` varint.
const MAX_PREFIX_LEN: usize = 10;

pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_len: usize) -> Result<(), HandshakeError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > max_len {
        return Err(HandshakeError::FrameTooLarge(payload.len(), max_len));
    }

    let mut buf = encode::usize_buffer();
    let prefix = encode::usize(payload.len(), &mut buf);
    writer.write_all(prefix).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, HandshakeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = Vec::with_capacity(MAX_PREFIX_LEN);
    loop {
        let byte = reader.read_u8().await?;
        prefix.push(byte);
        if decode::is_last(byte) {
            break;
        }
        if prefix.len() == MAX_PREFIX_LEN {
            return Err(HandshakeError::LengthPrefix(decode::Error::Overflow));
        }
    }

    let (len, _) = decode::usize(&prefix)?;
    if len > max_len {
        return Err(HandshakeError::FrameTooLarge(len, max_len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn test_frame_leaves_rest_of_stream() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, b"identity", 64).await.unwrap();
        a.write_all(b"application bytes").await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b, 64).await.unwrap(), b"identity");

        let mut rest = Vec::new();
        b.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"application bytes");
    }

    #[tokio::test]
    async fn test_multibyte_prefix() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let payload = vec![7u8; 300];

        write_frame(&mut a, &payload, 1024).await.unwrap();
        assert_eq!(read_frame(&mut b, 1024).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        assert_matches!(
            write_frame(&mut a, &[0u8; 65], 64).await,
            Err(HandshakeError::FrameTooLarge(65, 64))
        );

        write_frame(&mut a, &[0u8; 65], 128).await.unwrap();
        assert_matches!(
            read_frame(&mut b, 64).await,
            Err(HandshakeError::FrameTooLarge(65, 64))
        );
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[5, 1, 2]).await.unwrap();
        drop(a);

        assert_matches!(read_frame(&mut b, 64).await, Err(HandshakeError::Io(_)));
    }
}
