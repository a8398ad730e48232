use std::fmt::{Debug, Display, Formatter};

use crate::protocol_types::traits::{ReadProt, WriteProt};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[async_trait]
impl ReadProt for u8 {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        let mut buffer = [0; 1];
        stream
            .read_exact(&mut buffer)
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))?;
        Ok(buffer[0])
    }
}

#[async_trait]
impl WriteProt for u8 {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream
            .write_all(&[*self])
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))?;
        Ok(())
    }
}

// Clients historically sent any non-zero byte as true; the strict form is
// kept so corrupt streams surface as protocol errors.
#[async_trait]
impl ReadProt for bool {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        match u8::read(stream).await? {
            0x00 => Ok(false),
            0x01 => Ok(true),
            other => Err(format!("invalid bool byte: {:#04x}", other)),
        }
    }
}

#[async_trait]
impl WriteProt for bool {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        u8::write(&if *self { 0x01 } else { 0x00 }, stream).await
    }
}

#[async_trait]
impl ReadProt for i16 {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        stream
            .read_i16()
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl WriteProt for i16 {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream
            .write_i16(*self)
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl ReadProt for u16 {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        stream
            .read_u16()
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl WriteProt for u16 {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream
            .write_u16(*self)
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl ReadProt for i32 {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        stream
            .read_i32()
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl WriteProt for i32 {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream
            .write_i32(*self)
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl ReadProt for i64 {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        stream
            .read_i64()
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl WriteProt for i64 {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream
            .write_i64(*self)
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl ReadProt for f32 {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        stream
            .read_f32()
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl WriteProt for f32 {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream
            .write_f32(*self)
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl ReadProt for f64 {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        stream
            .read_f64()
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

#[async_trait]
impl WriteProt for f64 {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        stream
            .write_f64(*self)
            .await
            .or_else(|x| Err(format!("IO error: {:?}", x)))
    }
}

/// A protocol string: an `i16` count of UTF-16 code units followed by that
/// many big-endian code units. `MAX` bounds the accepted count on decode.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct McString<const MAX: usize> {
    value: String,
}

impl<const MAX: usize> McString<MAX> {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

impl<const MAX: usize> From<&str> for McString<MAX> {
    fn from(value: &str) -> Self {
        Self {
            value: value.to_owned(),
        }
    }
}

impl<const MAX: usize> From<String> for McString<MAX> {
    fn from(value: String) -> Self {
        Self { value }
    }
}

impl<const MAX: usize> Display for McString<MAX> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<const MAX: usize> Debug for McString<MAX> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

#[async_trait]
impl<const MAX: usize> ReadProt for McString<MAX> {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        let len = i16::read(stream).await?;
        if len < 0 || len as usize > MAX {
            return Err(format!("string length {} out of bounds (max {})", len, MAX));
        }

        let mut units = Vec::with_capacity(len as usize);
        for _ in 0..len {
            units.push(u16::read(stream).await?);
        }
        Ok(Self {
            value: String::from_utf16_lossy(&units),
        })
    }
}

#[async_trait]
impl<const MAX: usize> WriteProt for McString<MAX> {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        // The count is in UTF-16 code units, not Unicode scalars.
        let units: Vec<u16> = self.value.encode_utf16().collect();
        (units.len() as i16).write(stream).await?;
        for unit in units {
            unit.write(stream).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn roundtrip<const MAX: usize>(s: &str) -> Result<McString<MAX>, String> {
        let mut buf: Vec<u8> = vec![];
        McString::<MAX>::from(s).write(&mut buf).await?;
        McString::<MAX>::read(&mut buf.as_slice()).await
    }

    #[tokio::test]
    async fn string_ascii() -> Result<(), String> {
        let decoded = roundtrip::<16>("hello").await?;
        assert_eq!(decoded.as_str(), "hello");
        Ok(())
    }

    #[tokio::test]
    async fn string_empty() -> Result<(), String> {
        let decoded = roundtrip::<16>("").await?;
        assert_eq!(decoded.as_str(), "");
        Ok(())
    }

    #[tokio::test]
    async fn string_bmp() -> Result<(), String> {
        let decoded = roundtrip::<119>("I\u{2665}Special\u{fe4f}Symbols").await?;
        assert_eq!(decoded.as_str(), "I\u{2665}Special\u{fe4f}Symbols");
        Ok(())
    }

    #[tokio::test]
    async fn string_exactly_max() -> Result<(), String> {
        let decoded = roundtrip::<5>("abcde").await?;
        assert_eq!(decoded.as_str(), "abcde");
        Ok(())
    }

    #[tokio::test]
    async fn string_over_max() {
        assert!(roundtrip::<5>("abcdef").await.is_err());
    }

    #[tokio::test]
    async fn string_negative_length() {
        let buf: Vec<u8> = vec![0xff, 0xff];
        assert!(McString::<16>::read(&mut buf.as_slice()).await.is_err());
    }

    #[tokio::test]
    async fn string_wire_layout() -> Result<(), String> {
        let mut buf: Vec<u8> = vec![];
        McString::<16>::from("hi").write(&mut buf).await?;
        assert_eq!(buf, vec![0x00, 0x02, 0x00, 0x68, 0x00, 0x69]);
        Ok(())
    }

    #[tokio::test]
    async fn bool_strict() -> Result<(), String> {
        assert!(!bool::read(&mut [0x00u8].as_slice()).await?);
        assert!(bool::read(&mut [0x01u8].as_slice()).await?);
        assert!(bool::read(&mut [0x02u8].as_slice()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn primitives_big_endian() -> Result<(), String> {
        let mut buf: Vec<u8> = vec![];
        0x0102i16.write(&mut buf).await?;
        0x01020304i32.write(&mut buf).await?;
        assert_eq!(buf, vec![0x01, 0x02, 0x01, 0x02, 0x03, 0x04]);

        let mut buf: Vec<u8> = vec![];
        (-1i64).write(&mut buf).await?;
        assert_eq!(buf, vec![0xff; 8]);

        let mut buf: Vec<u8> = vec![];
        1.5f32.write(&mut buf).await?;
        assert_eq!(buf, 1.5f32.to_be_bytes());
        Ok(())
    }
}
