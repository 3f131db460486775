//! # Decoders
//!
//! Turn fetched bytes into the value a subscriber asked for. Decoding runs
//! once per subscriber, so the decoded type does not need to be `Clone`.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct DecodeError(String);

impl DecodeError {
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

pub trait Decoder: Send + 'static {
    type Output: Send + 'static;

    fn decode(&self, bytes: Bytes) -> Result<Self::Output, DecodeError>;
}

/// Hands the payload through untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesDecoder;

impl Decoder for BytesDecoder {
    type Output = Bytes;

    fn decode(&self, bytes: Bytes) -> Result<Bytes, DecodeError> {
        Ok(bytes)
    }
}

/// UTF-8 text
#[derive(Debug, Default, Clone, Copy)]
pub struct TextDecoder;

impl Decoder for TextDecoder {
    type Output = String;

    fn decode(&self, bytes: Bytes) -> Result<String, DecodeError> {
        String::from_utf8(bytes.to_vec()).map_err(DecodeError::new)
    }
}

/// JSON document deserialized into `T`
pub struct JsonDecoder<T>(PhantomData<fn() -> T>);

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonDecoder")
    }
}

impl<T> Decoder for JsonDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn decode(&self, bytes: Bytes) -> Result<T, DecodeError> {
        serde_json::from_slice(&bytes).map_err(DecodeError::new)
    }
}

/// Adapter for decoding closures, see [`decode_with`]
#[derive(Clone)]
pub struct FnDecoder<F>(F);

impl<F, T> Decoder for FnDecoder<F>
where
    F: Fn(Bytes) -> Result<T, DecodeError> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn decode(&self, bytes: Bytes) -> Result<T, DecodeError> {
        (self.0)(bytes)
    }
}

/// Use a closure as a decoder
pub fn decode_with<F, T>(f: F) -> FnDecoder<F>
where
    F: Fn(Bytes) -> Result<T, DecodeError> + Send + 'static,
    T: Send + 'static,
{
    FnDecoder(f)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[test]
    fn test_text_decoder() {
        assert_eq!(
            TextDecoder.decode(Bytes::from_static(b"hello")).unwrap(),
            "hello"
        );
        assert!(TextDecoder.decode(Bytes::from_static(&[0xff, 0xfe])).is_err());
    }

    #[test]
    fn test_json_decoder() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Manifest {
            name: String,
            size: u64,
        }

        let decoder = JsonDecoder::<Manifest>::new();
        let value = decoder
            .decode(Bytes::from_static(br#"{"name":"ui","size":3}"#))
            .unwrap();
        assert_eq!(
            value,
            Manifest {
                name: "ui".to_string(),
                size: 3
            }
        );
        assert!(decoder.decode(Bytes::from_static(b"{")).is_err());
    }

    #[test]
    fn test_closure_decoder() {
        let decoder = decode_with(|bytes: Bytes| {
            if bytes.is_empty() {
                Err(DecodeError::new("empty payload"))
            } else {
                Ok(bytes.len())
            }
        });

        assert_eq!(decoder.decode(Bytes::from_static(b"abc")).unwrap(), 3);
        assert_eq!(
            decoder.decode(Bytes::new()).unwrap_err().to_string(),
            "empty payload"
        );
    }
}
