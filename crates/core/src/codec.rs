//! Byte codecs for values crossing the store and sink boundaries.

use serde::{de::DeserializeOwned, Serialize};

use crate::window::{TumblingWindows, WindowedKey};
use crate::CoreError;

pub trait Codec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CoreError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, CoreError>;
}

/// JSON encoding for any serde type (windowed keys, rank records, ranked-set snapshots).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact windowed string key: the key's UTF-8 bytes followed by the window start as a
/// big-endian `u64`. The window end is not stored; it is restored from the window size.
#[derive(Debug, Clone, Copy)]
pub struct WindowedKeyCodec {
    windows: TumblingWindows,
}

impl WindowedKeyCodec {
    const START_LEN: usize = std::mem::size_of::<u64>();

    pub fn new(windows: TumblingWindows) -> Self {
        Self { windows }
    }
}

impl Codec<WindowedKey<String>> for WindowedKeyCodec {
    fn encode(&self, value: &WindowedKey<String>) -> Result<Vec<u8>, CoreError> {
        let mut out = Vec::with_capacity(value.key.len() + Self::START_LEN);
        out.extend_from_slice(value.key.as_bytes());
        out.extend_from_slice(&value.window.start_ms.to_be_bytes());
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<WindowedKey<String>, CoreError> {
        if bytes.len() < Self::START_LEN {
            return Err(CoreError::TruncatedKey { len: bytes.len() });
        }
        let (key, start) = bytes.split_at(bytes.len() - Self::START_LEN);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(start);
        let key = String::from_utf8(key.to_vec())?;
        Ok(WindowedKey::new(self.windows.window_at(u64::from_be_bytes(raw)), key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::articles::RankRecord;
    use crate::window::Window;
    use proptest::prelude::*;

    #[test]
    fn json_codec_handles_snapshots() {
        let snapshot = vec![RankRecord::new("P2", "finance", 5), RankRecord::new("P1", "finance", 3)];
        let bytes = JsonCodec.encode(&snapshot).unwrap();
        let decoded: Vec<RankRecord> = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn windowed_key_layout_is_key_then_start() {
        let codec = WindowedKeyCodec::new(TumblingWindows::hourly());
        let key = WindowedKey::new(Window::new(3_600_000, 7_200_000), "tech".to_string());
        let bytes = codec.encode(&key).unwrap();
        assert_eq!(&bytes[..4], b"tech");
        assert_eq!(&bytes[4..], &3_600_000u64.to_be_bytes());
    }

    #[test]
    fn short_input_is_rejected() {
        let codec = WindowedKeyCodec::new(TumblingWindows::hourly());
        assert!(matches!(codec.decode(&[1, 2, 3]), Err(CoreError::TruncatedKey { len: 3 })));
    }

    proptest! {
        #[test]
        fn windowed_keys_roundtrip(hour in 0u64..1_000_000, key in "\\PC{0,24}") {
            let windows = TumblingWindows::hourly();
            let original = WindowedKey::new(windows.window_at(hour * TumblingWindows::ONE_HOUR_MS), key);

            let compact = WindowedKeyCodec::new(windows);
            let decoded = compact.decode(&compact.encode(&original).unwrap()).unwrap();
            prop_assert_eq!(&decoded, &original);

            let decoded: WindowedKey<String> = JsonCodec.decode(&JsonCodec.encode(&original).unwrap()).unwrap();
            prop_assert_eq!(decoded, original);
        }
    }
}
