//! Core types and traits for Top Articles.

use serde::{Deserialize, Serialize};

/// Change of a keyed value: the value it had before (if any) and the value it has now.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Change<K, V> {
    pub key: K,
    pub old: Option<V>,
    pub new: V,
}

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("negative timestamp {0}ms")]
    NegativeTimestamp(i64),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("windowed key too short: {len} bytes")]
    TruncatedKey { len: usize },
    #[error("windowed key is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub mod articles;
pub mod codec;
pub mod config;
pub mod window;

pub use articles::{ArticleFilter, ArticleKey, ArticleView, PageView, RankRecord, ScopeFilter};
pub use codec::{Codec, JsonCodec, WindowedKeyCodec};
pub use config::TopArticlesConfig;
pub use window::{TumblingWindows, Window, WindowedKey};
