/// 编解码器实现
///
/// 帧格式：4字节大端长度前缀 + JSON 消息体。长度前缀由 tokio-util 的
/// `LengthDelimitedCodec` 处理，这里只负责消息体。

use super::messages::PmMessage;
use crate::shared::error::PowerMatcherError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tokio_util::codec::LengthDelimitedCodec;

/// 单帧上限 1MB
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// 编解码器trait
pub trait Codec: Send {
    type Item: Send;
    type Error: std::error::Error + Send;

    /// 解码一个完整帧；空帧返回 `None`
    fn decode(&mut self, buf: &[u8]) -> Result<Option<Self::Item>, Self::Error>;

    fn encode(&mut self, item: &Self::Item) -> Result<Bytes, Self::Error>;
}

/// JSON编解码器
pub struct JsonCodec<T> {
    _phantom: PhantomData<T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + for<'de> Deserialize<'de> + Send,
{
    type Item = T;
    type Error = PowerMatcherError;

    fn decode(&mut self, buf: &[u8]) -> Result<Option<Self::Item>, Self::Error> {
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(buf)?))
    }

    fn encode(&mut self, item: &Self::Item) -> Result<Bytes, Self::Error> {
        Ok(Bytes::from(serde_json::to_vec(item)?))
    }
}

/// 协议消息编解码器
pub type MessageCodec = JsonCodec<PmMessage>;

/// 长度前缀分帧器
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}
