// rust_websocket_utils/src/message.rs

//! 定义 WebSocket 通信中使用的核心消息结构。
//!
//! 所有入站与出站流量都使用同一个带类型标签的信封 `{type, data, timestamp}`。
//! 保留类型：`ping`/`pong` 用于延迟测量，`raw` 承载非结构化文本（日志行）。
//! 其他类型对本库而言是不透明的负载，原样转交给订阅者。

use crate::error::WsError;
use chrono::Utc;
use common_models::ws_payloads::RAW_MESSAGE_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `TypedMessage` 代表客户端与后端之间交换的标准消息信封。
///
/// # 字段
/// - `message_type`: 序列化为 `type`，决定订阅者如何解释 `data`。
/// - `data`: 任意 JSON 负载。
/// - `timestamp`: 毫秒级 UTC 时间戳；后端省略时取接收时间。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TypedMessage {
    #[serde(rename = "type")]
    pub message_type: String,

    #[serde(default)]
    pub data: Value,

    #[serde(default = "now_millis")]
    pub timestamp: i64,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl TypedMessage {
    /// 创建一个新的消息，`data` 由任意可序列化的值转换而来，时间戳取当前时间。
    pub fn new<T: Serialize>(message_type: impl Into<String>, data: &T) -> Result<Self, WsError> {
        let data = serde_json::to_value(data)
            .map_err(|e| WsError::SerializationError(format!("创建 TypedMessage 时序列化负载失败: {}", e)))?;
        Ok(Self {
            message_type: message_type.into(),
            data,
            timestamp: now_millis(),
        })
    }

    /// 把一段非结构化文本包装成 `raw` 消息。
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            message_type: RAW_MESSAGE_TYPE.to_string(),
            data: Value::String(text.into()),
            timestamp: now_millis(),
        }
    }

    pub fn is_type(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }

    /// 若 `data` 是字符串（`raw` 消息的常见形态）则返回其内容。
    pub fn as_raw_text(&self) -> Option<&str> {
        self.data.as_str()
    }

    /// 将 `data` 反序列化为指定的目标类型 `T`。
    pub fn deserialize_data<T: DeserializeOwned>(&self) -> Result<T, WsError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            WsError::DeserializationError(format!(
                "类型为 '{}' 的消息负载反序列化失败: {}",
                self.message_type, e
            ))
        })
    }

    /// 编码成可直接写入 WebSocket 的文本帧。
    pub fn to_frame(&self) -> Result<String, WsError> {
        serde_json::to_string(self)
            .map_err(|e| WsError::SerializationError(format!("消息序列化为JSON失败: {}", e)))
    }

    /// 解码一个入站文本帧。
    ///
    /// - 以 `{` 或 `[` 开头的帧必须是合法的信封，否则视为格式错误并返回 `DeserializationError`；
    /// - 其余文本（纯日志行）包装成 `raw` 消息。
    pub fn decode_frame(frame: &str) -> Result<Self, WsError> {
        let trimmed = frame.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            serde_json::from_str::<TypedMessage>(trimmed).map_err(|e| {
                WsError::DeserializationError(format!(
                    "收到的文本帧无法解析为 TypedMessage: {}, 原始文本: '{}'",
                    e,
                    truncate(frame, 120)
                ))
            })
        } else {
            Ok(Self::raw(frame))
        }
    }
}

/// 辅助函数，用于截断字符串以便在日志中显示摘要。
pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let cut: String = s.chars().take(max_len).collect();
        format!("{}... (truncated)", cut)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_models::ws_payloads::{PingPayload, PING_MESSAGE_TYPE};
    use serde_json::json;

    #[test]
    /// 信封字段 `message_type` 在线上的名字是 `type`。
    fn test_envelope_uses_type_field_on_the_wire() {
        let msg = TypedMessage::new(PING_MESSAGE_TYPE, &PingPayload { id: "p-1".into() })
            .expect("创建 ping 消息失败");
        let frame = msg.to_frame().expect("编码失败");
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "ping");
        assert_eq!(value["data"]["id"], "p-1");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_decode_backend_envelope_keeps_opaque_data() {
        let frame = r#"{"type":"service-update","data":{"name":"lobby-1","state":"ONLINE"},"timestamp":1700000000000}"#;
        let msg = TypedMessage::decode_frame(frame).expect("解码失败");
        assert_eq!(msg.message_type, "service-update");
        assert_eq!(msg.data, json!({"name": "lobby-1", "state": "ONLINE"}));
        assert_eq!(msg.timestamp, 1_700_000_000_000);
    }

    #[test]
    /// 缺失 `data` 与 `timestamp` 时使用默认值。
    fn test_decode_envelope_with_missing_optional_fields() {
        let msg = TypedMessage::decode_frame(r#"{"type":"pong"}"#).expect("解码失败");
        assert!(msg.is_type("pong"));
        assert_eq!(msg.data, Value::Null);
        assert!(msg.timestamp > 0);
    }

    #[test]
    /// 纯文本日志行被包装成 `raw` 消息。
    fn test_plain_text_frame_becomes_raw_message() {
        let line = "[12:00:01 INFO]: Done (1.532s)! For help, type \"help\"";
        let msg = TypedMessage::decode_frame(line).expect("纯文本不应解码失败");
        assert!(msg.is_type(RAW_MESSAGE_TYPE));
        assert_eq!(msg.as_raw_text(), Some(line));
    }

    #[test]
    /// 看起来像 JSON 却不是合法信封的帧被判定为格式错误。
    fn test_malformed_json_frame_is_rejected() {
        for frame in [r#"{"type": "#, r#"{"data": 1}"#, "[1,2,3]"] {
            match TypedMessage::decode_frame(frame) {
                Err(WsError::DeserializationError(_)) => {}
                other => panic!("帧 '{}' 预期为 DeserializationError，实际: {:?}", frame, other),
            }
        }
    }

    #[test]
    fn test_deserialize_data_to_mismatched_type_fails() {
        #[derive(Deserialize, Debug)]
        struct Expected {
            #[allow(dead_code)]
            count: u32,
        }
        let msg = TypedMessage::raw("not an object");
        assert!(matches!(msg.deserialize_data::<Expected>(), Err(WsError::DeserializationError(_))));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "日志".repeat(100);
        let t = truncate(&s, 10);
        assert!(t.starts_with(&"日志".repeat(5)));
        assert!(t.ends_with("(truncated)"));
    }
}
