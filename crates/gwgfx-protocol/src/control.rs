//! Control messages: text JSON exchanged over the gateway's control channel (§6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Connect {
        host: String,
        port: u16,
        username: String,
        password: String,
        width: u32,
        height: u32,
        #[serde(rename = "progressiveEnabled")]
        progressive_enabled: bool,
    },
    Disconnect,
    Resize {
        width: u32,
        height: u32,
    },
    Mouse {
        action: MouseAction,
        x: i32,
        y: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        button: Option<u8>,
        #[serde(rename = "deltaX", skip_serializing_if = "Option::is_none")]
        delta_x: Option<i32>,
        #[serde(rename = "deltaY", skip_serializing_if = "Option::is_none")]
        delta_y: Option<i32>,
    },
    Key {
        action: KeyAction,
        key: String,
        code: String,
        #[serde(rename = "keyCode")]
        key_code: u32,
        #[serde(rename = "ctrlKey")]
        ctrl_key: bool,
        #[serde(rename = "shiftKey")]
        shift_key: bool,
        #[serde(rename = "altKey")]
        alt_key: bool,
        #[serde(rename = "metaKey")]
        meta_key: bool,
    },
    Keycombo {
        combo: String,
    },
    Ping,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MouseAction {
    Move,
    Down,
    Up,
    Wheel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Down,
    Up,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Connected { width: u32, height: u32 },
    Disconnected,
    Resize { width: u32, height: u32 },
    Pong,
    Error { message: String },
}

impl ClientMessage {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_round_trips_through_json() {
        let msg = ClientMessage::Connect {
            host: "10.0.0.5".to_owned(),
            port: 3389,
            username: "alice".to_owned(),
            password: "hunter2".to_owned(),
            width: 1920,
            height: 1080,
            progressive_enabled: true,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let decoded = ClientMessage::from_json(&json).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn mouse_move_omits_absent_optional_fields() {
        let msg = ClientMessage::Mouse {
            action: MouseAction::Move,
            x: 10,
            y: 20,
            button: None,
            delta_x: None,
            delta_y: None,
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("button"));
        assert!(!json.contains("deltaX"));
    }

    #[test]
    fn server_error_serializes_with_message() {
        let msg = ServerMessage::Error {
            message: "decode failure".to_owned(),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("decode failure"));
    }

    #[test]
    fn ping_pong_round_trip() {
        let json = serde_json::to_string(&ClientMessage::Ping).unwrap();
        let decoded: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, ClientMessage::Ping);
    }
}
