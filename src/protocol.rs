//! Wire protocol between the daemon and page contexts.
//!
//! Messages are JSON, one per line, over the daemon's Unix socket.

use serde::Deserialize;
use serde::Serialize;

/// Overlay command broadcast from the controller to every page context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OverlayCommand {
    Lock,
    Unlock,
}

/// Request sent by a page context to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Submit a password attempt for verification.
    VerifyPassword { password: String },
    /// Ask whether the controller currently considers itself locked.
    ///
    /// Used by late-joining contexts to sync their overlay on load.
    IsLocked,
}

/// Reply to a `verifyPassword` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReply {
    pub ok: bool,
}

/// Reply to an `isLocked` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStateReply {
    pub is_locked: bool,
}

/// Any message the daemon writes to a connected context.
///
/// Untagged: the three shapes are disjoint (`action` vs `ok` vs `isLocked`),
/// matching the original wire format exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Command(OverlayCommand),
    Verify(VerifyReply),
    LockState(LockStateReply),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        assert_eq!(
            serde_json::to_string(&OverlayCommand::Lock).unwrap(),
            r#"{"action":"lock"}"#
        );
        assert_eq!(
            serde_json::to_string(&OverlayCommand::Unlock).unwrap(),
            r#"{"action":"unlock"}"#
        );
    }

    #[test]
    fn test_request_wire_format() {
        let req: Request = serde_json::from_str(
            r#"{"type":"verifyPassword","password":"1234"}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            Request::VerifyPassword {
                password: "1234".to_string()
            }
        );

        let req: Request = serde_json::from_str(r#"{"type":"isLocked"}"#).unwrap();
        assert_eq!(req, Request::IsLocked);
    }

    #[test]
    fn test_reply_wire_format() {
        assert_eq!(
            serde_json::to_string(&VerifyReply { ok: false }).unwrap(),
            r#"{"ok":false}"#
        );
        assert_eq!(
            serde_json::to_string(&LockStateReply { is_locked: true }).unwrap(),
            r#"{"isLocked":true}"#
        );
    }

    #[test]
    fn test_server_message_untagged_roundtrip() {
        let msg: ServerMessage = serde_json::from_str(r#"{"action":"lock"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Command(OverlayCommand::Lock));

        let msg: ServerMessage = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert_eq!(msg, ServerMessage::Verify(VerifyReply { ok: true }));

        let msg: ServerMessage = serde_json::from_str(r#"{"isLocked":false}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::LockState(LockStateReply { is_locked: false })
        );
    }

    #[test]
    fn test_malformed_request_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"type":"noop"}"#).is_err());
        assert!(serde_json::from_str::<Request>("not json").is_err());
    }
}
