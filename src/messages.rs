//! Message shapes exchanged with the observer

use crate::config::Settings;
use crate::cookies::Cookie;
use crate::store::{EnablementMap, StatusMap};
use serde::{Deserialize, Serialize};

/// Unsolicited notifications pushed to the observer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    CookieCheckResult {
        #[serde(rename = "cookieExists")]
        cookie_exists: bool,
    },
    CheckinError {
        errors: Vec<String>,
    },
    CheckinStatusUpdate {
        #[serde(rename = "checkinStatus")]
        checkin_status: StatusMap,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::CookieCheckResult { .. } => "COOKIE_CHECK_RESULT",
            Message::CheckinError { .. } => "CHECKIN_ERROR",
            Message::CheckinStatusUpdate { .. } => "CHECKIN_STATUS_UPDATE",
        }
    }
}

/// Requests the observer may send
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    CheckCookie,
    RunCheckins,
    GetConfig,
    SetEnabledItems {
        #[serde(rename = "enabledItems")]
        enabled_items: EnablementMap,
    },
    GetState,
}

/// Replies to [`Request`]s
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    CookieCheck {
        success: bool,
        #[serde(rename = "cookieExists")]
        cookie_exists: bool,
        cookie: Option<Cookie>,
    },
    Config {
        success: bool,
        config: Box<Settings>,
    },
    State {
        success: bool,
        #[serde(rename = "enabledItems")]
        enabled_items: EnablementMap,
        #[serde(rename = "checkinStatus")]
        checkin_status: StatusMap,
    },
    Failure {
        success: bool,
        error: String,
    },
    Ack {
        success: bool,
    },
}

impl Response {
    pub fn ack(success: bool) -> Self {
        Response::Ack { success }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Response::Failure {
            success: false,
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Response::CookieCheck { success, .. }
            | Response::Config { success, .. }
            | Response::State { success, .. }
            | Response::Failure { success, .. }
            | Response::Ack { success } => *success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_message_shapes() {
        let message = Message::CookieCheckResult { cookie_exists: false };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "COOKIE_CHECK_RESULT", "cookieExists": false})
        );

        let message = Message::CheckinError {
            errors: vec!["API not OK for item 2 (500)".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "CHECKIN_ERROR", "errors": ["API not OK for item 2 (500)"]})
        );

        let mut status = StatusMap::new();
        status.insert("1".to_string(), true);
        let message = Message::CheckinStatusUpdate { checkin_status: status };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "CHECKIN_STATUS_UPDATE", "checkinStatus": {"1": true}})
        );
        assert_eq!(message.kind(), "CHECKIN_STATUS_UPDATE");
    }

    #[test]
    fn test_request_parsing() {
        let request: Request = serde_json::from_str(r#"{"type":"CHECK_COOKIE"}"#).unwrap();
        assert_eq!(request, Request::CheckCookie);

        let request: Request = serde_json::from_str(r#"{"type":"RUN_CHECKINS"}"#).unwrap();
        assert_eq!(request, Request::RunCheckins);

        let request: Request =
            serde_json::from_str(r#"{"type":"SET_ENABLED_ITEMS","enabledItems":{"3":false}}"#)
                .unwrap();
        match request {
            Request::SetEnabledItems { enabled_items } => {
                assert_eq!(enabled_items.get("3"), Some(&false));
            }
            other => panic!("unexpected request {:?}", other),
        }

        assert!(serde_json::from_str::<Request>(r#"{"type":"REBOOT"}"#).is_err());
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(
            serde_json::to_value(Response::ack(true)).unwrap(),
            json!({"success": true})
        );

        let response = Response::CookieCheck {
            success: true,
            cookie_exists: false,
            cookie: None,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": true, "cookieExists": false, "cookie": null})
        );

        let response = Response::failure("agent stopped");
        assert!(!response.is_success());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": false, "error": "agent stopped"})
        );
    }
}
