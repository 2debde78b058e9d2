//! Wire Protocol
//!
//! JSON frames exchanged with the webview over the realtime socket. Every
//! frame is an envelope `{seq?, event, data}`: inbound events are the
//! `push:*` requests, outbound events are the room broadcasts plus the
//! unicast `init` and `ack`. Field names are camelCase because the webview
//! consumes them as-is.

use serde::{Deserialize, Deserializer, Serialize};

use crate::infrastructure::messenger::ProfileDetails;
use crate::persistence::models::CurrencyRecord;

/// Deserialize a field into `Some(value)` so that an absent field (`None`)
/// stays distinguishable from an explicit `null` (`Some(None)`).
fn tri_state<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Inbound frame: an optional client-chosen sequence number plus the request
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub request: ClientRequest,
}

/// One variant per named client event, validated by serde at the boundary
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientRequest {
    #[serde(rename = "push:user:join")]
    Join(JoinRequest),
    #[serde(rename = "push:title:update")]
    TitleUpdate(TitleUpdateRequest),
    #[serde(rename = "push:item:add")]
    ItemAdd(ItemAddRequest),
    #[serde(rename = "push:item:update")]
    ItemUpdate(ItemUpdateRequest),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub sender_id: i64,
    pub portfolio_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleUpdateRequest {
    pub portfolio_id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemAddRequest {
    #[serde(default)]
    pub sender_id: Option<i64>,
    pub portfolio_id: i64,
    pub name: String,
    pub ticker: String,
    pub value: f64,
    pub value_currency: String,
}

/// Merge-patch request for an existing item. Absent fields are preserved;
/// `completerFbId` distinguishes absent (preserve) from `null` (re-open)
/// from a user id (completed by that user).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdateRequest {
    pub portfolio_id: i64,
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub value_currency: Option<String>,
    #[serde(default, deserialize_with = "tri_state")]
    pub completer_fb_id: Option<Option<i64>>,
}

/// Outbound frame, serialized as `{event, data}`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full portfolio snapshot, unicast to a connection that just joined
    #[serde(rename = "init")]
    Init(InitPayload),
    #[serde(rename = "title:update")]
    TitleUpdate(String),
    #[serde(rename = "item:add")]
    ItemAdd(CurrencyRecord),
    #[serde(rename = "item:update")]
    ItemUpdate(CurrencyRecord),
    #[serde(rename = "user:join")]
    UserJoin(MemberProfile),
    #[serde(rename = "users:setOnline")]
    UsersSetOnline(Vec<i64>),
    #[serde(rename = "portfolio:setOwnerId")]
    PortfolioSetOwnerId(i64),
    /// Request acknowledgment, unicast to the requester only
    #[serde(rename = "ack")]
    Ack(Ack),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    pub id: i64,
    pub title: String,
    pub items: Vec<CurrencyRecord>,
    pub users: Vec<MemberProfile>,
    pub owner_id: i64,
}

/// A portfolio member as the webview renders it: platform profile plus the
/// live online flag
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub fb_id: i64,
    pub name: String,
    pub profile_pic: Option<String>,
    pub online: bool,
}

impl MemberProfile {
    pub fn new(details: ProfileDetails, online: bool) -> Self {
        Self {
            fb_id: details.fb_id,
            name: details.name,
            profile_pic: details.profile_pic,
            online,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub status: AckStatus,
}

/// The status strings a request is acknowledged with. Anything that is not
/// `ok` or `noportfolio` collapses to the opaque `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    NoPortfolio,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_request_parses() {
        let envelope: Envelope = serde_json::from_value(json!({
            "seq": 7,
            "event": "push:user:join",
            "data": {"senderId": 100, "portfolioId": 3}
        }))
        .unwrap();

        assert_eq!(envelope.seq, Some(7));
        match envelope.request {
            ClientRequest::Join(join) => {
                assert_eq!(join.sender_id, 100);
                assert_eq!(join.portfolio_id, 3);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_seq_is_optional() {
        let envelope: Envelope = serde_json::from_value(json!({
            "event": "push:title:update",
            "data": {"portfolioId": 1}
        }))
        .unwrap();

        assert_eq!(envelope.seq, None);
        match envelope.request {
            ClientRequest::TitleUpdate(update) => {
                assert_eq!(update.portfolio_id, 1);
                assert_eq!(update.title, None);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_item_update_completer_is_tri_state() {
        let absent: ItemUpdateRequest = serde_json::from_value(json!({
            "portfolioId": 1, "id": 9
        }))
        .unwrap();
        assert_eq!(absent.completer_fb_id, None);

        let cleared: ItemUpdateRequest = serde_json::from_value(json!({
            "portfolioId": 1, "id": 9, "completerFbId": null
        }))
        .unwrap();
        assert_eq!(cleared.completer_fb_id, Some(None));

        let set: ItemUpdateRequest = serde_json::from_value(json!({
            "portfolioId": 1, "id": 9, "completerFbId": 200
        }))
        .unwrap();
        assert_eq!(set.completer_fb_id, Some(Some(200)));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = serde_json::from_value::<Envelope>(json!({
            "event": "push:item:delete",
            "data": {"portfolioId": 1, "id": 9}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_events_serialize_with_colon_tags() {
        let online = serde_json::to_value(ServerEvent::UsersSetOnline(vec![100, 200])).unwrap();
        assert_eq!(online, json!({"event": "users:setOnline", "data": [100, 200]}));

        let owner = serde_json::to_value(ServerEvent::PortfolioSetOwnerId(100)).unwrap();
        assert_eq!(owner, json!({"event": "portfolio:setOwnerId", "data": 100}));

        let title = serde_json::to_value(ServerEvent::TitleUpdate("Alts".into())).unwrap();
        assert_eq!(title, json!({"event": "title:update", "data": "Alts"}));
    }

    #[test]
    fn test_ack_statuses_serialize_as_known_strings() {
        let ack = serde_json::to_value(ServerEvent::Ack(Ack {
            seq: Some(3),
            status: AckStatus::NoPortfolio,
        }))
        .unwrap();
        assert_eq!(ack, json!({"event": "ack", "data": {"seq": 3, "status": "noportfolio"}}));

        let bare = serde_json::to_value(Ack {
            seq: None,
            status: AckStatus::Error,
        })
        .unwrap();
        assert_eq!(bare, json!({"status": "error"}));
    }
}
