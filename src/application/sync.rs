//! Sync Protocol Handler
//!
//! The event state machine keeping every connected webview consistent with
//! one shared portfolio. Per connection the state is `Unjoined` until a
//! successful join, then `Joined(portfolio, user)` until disconnect; the
//! Presence Registry is the single source of that state.
//!
//! Each request resolves to an acknowledgment status for the requester and,
//! on success, a broadcast to the portfolio's room. Requests from a single
//! connection are handled in arrival order by its read loop; nothing is
//! ordered across connections, so concurrent updates to the same item are
//! last-write-wins.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::application::protocol::{
    Ack, AckStatus, ClientRequest, Envelope, InitPayload, ItemAddRequest, ItemUpdateRequest,
    JoinRequest, MemberProfile, ServerEvent, TitleUpdateRequest,
};
use crate::application::rooms::{EventSender, RoomRegistry};
use crate::domain::errors::SyncError;
use crate::domain::presence::{ConnectionId, PresenceEntry, PresenceRegistry};
use crate::infrastructure::messenger::{SendApi, UserProfileApi};
use crate::persistence::models::{CurrencyPatch, MembershipRecord, NewCurrency};
use crate::persistence::repository::{CurrencyRepository, PortfolioRepository, UserRepository};
use crate::persistence::DbPool;

/// Protocol handler shared by every connection's read loop
pub struct SyncHandler {
    portfolios: PortfolioRepository,
    currencies: CurrencyRepository,
    users: UserRepository,
    presence: Arc<PresenceRegistry>,
    rooms: Arc<RoomRegistry>,
    profiles: Arc<dyn UserProfileApi>,
    send_api: Arc<dyn SendApi>,
}

impl SyncHandler {
    pub fn new(
        pool: DbPool,
        presence: Arc<PresenceRegistry>,
        rooms: Arc<RoomRegistry>,
        profiles: Arc<dyn UserProfileApi>,
        send_api: Arc<dyn SendApi>,
    ) -> Self {
        Self {
            portfolios: PortfolioRepository::new(pool.clone()),
            currencies: CurrencyRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            presence,
            rooms,
            profiles,
            send_api,
        }
    }

    /// Handle one inbound envelope and acknowledge it to the requester
    pub async fn handle_request(
        &self,
        conn: ConnectionId,
        sender: &EventSender,
        envelope: Envelope,
    ) {
        let result = match envelope.request {
            ClientRequest::Join(request) => self.join(conn, sender, request).await,
            ClientRequest::TitleUpdate(request) => self.update_title(conn, request).await,
            ClientRequest::ItemAdd(request) => self.add_item(conn, request).await,
            ClientRequest::ItemUpdate(request) => self.update_item(conn, request).await,
        };

        let status = match result {
            Ok(status) => status,
            Err(SyncError::PortfolioNotFound(id)) => {
                info!("Join rejected, portfolio {} does not exist", id);
                AckStatus::NoPortfolio
            }
            Err(e) => {
                error!("Request on connection {} failed: {}", conn, e);
                AckStatus::Error
            }
        };

        self.ack(sender, envelope.seq, status);
    }

    /// Acknowledge a frame that never made it past parsing
    pub fn reject_unparsed(&self, sender: &EventSender, seq: Option<u64>) {
        self.ack(sender, seq, AckStatus::Error);
    }

    fn ack(&self, sender: &EventSender, seq: Option<u64>, status: AckStatus) {
        // The requester may already be gone, which is fine
        let _ = sender.send(ServerEvent::Ack(Ack { seq, status }));
    }

    /// `push:user:join`: find-or-create the user, ensure membership (the
    /// first member becomes owner), record presence, enter the room, then
    /// unicast the full snapshot.
    async fn join(
        &self,
        conn: ConnectionId,
        sender: &EventSender,
        request: JoinRequest,
    ) -> Result<AckStatus, SyncError> {
        let portfolio = self
            .portfolios
            .get(request.portfolio_id)
            .await?
            .ok_or(SyncError::PortfolioNotFound(request.portfolio_id))?;

        let user = self.users.find_or_create(request.sender_id).await?;
        let owner_before = self.portfolios.get_owner(portfolio.id).await?;
        let membership = self.portfolios.add_member(portfolio.id, user.fb_id).await?;

        // A freshly minted owner is announced to whoever is already in the
        // room, and the owner gets the Send API notification. Emitted before
        // the joiner enters the room, so the joiner only learns the owner
        // from its init snapshot.
        if owner_before.is_none() && membership.owner {
            if let Err(e) = self
                .send_api
                .portfolio_created(user.fb_id, portfolio.id, &portfolio.title)
                .await
            {
                warn!("portfolio_created notification failed: {}", e);
            }
            self.rooms
                .broadcast(portfolio.id, ServerEvent::PortfolioSetOwnerId(user.fb_id))
                .await;
        }

        // Re-join: presence moves to the new portfolio and the old room
        // learns this user went offline there
        let previous = self.presence.get(conn).await;
        self.presence.record(conn, user.fb_id, portfolio.id).await;
        self.rooms.join(conn, portfolio.id, sender.clone()).await;
        if let Some(prev) = previous {
            if prev.portfolio_id != portfolio.id {
                let still_online = self.presence.online_user_ids(prev.portfolio_id).await;
                self.rooms
                    .broadcast(prev.portfolio_id, ServerEvent::UsersSetOnline(still_online))
                    .await;
            }
        }

        let members = self.portfolios.get_members(portfolio.id).await?;
        let profiles = self.member_profiles(&members, portfolio.id).await;

        let viewer = profiles
            .iter()
            .find(|profile| profile.fb_id == user.fb_id)
            .cloned()
            .unwrap_or_else(|| MemberProfile {
                fb_id: user.fb_id,
                name: user.fb_id.to_string(),
                profile_pic: None,
                online: true,
            });
        self.rooms
            .broadcast_except(portfolio.id, conn, ServerEvent::UserJoin(viewer))
            .await;

        let items = self.currencies.get_for_portfolio(portfolio.id).await?;
        let owner_id = if membership.owner {
            user.fb_id
        } else {
            owner_before
                .map(|owner| owner.user_fb_id)
                .unwrap_or(user.fb_id)
        };

        // The joiner may have dropped off while the store calls ran; a
        // failed unicast is then a normal no-op
        let _ = sender.send(ServerEvent::Init(InitPayload {
            id: portfolio.id,
            title: portfolio.title,
            items,
            users: profiles,
            owner_id,
        }));

        debug!(
            "Connection {} joined portfolio {} as user {}",
            conn, portfolio.id, user.fb_id
        );
        Ok(AckStatus::Ok)
    }

    /// `push:title:update`: persist (clearing resets to the default) and
    /// tell the room, requester included.
    async fn update_title(
        &self,
        conn: ConnectionId,
        request: TitleUpdateRequest,
    ) -> Result<AckStatus, SyncError> {
        let entry = self.joined(conn, request.portfolio_id).await?;

        let portfolio = self
            .portfolios
            .set_title(entry.portfolio_id, request.title.as_deref())
            .await?;

        self.rooms
            .broadcast(entry.portfolio_id, ServerEvent::TitleUpdate(portfolio.title))
            .await;
        Ok(AckStatus::Ok)
    }

    /// `push:item:add`: insert an item owned by the sender and fan it out
    async fn add_item(
        &self,
        conn: ConnectionId,
        request: ItemAddRequest,
    ) -> Result<AckStatus, SyncError> {
        let entry = self.joined(conn, request.portfolio_id).await?;

        if let Some(sender_id) = request.sender_id {
            if sender_id != entry.user_fb_id {
                return Err(SyncError::Validation(format!(
                    "senderId {} does not match joined user {}",
                    sender_id, entry.user_fb_id
                )));
            }
        }
        if !request.value.is_finite() {
            return Err(SyncError::Validation("value must be finite".into()));
        }

        let item = self
            .currencies
            .create(NewCurrency {
                portfolio_id: entry.portfolio_id,
                name: request.name,
                ticker: request.ticker,
                value: request.value,
                value_currency: request.value_currency,
                owner_fb_id: entry.user_fb_id,
            })
            .await?;

        self.rooms
            .broadcast(entry.portfolio_id, ServerEvent::ItemAdd(item))
            .await;
        Ok(AckStatus::Ok)
    }

    /// `push:item:update`: merge-patch the item and fan out its new state
    async fn update_item(
        &self,
        conn: ConnectionId,
        request: ItemUpdateRequest,
    ) -> Result<AckStatus, SyncError> {
        let entry = self.joined(conn, request.portfolio_id).await?;

        if let Some(value) = request.value {
            if !value.is_finite() {
                return Err(SyncError::Validation("value must be finite".into()));
            }
        }

        let item = self
            .currencies
            .update(
                request.id,
                entry.portfolio_id,
                CurrencyPatch {
                    name: request.name,
                    ticker: request.ticker,
                    value: request.value,
                    value_currency: request.value_currency,
                    completer_fb_id: request.completer_fb_id,
                },
            )
            .await?;

        self.rooms
            .broadcast(entry.portfolio_id, ServerEvent::ItemUpdate(item))
            .await;
        Ok(AckStatus::Ok)
    }

    /// Transport-level disconnect: drop presence, leave the room, and tell
    /// the room who is still online. Unjoined connections leave silently.
    pub async fn handle_disconnect(&self, conn: ConnectionId) {
        let entry = self.presence.forget(conn).await;
        self.rooms.leave(conn).await;

        let Some(entry) = entry else {
            debug!("Connection {} closed without joining", conn);
            return;
        };

        let still_online = self.presence.online_user_ids(entry.portfolio_id).await;
        self.rooms
            .broadcast(entry.portfolio_id, ServerEvent::UsersSetOnline(still_online))
            .await;
        debug!(
            "Connection {} (user {}) left portfolio {}",
            conn, entry.user_fb_id, entry.portfolio_id
        );
    }

    /// Resolve the connection's joined state and check the request targets
    /// that same portfolio
    async fn joined(
        &self,
        conn: ConnectionId,
        portfolio_id: i64,
    ) -> Result<PresenceEntry, SyncError> {
        let entry = self.presence.get(conn).await.ok_or(SyncError::NotJoined)?;
        if entry.portfolio_id != portfolio_id {
            return Err(SyncError::Validation(format!(
                "request targets portfolio {} but connection joined {}",
                portfolio_id, entry.portfolio_id
            )));
        }
        Ok(entry)
    }

    /// Every member with their platform profile and live online flag. A
    /// profile fetch failure degrades to the id-as-name fallback rather
    /// than failing the whole join.
    async fn member_profiles(
        &self,
        members: &[MembershipRecord],
        portfolio_id: i64,
    ) -> Vec<MemberProfile> {
        let mut profiles = Vec::with_capacity(members.len());
        for member in members {
            let details = match self.profiles.details(member.user_fb_id).await {
                Ok(details) => details,
                Err(e) => {
                    warn!(
                        "Profile lookup for {} failed, using fallback: {}",
                        member.user_fb_id, e
                    );
                    crate::infrastructure::messenger::ProfileDetails::fallback(member.user_fb_id)
                }
            };
            let online = self.presence.is_online(member.user_fb_id, portfolio_id).await;
            profiles.push(MemberProfile::new(details, online));
        }
        profiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::messenger::{DemoProfileApi, NoopSendApi};
    use crate::persistence::{init_database, DEFAULT_TITLE};
    use serde_json::json;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Harness {
        handler: SyncHandler,
        portfolios: PortfolioRepository,
        pool: DbPool,
    }

    async fn harness() -> Harness {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomRegistry::new());
        let handler = SyncHandler::new(
            pool.clone(),
            presence,
            rooms,
            Arc::new(DemoProfileApi),
            Arc::new(NoopSendApi),
        );
        Harness {
            handler,
            portfolios: PortfolioRepository::new(pool.clone()),
            pool,
        }
    }

    struct Client {
        conn: ConnectionId,
        tx: EventSender,
        rx: UnboundedReceiver<ServerEvent>,
    }

    fn client() -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        Client {
            conn: crate::domain::presence::next_connection_id(),
            tx,
            rx,
        }
    }

    async fn send(harness: &Harness, client: &Client, seq: u64, frame: serde_json::Value) {
        let mut frame = frame;
        frame["seq"] = json!(seq);
        let envelope: Envelope = serde_json::from_value(frame).unwrap();
        harness
            .handler
            .handle_request(client.conn, &client.tx, envelope)
            .await;
    }

    async fn join(harness: &Harness, client: &Client, seq: u64, user: i64, portfolio: i64) {
        send(
            harness,
            client,
            seq,
            json!({
                "event": "push:user:join",
                "data": {"senderId": user, "portfolioId": portfolio}
            }),
        )
        .await;
    }

    fn drain(client: &mut Client) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = client.rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn ack_status(events: &[ServerEvent], seq: u64) -> AckStatus {
        events
            .iter()
            .find_map(|event| match event {
                ServerEvent::Ack(ack) if ack.seq == Some(seq) => Some(ack.status),
                _ => None,
            })
            .expect("no ack for seq")
    }

    #[tokio::test]
    async fn test_first_join_assigns_owner_and_inits() {
        let harness = harness().await;
        let portfolio = harness.portfolios.create(Some("Alts")).await.unwrap();
        let mut a = client();

        join(&harness, &a, 1, 100, portfolio.id).await;
        let events = drain(&mut a);

        assert_eq!(ack_status(&events, 1), AckStatus::Ok);
        let init = events
            .iter()
            .find_map(|event| match event {
                ServerEvent::Init(init) => Some(init.clone()),
                _ => None,
            })
            .expect("no init");
        assert_eq!(init.id, portfolio.id);
        assert_eq!(init.title, "Alts");
        assert_eq!(init.owner_id, 100);
        assert!(init.items.is_empty());
        assert_eq!(init.users.len(), 1);
        assert!(init.users[0].online);
    }

    #[tokio::test]
    async fn test_second_join_does_not_take_ownership() {
        let harness = harness().await;
        let portfolio = harness.portfolios.create(None).await.unwrap();
        let mut a = client();
        let mut b = client();

        join(&harness, &a, 1, 100, portfolio.id).await;
        drain(&mut a);

        join(&harness, &b, 1, 200, portfolio.id).await;
        let b_events = drain(&mut b);
        let a_events = drain(&mut a);

        // B's snapshot still names A as owner, with both members online
        let init = b_events
            .iter()
            .find_map(|event| match event {
                ServerEvent::Init(init) => Some(init.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(init.owner_id, 100);
        assert_eq!(init.users.len(), 2);
        assert!(init.users.iter().all(|user| user.online));

        // A hears about B exactly once, and no owner reassignment
        let joins: Vec<_> = a_events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::UserJoin(profile) => Some(profile.fb_id),
                _ => None,
            })
            .collect();
        assert_eq!(joins, vec![200]);
        assert!(!a_events
            .iter()
            .any(|event| matches!(event, ServerEvent::PortfolioSetOwnerId(_))));

        // B did not receive its own user:join
        assert!(!b_events
            .iter()
            .any(|event| matches!(event, ServerEvent::UserJoin(_))));
    }

    #[tokio::test]
    async fn test_join_missing_portfolio_has_no_side_effects() {
        let harness = harness().await;
        let mut a = client();

        join(&harness, &a, 1, 100, 999).await;
        let events = drain(&mut a);

        assert_eq!(ack_status(&events, 1), AckStatus::NoPortfolio);
        assert!(!events.iter().any(|event| matches!(event, ServerEvent::Init(_))));

        // No user row, no membership, no presence
        let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&harness.pool)
            .await
            .unwrap();
        assert_eq!(users, 0);
        let (memberships,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memberships")
            .fetch_one(&harness.pool)
            .await
            .unwrap();
        assert_eq!(memberships, 0);
        assert!(harness.handler.presence.get(a.conn).await.is_none());
    }

    #[tokio::test]
    async fn test_join_is_idempotent_for_presence() {
        let harness = harness().await;
        let portfolio = harness.portfolios.create(None).await.unwrap();
        let mut a = client();

        join(&harness, &a, 1, 100, portfolio.id).await;
        join(&harness, &a, 2, 100, portfolio.id).await;
        let events = drain(&mut a);

        assert_eq!(ack_status(&events, 2), AckStatus::Ok);
        assert_eq!(harness.handler.presence.len().await, 1);
        assert_eq!(harness.handler.rooms.room_size(portfolio.id).await, 1);
    }

    #[tokio::test]
    async fn test_rejoin_moves_to_other_portfolio() {
        let harness = harness().await;
        let first = harness.portfolios.create(None).await.unwrap();
        let second = harness.portfolios.create(None).await.unwrap();
        let mut a = client();
        let mut bystander = client();

        join(&harness, &a, 1, 100, first.id).await;
        join(&harness, &bystander, 1, 300, first.id).await;
        drain(&mut a);
        drain(&mut bystander);

        join(&harness, &a, 2, 100, second.id).await;
        let events = drain(&mut bystander);

        // The old room saw A go offline there
        let online = events
            .iter()
            .find_map(|event| match event {
                ServerEvent::UsersSetOnline(ids) => Some(ids.clone()),
                _ => None,
            })
            .expect("no users:setOnline in old room");
        assert_eq!(online, vec![300]);

        let entry = harness.handler.presence.get(a.conn).await.unwrap();
        assert_eq!(entry.portfolio_id, second.id);
    }

    #[tokio::test]
    async fn test_item_add_fans_out_to_room() {
        let harness = harness().await;
        let portfolio = harness.portfolios.create(None).await.unwrap();
        let mut a = client();
        let mut b = client();
        join(&harness, &a, 1, 100, portfolio.id).await;
        join(&harness, &b, 1, 200, portfolio.id).await;
        drain(&mut a);
        drain(&mut b);

        send(
            &harness,
            &a,
            2,
            json!({
                "event": "push:item:add",
                "data": {
                    "senderId": 100,
                    "portfolioId": portfolio.id,
                    "name": "Bitcoin",
                    "ticker": "BTC",
                    "value": 2500.0,
                    "valueCurrency": "CAD"
                }
            }),
        )
        .await;

        let a_events = drain(&mut a);
        assert_eq!(ack_status(&a_events, 2), AckStatus::Ok);

        for events in [a_events, drain(&mut b)] {
            let item = events
                .iter()
                .find_map(|event| match event {
                    ServerEvent::ItemAdd(item) => Some(item.clone()),
                    _ => None,
                })
                .expect("no item:add");
            assert!(item.id > 0);
            assert_eq!(item.ticker, "BTC");
            assert_eq!(item.value, 2500.0);
            assert_eq!(item.owner_fb_id, 100);
            assert_eq!(item.completer_fb_id, None);
        }
    }

    #[tokio::test]
    async fn test_item_add_rejects_foreign_sender() {
        let harness = harness().await;
        let portfolio = harness.portfolios.create(None).await.unwrap();
        let mut a = client();
        join(&harness, &a, 1, 100, portfolio.id).await;
        drain(&mut a);

        send(
            &harness,
            &a,
            2,
            json!({
                "event": "push:item:add",
                "data": {
                    "senderId": 999,
                    "portfolioId": portfolio.id,
                    "name": "Bitcoin",
                    "ticker": "BTC",
                    "value": 1.0,
                    "valueCurrency": "EUR"
                }
            }),
        )
        .await;

        assert_eq!(ack_status(&drain(&mut a), 2), AckStatus::Error);
    }

    #[tokio::test]
    async fn test_requests_require_join() {
        let harness = harness().await;
        let portfolio = harness.portfolios.create(None).await.unwrap();
        let mut a = client();

        send(
            &harness,
            &a,
            1,
            json!({
                "event": "push:title:update",
                "data": {"portfolioId": portfolio.id, "title": "Majors"}
            }),
        )
        .await;

        assert_eq!(ack_status(&drain(&mut a), 1), AckStatus::Error);
        let refreshed = harness.portfolios.get(portfolio.id).await.unwrap().unwrap();
        assert_eq!(refreshed.title, DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn test_requests_must_target_joined_portfolio() {
        let harness = harness().await;
        let mine = harness.portfolios.create(None).await.unwrap();
        let other = harness.portfolios.create(Some("Other")).await.unwrap();
        let mut a = client();
        join(&harness, &a, 1, 100, mine.id).await;
        drain(&mut a);

        send(
            &harness,
            &a,
            2,
            json!({
                "event": "push:title:update",
                "data": {"portfolioId": other.id, "title": "Hijacked"}
            }),
        )
        .await;

        assert_eq!(ack_status(&drain(&mut a), 2), AckStatus::Error);
        let untouched = harness.portfolios.get(other.id).await.unwrap().unwrap();
        assert_eq!(untouched.title, "Other");
    }

    #[tokio::test]
    async fn test_title_update_broadcasts_and_clearing_resets() {
        let harness = harness().await;
        let portfolio = harness.portfolios.create(Some("Alts")).await.unwrap();
        let mut a = client();
        let mut b = client();
        join(&harness, &a, 1, 100, portfolio.id).await;
        join(&harness, &b, 1, 200, portfolio.id).await;
        drain(&mut a);
        drain(&mut b);

        send(
            &harness,
            &a,
            2,
            json!({
                "event": "push:title:update",
                "data": {"portfolioId": portfolio.id, "title": ""}
            }),
        )
        .await;

        for events in [drain(&mut a), drain(&mut b)] {
            let title = events
                .iter()
                .find_map(|event| match event {
                    ServerEvent::TitleUpdate(title) => Some(title.clone()),
                    _ => None,
                })
                .expect("no title:update");
            assert_eq!(title, DEFAULT_TITLE);
        }
    }

    #[tokio::test]
    async fn test_item_update_completion_round_trip() {
        let harness = harness().await;
        let portfolio = harness.portfolios.create(None).await.unwrap();
        let mut a = client();
        let mut b = client();
        join(&harness, &a, 1, 100, portfolio.id).await;
        join(&harness, &b, 1, 200, portfolio.id).await;
        drain(&mut a);
        drain(&mut b);

        send(
            &harness,
            &a,
            2,
            json!({
                "event": "push:item:add",
                "data": {
                    "portfolioId": portfolio.id,
                    "name": "Monero",
                    "ticker": "XMR",
                    "value": 150.0,
                    "valueCurrency": "USD"
                }
            }),
        )
        .await;
        let item_id = drain(&mut a)
            .iter()
            .find_map(|event| match event {
                ServerEvent::ItemAdd(item) => Some(item.id),
                _ => None,
            })
            .unwrap();
        drain(&mut b);

        // B completes the item; name and value survive the patch
        send(
            &harness,
            &b,
            2,
            json!({
                "event": "push:item:update",
                "data": {
                    "portfolioId": portfolio.id,
                    "id": item_id,
                    "completerFbId": 200
                }
            }),
        )
        .await;

        let updated = drain(&mut a)
            .iter()
            .find_map(|event| match event {
                ServerEvent::ItemUpdate(item) => Some(item.clone()),
                _ => None,
            })
            .expect("no item:update at A");
        assert_eq!(updated.completer_fb_id, Some(200));
        assert_eq!(updated.name, "Monero");
        assert_eq!(updated.value, 150.0);
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_remaining_online() {
        let harness = harness().await;
        let portfolio = harness.portfolios.create(None).await.unwrap();
        let mut a = client();
        let mut b = client();
        join(&harness, &a, 1, 100, portfolio.id).await;
        join(&harness, &b, 1, 200, portfolio.id).await;
        drain(&mut a);
        drain(&mut b);

        harness.handler.handle_disconnect(b.conn).await;

        let online = drain(&mut a)
            .iter()
            .find_map(|event| match event {
                ServerEvent::UsersSetOnline(ids) => Some(ids.clone()),
                _ => None,
            })
            .expect("no users:setOnline");
        assert_eq!(online, vec![100]);
        assert!(harness.handler.presence.get(b.conn).await.is_none());
    }

    #[tokio::test]
    async fn test_unjoined_disconnect_is_silent() {
        let harness = harness().await;
        let a = client();
        // Must not panic; nothing to broadcast
        harness.handler.handle_disconnect(a.conn).await;
        assert_eq!(harness.handler.rooms.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_joins_mint_one_owner() {
        let harness = harness().await;
        let portfolio = harness.portfolios.create(None).await.unwrap();

        let mut handles = Vec::new();
        for user in [100, 200, 300, 400] {
            let repo = PortfolioRepository::new(harness.pool.clone());
            let users = UserRepository::new(harness.pool.clone());
            handles.push(tokio::spawn(async move {
                users.find_or_create(user).await.unwrap();
                repo.add_member(portfolio.id, user).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let owners: Vec<_> = harness
            .portfolios
            .get_members(portfolio.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|member| member.owner)
            .collect();
        assert_eq!(owners.len(), 1);
    }
}
