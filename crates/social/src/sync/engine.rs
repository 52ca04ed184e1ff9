//! Sync engine: webhook ingest, polling and outbound delivery
//!
//! Both delivery paths (push via webhooks, pull via polling) reduce every
//! platform event to the same insert-or-ignore primitive keyed on
//! (conversation, external message id), so replays, overlaps between the
//! two paths and crashed-poll refetches all collapse to no-ops.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::alerts::AlertSink;
use crate::connection::ConnectionManager;
use crate::error::SocialError;
use crate::models::{
    Connection, ConnectionId, ConnectionStatus, Conversation, ConversationId, DeliveryState,
    Direction, Message, MessageId, Participant, PollCursor,
};
use crate::platform::{InboundMessage, PlatformRegistry, RemoteConversation};
use crate::store::SocialStore;
use crate::sync::locks::ConversationLocks;

/// Counters for one webhook ingest
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    /// Messages newly written to the store
    pub applied: usize,
    /// Messages already present (replayed or seen via the other path)
    pub duplicates: usize,
    /// Events addressed to a different account than this connection's
    pub ignored: usize,
    /// Events that failed to apply (logged, rest of batch continues)
    pub errors: usize,
}

/// Counters for one completed poll
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollStats {
    pub pages: usize,
    pub conversations: usize,
    pub applied: usize,
    pub duplicates: usize,
}

/// Result of a poll request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(PollStats),
    /// Another poll for the same connection was already running
    AlreadyRunning,
}

/// Removes a key from an in-flight set when the work ends, however it ends
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    /// Claim `key`, or None if it is already claimed
    fn claim(set: &'a Mutex<HashSet<String>>, key: &str) -> Option<Self> {
        if set.lock().unwrap().insert(key.to_string()) {
            Some(Self {
                set,
                key: key.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.key);
    }
}

pub struct SyncEngine {
    store: Arc<dyn SocialStore>,
    platforms: Arc<PlatformRegistry>,
    connections: Arc<ConnectionManager>,
    alerts: Arc<dyn AlertSink>,
    conversation_locks: ConversationLocks,
    polls_in_flight: Mutex<HashSet<String>>,
    deliveries_in_flight: Mutex<HashSet<String>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn SocialStore>,
        platforms: Arc<PlatformRegistry>,
        connections: Arc<ConnectionManager>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            store,
            platforms,
            connections,
            alerts,
            conversation_locks: ConversationLocks::new(),
            polls_in_flight: Mutex::new(HashSet::new()),
            deliveries_in_flight: Mutex::new(HashSet::new()),
        }
    }

    // === Webhook path ===

    /// Apply a raw webhook payload for a connection.
    ///
    /// A payload that does not parse is rejected as
    /// [`SocialError::MalformedEvent`]; individual events that fail to
    /// apply are counted and skipped so one bad event cannot poison the
    /// batch. Events for a connection that is not `Active`, or addressed
    /// to a different account on the same platform, are discarded.
    pub fn ingest_webhook_event(
        &self,
        connection_id: &ConnectionId,
        raw: &[u8],
    ) -> Result<IngestStats, SocialError> {
        let connection = self.load_connection(connection_id)?;
        let client = self.platforms.get(connection.platform)?;
        let events = client.parse_webhook(raw)?;

        if connection.status != ConnectionStatus::Active {
            debug!(
                "Discarding {} webhook event(s) for {} connection {}",
                events.len(),
                connection.status.as_str(),
                connection_id.as_str()
            );
            return Ok(IngestStats::default());
        }

        let mut stats = IngestStats::default();
        for event in events {
            // Webhook payloads arrive per platform, not per connection; an
            // event addressed to another account belongs to that account's
            // connection, not this one.
            if let Some(account) = &event.external_account_id
                && account != &connection.external_account_id
            {
                stats.ignored += 1;
                continue;
            }
            match self.apply_message(&connection, &event, None) {
                Ok(true) => stats.applied += 1,
                Ok(false) => stats.duplicates += 1,
                Err(e) => {
                    warn!(
                        "Failed to apply webhook event {} on connection {}: {e}",
                        event.external_message_id,
                        connection_id.as_str()
                    );
                    stats.errors += 1;
                }
            }
        }
        debug!(
            "Webhook ingest for connection {}: {} applied, {} duplicate(s), {} ignored, {} error(s)",
            connection_id.as_str(),
            stats.applied,
            stats.duplicates,
            stats.ignored,
            stats.errors
        );
        Ok(stats)
    }

    /// Insert one platform message, creating its conversation as needed.
    ///
    /// Returns true if the message was new. Runs under the per-thread lock;
    /// the conversation rollup (last activity, unread count, participants)
    /// moves atomically with the insert. `participants` carries thread
    /// metadata when the caller has it (poll pages do, webhooks do not).
    fn apply_message(
        &self,
        connection: &Connection,
        event: &InboundMessage,
        participants: Option<&[Participant]>,
    ) -> Result<bool, SocialError> {
        let lock = self
            .conversation_locks
            .for_thread(connection.id.as_str(), &event.external_thread_id);
        let _guard = lock.lock().unwrap();

        // Disconnect may have landed since the caller's status check
        let current = self.load_connection(&connection.id)?;
        if current.status != ConnectionStatus::Active {
            return Ok(false);
        }

        let mut conversation = match self
            .store
            .find_conversation(&connection.id, &event.external_thread_id)?
        {
            Some(conversation) => conversation,
            None => {
                let conversation = Conversation::new(
                    connection.id.clone(),
                    &event.external_thread_id,
                    Vec::new(),
                    event.sent_at,
                );
                // The conversation row must exist before its first message
                self.store.upsert_conversation(conversation.clone())?;
                conversation
            }
        };

        let delivery_state = match event.direction {
            Direction::Inbound => DeliveryState::Received,
            // Outbound messages observed on the platform are confirmed sends
            Direction::Outbound => DeliveryState::Sent,
        };
        let message = Message::builder(conversation.id.clone())
            .external_message_id(&event.external_message_id)
            .direction(event.direction)
            .sender_id(&event.sender_id)
            .body(&event.body)
            .sent_at(event.sent_at)
            .delivery_state(delivery_state)
            .build();

        let inserted = self.store.insert_message_if_absent(message)?;
        if !inserted {
            return Ok(false);
        }

        conversation.last_message_at = conversation.last_message_at.max(event.sent_at);
        if event.direction == Direction::Inbound {
            conversation.unread_count += 1;
        }
        let sender = match &event.sender_name {
            Some(name) => Participant::with_name(&event.sender_id, name),
            None => Participant::new(&event.sender_id),
        };
        conversation.merge_participant(sender);
        if let Some(participants) = participants {
            for participant in participants {
                conversation.merge_participant(participant.clone());
            }
        }
        self.store.upsert_conversation(conversation)?;
        Ok(true)
    }

    // === Poll path ===

    /// Poll a connection's conversations and reconcile them into the store.
    ///
    /// At most one poll runs per connection at a time; a second request
    /// returns [`PollOutcome::AlreadyRunning`] instead of queueing. The
    /// cursor advances only after a page has been fully applied, so a poll
    /// interrupted by rate limiting or a crash resumes from the last
    /// durable page. `since` overrides the stored watermark (a full
    /// backfill passes an early date).
    pub fn poll_conversations(
        &self,
        connection_id: &ConnectionId,
        since: Option<DateTime<Utc>>,
    ) -> Result<PollOutcome, SocialError> {
        let Some(_guard) = InFlightGuard::claim(&self.polls_in_flight, connection_id.as_str())
        else {
            debug!(
                "Poll already in flight for connection {}",
                connection_id.as_str()
            );
            return Ok(PollOutcome::AlreadyRunning);
        };

        let token = self.get_token_or_alert(connection_id)?;
        let connection = self.load_connection(connection_id)?;
        let client = self.platforms.get(connection.platform)?;

        let mut cursor = self
            .store
            .get_poll_cursor(connection_id)?
            .unwrap_or_else(|| PollCursor::new(connection_id.clone()))
            .started(Utc::now());
        let effective_since = since.or(cursor.last_synced_at);

        let mut stats = PollStats::default();
        loop {
            let page = match client.fetch_conversations(
                &token,
                &connection.external_account_id,
                cursor.page_cursor.as_deref(),
                effective_since,
            ) {
                Ok(page) => page,
                Err(e @ SocialError::CredentialExpired) => {
                    self.alert_credentials(&connection);
                    return Err(e);
                }
                // Cursor stays at the last fully-applied page
                Err(e) => return Err(e),
            };

            // A disconnect during the fetch cancels the poll before this
            // page is committed
            if self.load_connection(connection_id)?.status != ConnectionStatus::Active {
                info!(
                    "Poll cancelled: connection {} is no longer active",
                    connection_id.as_str()
                );
                return Ok(PollOutcome::Completed(stats));
            }

            stats.pages += 1;
            for remote in &page.conversations {
                stats.conversations += 1;
                let (applied, duplicates) = self.apply_remote_conversation(&connection, remote)?;
                stats.applied += applied;
                stats.duplicates += duplicates;
            }

            match page.next_cursor {
                Some(next) => {
                    cursor = cursor.advanced(Some(next));
                    self.store.save_poll_cursor(cursor.clone())?;
                }
                None => {
                    cursor = cursor.completed();
                    self.store.save_poll_cursor(cursor)?;
                    break;
                }
            }
        }

        info!(
            "Poll completed for connection {}: {} page(s), {} applied, {} duplicate(s)",
            connection_id.as_str(),
            stats.pages,
            stats.applied,
            stats.duplicates
        );
        Ok(PollOutcome::Completed(stats))
    }

    fn apply_remote_conversation(
        &self,
        connection: &Connection,
        remote: &RemoteConversation,
    ) -> Result<(usize, usize), SocialError> {
        let mut applied = 0;
        let mut duplicates = 0;
        for message in &remote.messages {
            if self.apply_message(connection, message, Some(&remote.participants))? {
                applied += 1;
            } else {
                duplicates += 1;
            }
        }
        Ok((applied, duplicates))
    }

    // === Outbound path ===

    /// Queue an outbound message.
    ///
    /// The provisional record (delivery state `pending`, no external id) is
    /// written synchronously so the caller sees it immediately; platform
    /// delivery happens on a background thread and resolves the record to
    /// `sent` or `failed`.
    pub fn send_message(
        self: &Arc<Self>,
        conversation_id: &ConversationId,
        body: &str,
    ) -> Result<Message, SocialError> {
        let conversation = self.load_conversation(conversation_id)?;
        let connection = self.load_connection(&conversation.connection_id)?;
        if connection.status != ConnectionStatus::Active {
            return Err(SocialError::CredentialExpired);
        }

        let message =
            Message::outbound_pending(conversation_id.clone(), &connection.external_account_id, body);
        {
            let lock = self
                .conversation_locks
                .for_thread(connection.id.as_str(), &conversation.external_thread_id);
            let _guard = lock.lock().unwrap();
            let mut conversation = self.load_conversation(conversation_id)?;
            self.store.insert_message_if_absent(message.clone())?;
            conversation.last_message_at = conversation.last_message_at.max(message.sent_at);
            self.store.upsert_conversation(conversation)?;
        }

        let engine = Arc::clone(self);
        let message_id = message.id.clone();
        std::thread::spawn(move || {
            if let Err(e) = engine.deliver(&message_id) {
                warn!("Delivery failed for message {}: {e}", message_id.as_str());
            }
        });

        Ok(message)
    }

    /// Deliver a provisional message to its platform.
    ///
    /// Normally runs on the background thread spawned by
    /// [`SyncEngine::send_message`]; public so callers can retry a failed
    /// send or tests can drive delivery synchronously. Skips messages that
    /// are no longer `pending`.
    pub fn deliver(&self, message_id: &MessageId) -> Result<(), SocialError> {
        let Some(_guard) =
            InFlightGuard::claim(&self.deliveries_in_flight, message_id.as_str())
        else {
            return Ok(());
        };
        let message = self
            .store
            .get_message(message_id)?
            .ok_or_else(|| SocialError::NotFound(format!("message {}", message_id.as_str())))?;
        if message.delivery_state != DeliveryState::Pending {
            return Ok(());
        }

        let conversation = self.load_conversation(&message.conversation_id)?;
        let connection = self.load_connection(&conversation.connection_id)?;
        let client = self.platforms.get(connection.platform)?;

        let token = match self.get_token_or_alert(&connection.id) {
            Ok(token) => token,
            Err(e) => {
                self.store
                    .set_message_delivery(message_id, DeliveryState::Failed)?;
                return Err(e);
            }
        };

        let external_message_id = match client.send_message(
            &token,
            &connection.external_account_id,
            &conversation.external_thread_id,
            &message.body,
        ) {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "Platform rejected message {}: {e}",
                    message_id.as_str()
                );
                self.store
                    .set_message_delivery(message_id, DeliveryState::Failed)?;
                return Err(e);
            }
        };

        let lock = self
            .conversation_locks
            .for_thread(connection.id.as_str(), &conversation.external_thread_id);
        let _guard = lock.lock().unwrap();
        // A webhook echo may have landed this message under its platform id
        // while the send was in flight; the echo row wins and the
        // provisional row goes away.
        if self
            .store
            .find_message_by_external(&conversation.id, &external_message_id)?
            .is_some()
        {
            self.store.delete_message(message_id)?;
        } else {
            self.store.confirm_message(message_id, &external_message_id)?;
        }
        Ok(())
    }

    // === Helpers ===

    fn get_token_or_alert(&self, connection_id: &ConnectionId) -> Result<String, SocialError> {
        match self.connections.get_valid_token(connection_id) {
            Ok(token) => Ok(token),
            Err(e @ SocialError::CredentialExpired) => {
                if let Ok(Some(connection)) = self.store.get_connection(connection_id) {
                    self.alert_credentials(&connection);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn alert_credentials(&self, connection: &Connection) {
        self.alerts.alert(
            "connection credentials expired",
            &format!(
                "{} connection {} ({}) requires re-authorization",
                connection.platform,
                connection.id.as_str(),
                connection.display_name
            ),
        );
    }

    fn load_connection(&self, id: &ConnectionId) -> Result<Connection, SocialError> {
        self.store
            .get_connection(id)?
            .ok_or_else(|| SocialError::NotFound(format!("connection {}", id.as_str())))
    }

    fn load_conversation(&self, id: &ConversationId) -> Result<Conversation, SocialError> {
        self.store
            .get_conversation(id)?
            .ok_or_else(|| SocialError::NotFound(format!("conversation {}", id.as_str())))
    }
}
