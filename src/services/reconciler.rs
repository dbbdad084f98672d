//! In-memory view of one two-party conversation.
//!
//! [`Conversation`] merges three sources into one list ordered newest first:
//! the historical fetch, optimistic local sends and inserts pushed by the
//! realtime feed. Server ids are unique in the list. A local entry and the
//! server row that confirms it collapse into one entry, either through the
//! row returned by the send channel or by matching content on the feed.

use chrono::{DateTime, Duration, Utc};

use crate::backend::{MessageRow, NewMessage};
use crate::models::{DeliveryState, Draft, Message, MessageId, ParticipantPair};

pub const DEFAULT_MATCH_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row belongs to another conversation.
    NotInConversation,
    /// A row with the same server id is already in the list.
    Duplicate,
    /// The row confirmed a local entry, which it replaced.
    Reconciled { replaced: MessageId },
    Inserted,
}

impl InsertOutcome {
    pub fn changed(&self) -> bool {
        matches!(
            self,
            InsertOutcome::Reconciled { .. } | InsertOutcome::Inserted
        )
    }
}

/// A local entry waiting for delivery, with the payload to deliver.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub local_id: MessageId,
    pub payload: NewMessage,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pair: ParticipantPair,
    admin_id: String,
    messages: Vec<Message>,
    match_window: Duration,
    next_seq: u64,
}

impl Conversation {
    pub fn new(pair: ParticipantPair, admin_id: impl Into<String>, match_window: Duration) -> Self {
        Self {
            pair,
            admin_id: admin_id.into(),
            messages: Vec::new(),
            match_window,
            next_seq: 0,
        }
    }

    pub fn pair(&self) -> &ParticipantPair {
        &self.pair
    }

    /// Messages, newest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages, oldest first, the order a chat transcript is read in.
    pub fn chronological(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn head(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Timestamp of the newest server-confirmed row.
    pub fn newest_confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.messages
            .iter()
            .filter(|m| !m.id.is_local())
            .map(|m| m.created_at)
            .max()
    }

    /// Replace the server rows with a fresh history fetch. Local entries stay
    /// and are reconciled against the fetched rows.
    pub fn seed(&mut self, rows: Vec<MessageRow>) {
        self.messages.retain(|m| m.id.is_local());
        self.merge(rows);
    }

    /// Merge fetched rows through the same path as feed inserts.
    pub fn merge(&mut self, rows: Vec<MessageRow>) -> usize {
        rows.into_iter()
            .map(|row| self.on_remote_insert(row))
            .filter(InsertOutcome::changed)
            .count()
    }

    pub fn on_remote_insert(&mut self, row: MessageRow) -> InsertOutcome {
        if !self.pair.matches(&row.sender_id, &row.receiver_id) {
            return InsertOutcome::NotInConversation;
        }

        let incoming = row.into_message();
        if self.messages.iter().any(|m| m.id == incoming.id) {
            return InsertOutcome::Duplicate;
        }

        match self.find_local_match(&incoming) {
            Some(idx) => {
                let replaced = self.messages.remove(idx).id;
                self.insert_sorted(incoming);
                InsertOutcome::Reconciled { replaced }
            }
            None => {
                self.insert_sorted(incoming);
                InsertOutcome::Inserted
            }
        }
    }

    /// Append a pending entry for `draft` at the head.
    ///
    /// The caller must pass a draft that survived [`Draft::normalized`].
    pub fn push_optimistic(&mut self, draft: &Draft, now: DateTime<Utc>) -> PendingSend {
        self.next_seq += 1;
        let local_id = MessageId::local(now.timestamp_millis(), self.next_seq);

        let message = Message {
            id: local_id.clone(),
            sender_id: self.pair.local_user_id.clone(),
            receiver_id: self.pair.counterpart_id.clone(),
            body: draft.text.clone(),
            attachment_url: draft.attachment_url.clone(),
            created_at: now,
            is_admin_reply: self.pair.local_user_id == self.admin_id,
            delivery: DeliveryState::Pending,
        };
        let payload = NewMessage::from_message(&message);
        self.messages.insert(0, message);

        PendingSend { local_id, payload }
    }

    /// Record that a send channel accepted the local entry.
    ///
    /// With the stored row the entry takes its server id and timestamp; if the
    /// feed already delivered that row the local entry is dropped instead.
    /// Returns false when the entry is no longer local.
    pub fn confirm(&mut self, local_id: &MessageId, row: Option<MessageRow>) -> bool {
        let Some(idx) = self.local_index(local_id) else {
            return false;
        };

        match row {
            Some(row) => {
                let server_id = MessageId::Server(row.id.clone());
                if self.messages.iter().any(|m| m.id == server_id) {
                    self.messages.remove(idx);
                } else {
                    self.messages.remove(idx);
                    self.insert_sorted(row.into_message());
                }
            }
            None => self.messages[idx].delivery = DeliveryState::Confirmed,
        }
        true
    }

    /// Flag a local entry whose delivery failed on every channel. It stays visible.
    pub fn mark_failed(&mut self, local_id: &MessageId) -> bool {
        match self.local_index(local_id) {
            Some(idx) => {
                self.messages[idx].delivery = DeliveryState::Failed;
                true
            }
            None => false,
        }
    }

    fn local_index(&self, local_id: &MessageId) -> Option<usize> {
        if !local_id.is_local() {
            return None;
        }
        self.messages.iter().position(|m| &m.id == local_id)
    }

    // Local entry with the same content inside the match window. Entries still
    // in flight or accepted win over failed ones, then the closest stamp, then
    // the oldest. A failed entry is only rescued when nothing else matches.
    fn find_local_match(&self, incoming: &Message) -> Option<usize> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.id.is_local() && m.same_content(incoming))
            .map(|(idx, m)| (idx, m, (m.created_at - incoming.created_at).abs()))
            .filter(|(_, _, distance)| *distance <= self.match_window)
            .min_by_key(|(_, m, distance)| {
                (m.delivery == DeliveryState::Failed, *distance, m.created_at)
            })
            .map(|(idx, _, _)| idx)
    }

    fn insert_sorted(&mut self, message: Message) {
        let idx = self
            .messages
            .iter()
            .position(|m| m.created_at <= message.created_at)
            .unwrap_or(self.messages.len());
        self.messages.insert(idx, message);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;
    use crate::backend::fake::row;

    const U1: &str = "u1";
    const A1: &str = "a1";

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_764_000_000 + secs, 0).unwrap()
    }

    fn conversation() -> Conversation {
        Conversation::new(
            ParticipantPair::new(U1, A1),
            A1,
            Duration::seconds(DEFAULT_MATCH_WINDOW_SECS),
        )
    }

    fn ids(conv: &Conversation) -> Vec<String> {
        conv.messages().iter().map(|m| m.id.to_string()).collect()
    }

    #[test]
    fn test_seed_keeps_descending_order() {
        let mut conv = conversation();
        conv.seed(vec![
            row("m3", A1, U1, "three", t(30)),
            row("m2", U1, A1, "two", t(20)),
            row("m1", A1, U1, "one", t(10)),
        ]);
        assert_eq!(ids(&conv), vec!["m3", "m2", "m1"]);
        let bodies: Vec<&str> = conv.chronological().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_remote_insert_is_idempotent() {
        let mut conv = conversation();
        conv.seed(vec![row("m1", A1, U1, "one", t(10))]);

        let events = vec![
            row("m2", U1, A1, "two", t(20)),
            row("m1", A1, U1, "one", t(10)),
            row("m2", U1, A1, "two", t(20)),
            row("m3", A1, U1, "three", t(30)),
            row("m3", A1, U1, "three", t(30)),
        ];
        for event in events {
            conv.on_remote_insert(event);
        }

        let unique: HashSet<_> = conv.messages().iter().map(|m| m.id.clone()).collect();
        assert_eq!(unique.len(), conv.len());
        assert_eq!(ids(&conv), vec!["m3", "m2", "m1"]);
    }

    #[test]
    fn test_duplicate_after_history_keeps_length() {
        let mut conv = conversation();
        conv.seed(vec![
            row("m2", U1, A1, "two", t(20)),
            row("m1", A1, U1, "one", t(10)),
        ]);
        let before = conv.len();
        assert_eq!(
            conv.on_remote_insert(row("m1", A1, U1, "one", t(10))),
            InsertOutcome::Duplicate
        );
        assert_eq!(conv.len(), before);
    }

    #[test]
    fn test_foreign_pair_is_ignored() {
        let mut conv = conversation();
        conv.seed(vec![row("m1", A1, U1, "one", t(10))]);

        for foreign in [
            row("x1", "u2", A1, "hello admin", t(20)),
            row("x2", A1, "u2", "hello u2", t(21)),
            row("x3", U1, U1, "note to self", t(22)),
        ] {
            assert_eq!(
                conv.on_remote_insert(foreign),
                InsertOutcome::NotInConversation
            );
        }
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_new_insert_goes_to_head() {
        let mut conv = conversation();
        conv.seed(vec![row("m1", A1, U1, "one", t(10))]);
        conv.on_remote_insert(row("m2", A1, U1, "two", t(10)));
        assert_eq!(conv.head().unwrap().id, MessageId::Server("m2".into()));
    }

    #[test]
    fn test_optimistic_send_is_pending_head() {
        let mut conv = conversation();
        conv.seed(vec![row("m1", A1, U1, "one", t(10))]);

        let pending = conv.push_optimistic(&Draft::text("hello"), t(20));
        let head = conv.head().unwrap();
        assert_eq!(head.id, pending.local_id);
        assert_eq!(head.body, "hello");
        assert_eq!(head.delivery, DeliveryState::Pending);
        assert!(!head.is_admin_reply);

        let payload = pending.payload;
        assert_eq!(payload.sender_id, U1);
        assert_eq!(payload.receiver_id, A1);
        assert_eq!(payload.message, "hello");
    }

    #[test]
    fn test_local_ids_do_not_collide_within_same_millisecond() {
        let mut conv = conversation();
        let a = conv.push_optimistic(&Draft::text("a"), t(5)).local_id;
        let b = conv.push_optimistic(&Draft::text("b"), t(5)).local_id;
        assert_ne!(a, b);
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn test_admin_sender_flags_reply() {
        let mut conv = Conversation::new(ParticipantPair::new(A1, U1), A1, Duration::seconds(60));
        let pending = conv.push_optimistic(&Draft::text("welcome"), t(0));
        assert!(conv.get(&pending.local_id).unwrap().is_admin_reply);
        assert!(pending.payload.is_admin_reply);
    }

    #[test]
    fn test_confirmation_on_feed_replaces_pending() {
        // U1 messages A1 with nothing in the history yet.
        let mut conv = conversation();
        conv.seed(Vec::new());
        assert!(conv.is_empty());

        let local = conv.push_optimistic(&Draft::text("hi"), t(0)).local_id;
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.head().unwrap().delivery, DeliveryState::Pending);

        let outcome = conv.on_remote_insert(row("m9", U1, A1, "hi", t(1)));
        assert_eq!(outcome, InsertOutcome::Reconciled { replaced: local });
        assert_eq!(conv.len(), 1);
        let head = conv.head().unwrap();
        assert_eq!(head.id, MessageId::Server("m9".into()));
        assert_eq!(head.delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn test_match_requires_same_content_and_window() {
        let mut conv = conversation();
        conv.push_optimistic(&Draft::text("hi"), t(0));

        assert_eq!(
            conv.on_remote_insert(row("m1", U1, A1, "hi there", t(1))),
            InsertOutcome::Inserted
        );
        assert_eq!(
            conv.on_remote_insert(row("m2", A1, U1, "hi", t(1))),
            InsertOutcome::Inserted
        );
        assert_eq!(
            conv.on_remote_insert(row("m3", U1, A1, "hi", t(DEFAULT_MATCH_WINDOW_SECS + 5))),
            InsertOutcome::Inserted
        );
        assert_eq!(conv.len(), 4);
        assert!(conv.messages().iter().any(|m| m.id.is_local()));
    }

    #[test]
    fn test_identical_sends_reconcile_one_each() {
        let mut conv = conversation();
        let first = conv.push_optimistic(&Draft::text("ok"), t(0)).local_id;
        let second = conv.push_optimistic(&Draft::text("ok"), t(1)).local_id;

        assert_eq!(
            conv.on_remote_insert(row("m1", U1, A1, "ok", t(0))),
            InsertOutcome::Reconciled { replaced: first }
        );
        assert_eq!(
            conv.on_remote_insert(row("m2", U1, A1, "ok", t(1))),
            InsertOutcome::Reconciled { replaced: second }
        );
        assert_eq!(ids(&conv), vec!["m2", "m1"]);
    }

    #[test]
    fn test_reconciled_entry_is_repositioned_by_server_time() {
        let mut conv = conversation();
        let local = conv.push_optimistic(&Draft::text("mine"), t(10)).local_id;
        conv.on_remote_insert(row("m1", A1, U1, "theirs", t(11)));
        assert_eq!(conv.head().unwrap().body, "theirs");

        // The server stamped the message after the counterpart's reply.
        conv.on_remote_insert(row("m2", U1, A1, "mine", t(12)));
        assert!(conv.get(&local).is_none());
        assert_eq!(ids(&conv), vec!["m2", "m1"]);
    }

    #[test]
    fn test_confirm_with_row_swaps_ids() {
        let mut conv = conversation();
        let local = conv.push_optimistic(&Draft::text("hi"), t(0)).local_id;
        assert!(conv.confirm(&local, Some(row("m1", U1, A1, "hi", t(1)))));
        assert_eq!(ids(&conv), vec!["m1"]);

        // The feed echo of the same row is now a duplicate.
        assert_eq!(
            conv.on_remote_insert(row("m1", U1, A1, "hi", t(1))),
            InsertOutcome::Duplicate
        );
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_confirm_after_feed_leaves_one_entry() {
        let mut conv = conversation();
        let local = conv.push_optimistic(&Draft::text("hi"), t(0)).local_id;
        conv.on_remote_insert(row("m1", U1, A1, "hi", t(1)));

        // The send response arrives after the feed reconciled the entry.
        assert!(!conv.confirm(&local, Some(row("m1", U1, A1, "hi", t(1)))));
        assert_eq!(ids(&conv), vec!["m1"]);
    }

    #[test]
    fn test_confirm_drops_local_when_row_already_listed() {
        let mut conv = Conversation::new(ParticipantPair::new(U1, A1), A1, Duration::zero());
        let local = conv.push_optimistic(&Draft::text("hi"), t(0)).local_id;
        // Outside a zero window the feed row cannot match by content.
        conv.on_remote_insert(row("m1", U1, A1, "hi", t(3)));
        assert_eq!(conv.len(), 2);

        assert!(conv.confirm(&local, Some(row("m1", U1, A1, "hi", t(3)))));
        assert_eq!(ids(&conv), vec!["m1"]);
    }

    #[test]
    fn test_confirm_without_row_keeps_local_id() {
        let mut conv = conversation();
        let local = conv.push_optimistic(&Draft::text("hi"), t(0)).local_id;
        assert!(conv.confirm(&local, None));
        let entry = conv.get(&local).unwrap();
        assert_eq!(entry.delivery, DeliveryState::Confirmed);

        conv.on_remote_insert(row("m1", U1, A1, "hi", t(2)));
        assert_eq!(ids(&conv), vec!["m1"]);
    }

    #[test]
    fn test_failed_entry_stays_and_can_be_rescued() {
        let mut conv = conversation();
        let local = conv.push_optimistic(&Draft::text("lost?"), t(0)).local_id;
        assert!(conv.mark_failed(&local));
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.get(&local).unwrap().delivery, DeliveryState::Failed);

        conv.on_remote_insert(row("m1", U1, A1, "lost?", t(4)));
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.head().unwrap().delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn test_retry_confirmation_leaves_failed_entry_alone() {
        let mut conv = conversation();
        let failed = conv.push_optimistic(&Draft::text("ok"), t(0)).local_id;
        assert!(conv.mark_failed(&failed));

        // Retyped, accepted by the primary endpoint without an echoed row.
        let retry = conv.push_optimistic(&Draft::text("ok"), t(10)).local_id;
        assert!(conv.confirm(&retry, None));

        let outcome = conv.on_remote_insert(row("m2", U1, A1, "ok", t(11)));
        assert_eq!(outcome, InsertOutcome::Reconciled { replaced: retry });
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.head().unwrap().id, MessageId::Server("m2".into()));
        assert_eq!(conv.get(&failed).unwrap().delivery, DeliveryState::Failed);
    }

    #[test]
    fn test_pending_match_prefers_closest_stamp() {
        let mut conv = conversation();
        let early = conv.push_optimistic(&Draft::text("ok"), t(0)).local_id;
        let late = conv.push_optimistic(&Draft::text("ok"), t(30)).local_id;

        assert_eq!(
            conv.on_remote_insert(row("m1", U1, A1, "ok", t(31))),
            InsertOutcome::Reconciled { replaced: late }
        );
        assert_eq!(
            conv.on_remote_insert(row("m0", U1, A1, "ok", t(1))),
            InsertOutcome::Reconciled { replaced: early }
        );
        assert_eq!(ids(&conv), vec!["m1", "m0"]);
    }

    #[test]
    fn test_server_ids_are_not_marked_failed() {
        let mut conv = conversation();
        conv.seed(vec![row("m1", U1, A1, "hi", t(0))]);
        assert!(!conv.mark_failed(&MessageId::Server("m1".into())));
        assert!(!conv.confirm(&MessageId::Server("m1".into()), None));
    }

    #[test]
    fn test_seed_keeps_local_entries_and_merge_counts_changes() {
        let mut conv = conversation();
        conv.seed(vec![row("m1", A1, U1, "one", t(0))]);
        let local = conv.push_optimistic(&Draft::text("two"), t(10)).local_id;

        conv.seed(vec![row("m1", A1, U1, "one", t(0))]);
        assert!(conv.get(&local).is_some());

        let changed = conv.merge(vec![
            row("m1", A1, U1, "one", t(0)),
            row("m2", U1, A1, "two", t(11)),
            row("m3", A1, U1, "three", t(12)),
        ]);
        assert_eq!(changed, 2);
        assert_eq!(ids(&conv), vec!["m3", "m2", "m1"]);
        assert_eq!(conv.newest_confirmed_at(), Some(t(12)));
    }

    #[test]
    fn test_attachment_only_send() {
        let mut conv = conversation();
        let draft = Draft::attachment("https://cdn.example.com/shot.png");
        let payload = conv.push_optimistic(&draft, t(0)).payload;
        assert_eq!(payload.message, "");
        assert_eq!(
            payload.attachment_url.as_deref(),
            Some("https://cdn.example.com/shot.png")
        );

        let mut confirmed = row("m1", U1, A1, "", t(1));
        confirmed.attachment_url = Some("https://cdn.example.com/shot.png".into());
        assert!(matches!(
            conv.on_remote_insert(confirmed),
            InsertOutcome::Reconciled { .. }
        ));
    }
}
