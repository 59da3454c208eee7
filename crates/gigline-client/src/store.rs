use chrono::{DateTime, Utc};
use uuid::Uuid;

use gigline_types::models::{Bid, Message};

/// Messages of one room, unique by id and ordered by `created_at`.
///
/// Push events, history fetches and send echoes arrive in any order and may
/// repeat; every path goes through [`merge`](Self::merge).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStore {
    messages: Vec<Message>,
}

/// Fold `incoming` onto `existing`. Fields the incoming copy leaves empty keep
/// what we already knew, so a partial update never erases attachments, bid
/// data or a read timestamp.
fn merge_one(existing: &mut Message, incoming: Message) {
    let Message {
        id: _,
        room_id,
        sender_id,
        sender_username,
        text,
        attachments,
        bid,
        created_at,
        delivered_at,
        read_at,
    } = incoming;

    existing.room_id = room_id;
    existing.sender_id = sender_id;
    if !sender_username.is_empty() {
        existing.sender_username = sender_username;
    }
    if text.is_some() {
        existing.text = text;
    }
    if !attachments.is_empty() {
        existing.attachments = attachments;
    }
    if bid.is_some() {
        existing.bid = bid;
    }
    existing.created_at = created_at;
    if delivered_at.is_some() {
        existing.delivered_at = delivered_at;
    }
    if read_at.is_some() {
        existing.read_at = read_at;
    }
}

/// Merge two message lists by id, sorted ascending by `created_at`.
pub fn merge(existing: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut store = MessageStore::from(existing.to_vec());
    store.merge(incoming.iter().cloned());
    store.messages
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Message>) {
        for message in incoming {
            match self.messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => merge_one(existing, message),
                None => self.messages.push(message),
            }
        }
        // Stable: equal timestamps keep arrival order.
        self.messages.sort_by_key(|m| m.created_at);
    }

    /// Record that `message_id` was read. An earlier timestamp is never replaced.
    pub fn apply_read_receipt(&mut self, message_id: Uuid, read_at: DateTime<Utc>) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) if message.read_at.is_none() => {
                message.read_at = Some(read_at);
                true
            }
            _ => false,
        }
    }

    /// Replace the embedded copy of `bid` on every message that carries it.
    /// Returns how many messages changed.
    pub fn patch_bid(&mut self, bid: &Bid) -> usize {
        let mut patched = 0;
        for embedded in self.messages.iter_mut().filter_map(|m| m.bid.as_mut()) {
            if embedded.id == bid.id {
                *embedded = bid.clone();
                patched += 1;
            }
        }
        patched
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The current copy of a bid, from its anchor message.
    pub fn find_bid(&self, bid_id: Uuid) -> Option<&Bid> {
        self.messages
            .iter()
            .filter_map(|m| m.bid.as_ref())
            .find(|b| b.id == bid_id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<Vec<Message>> for MessageStore {
    fn from(messages: Vec<Message>) -> Self {
        let mut store = Self::new();
        store.merge(messages);
        store
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{Duration, TimeZone};
    use gigline_types::models::Attachment;
    use gigline_types::{Amount, BidStatus};
    use proptest::prelude::*;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn message(id: Uuid, secs: i64) -> Message {
        Message {
            id,
            room_id: Uuid::nil(),
            sender_id: Uuid::nil(),
            sender_username: "org".into(),
            text: Some(format!("at {}", secs)),
            attachments: vec![],
            bid: None,
            created_at: at(secs),
            delivered_at: Some(at(secs)),
            read_at: None,
        }
    }

    fn bid(status: BidStatus) -> Bid {
        Bid {
            id: Uuid::from_u128(7),
            room_id: Uuid::nil(),
            organizer_id: Uuid::nil(),
            vendor_id: Uuid::nil(),
            amount: Amount::from_units(500),
            currency: "USD".into(),
            tier: None,
            notes: None,
            status,
            counter_amount: None,
            idempotency_key: "k1".into(),
            created_at: at(0),
            updated_at: at(0),
        }
    }

    #[test]
    fn out_of_order_arrivals_are_sorted() {
        let mut store = MessageStore::new();
        store.merge([message(Uuid::from_u128(2), 20)]);
        store.merge([message(Uuid::from_u128(1), 10), message(Uuid::from_u128(3), 30)]);

        let ids: Vec<u128> = store.messages().iter().map(|m| m.id.as_u128()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn partial_updates_keep_known_fields() {
        let id = Uuid::new_v4();
        let mut full = message(id, 0);
        full.attachments = vec![Attachment {
            id: Uuid::new_v4(),
            file_url: "/media/chat_attachments/x_rider.pdf".into(),
            original_name: "rider.pdf".into(),
            size: 10,
        }];
        full.bid = Some(bid(BidStatus::Pending));

        let mut store = MessageStore::from(vec![full.clone()]);

        let mut receipt_only = message(id, 0);
        receipt_only.text = None;
        receipt_only.delivered_at = None;
        receipt_only.read_at = Some(at(5));
        store.merge([receipt_only]);

        let merged = store.get(id).unwrap();
        assert_eq!(merged.attachments, full.attachments);
        assert_eq!(merged.bid, full.bid);
        assert_eq!(merged.text, full.text);
        assert_eq!(merged.read_at, Some(at(5)));
        assert_eq!(merged.delivered_at, full.delivered_at);

        // A later stale copy does not unset read_at.
        store.merge([message(id, 0)]);
        assert_eq!(store.get(id).unwrap().read_at, Some(at(5)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn read_receipts_apply_once() {
        let id = Uuid::new_v4();
        let mut store = MessageStore::from(vec![message(id, 0)]);
        assert!(store.apply_read_receipt(id, at(1)));
        assert!(!store.apply_read_receipt(id, at(2)));
        assert_eq!(store.get(id).unwrap().read_at, Some(at(1)));
        assert!(!store.apply_read_receipt(Uuid::new_v4(), at(3)));
    }

    #[test]
    fn bid_patches_reach_the_anchor() {
        let anchor = Uuid::new_v4();
        let mut carrying = message(anchor, 0);
        carrying.text = None;
        carrying.bid = Some(bid(BidStatus::Pending));
        let mut store = MessageStore::from(vec![carrying, message(Uuid::new_v4(), 1)]);

        assert_eq!(store.patch_bid(&bid(BidStatus::Accepted)), 1);
        assert_eq!(
            store.get(anchor).unwrap().bid.as_ref().unwrap().status,
            BidStatus::Accepted
        );
        assert_eq!(
            store.find_bid(Uuid::from_u128(7)).map(|b| b.status),
            Some(BidStatus::Accepted)
        );
    }

    fn arb_messages() -> impl Strategy<Value = Vec<Message>> {
        prop::collection::vec((0u128..20, 0i64..50), 0..40).prop_map(|pairs| {
            pairs
                .into_iter()
                // created_at is a function of id: one message, one timestamp.
                .map(|(id, _)| message(Uuid::from_u128(id), (id as i64 * 7) % 50))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn merge_is_idempotent_and_ordered(
            first in arb_messages(),
            picks in prop::collection::vec(any::<prop::sample::Index>(), 0..40),
        ) {
            // M' is a repeated subset of M in arbitrary order.
            let replay: Vec<Message> = if first.is_empty() {
                vec![]
            } else {
                picks.iter().map(|i| i.get(&first).clone()).collect()
            };

            let merged = merge(&merge(&[], &first), &replay);

            let distinct: HashSet<Uuid> = first.iter().chain(&replay).map(|m| m.id).collect();
            prop_assert_eq!(merged.len(), distinct.len());
            prop_assert!(merged.windows(2).all(|w| w[0].created_at <= w[1].created_at));

            let again = merge(&merged, &replay);
            prop_assert_eq!(again, merged);
        }
    }
}
