//! In-memory ordered view of one chat.
//!
//! Holds exactly one entry per client tag and keeps entries sorted by
//! `(timestamp, first-insertion order)`. The order is re-derived after every
//! mutation, so the completion order of concurrent fetches never matters.

use crate::models::{ClientTag, Message, MessageStatus};
use std::collections::{HashMap, HashSet};

/// Where a batch of messages came from. The gateway is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSource {
    Store,
    Gateway,
}

#[derive(Debug, Default)]
pub struct Timeline {
    entries: Vec<Message>,
    /// First-insertion sequence number per tag, the tie-break for equal timestamps
    order: HashMap<ClientTag, u64>,
    next_seq: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.clone()
    }

    pub fn get(&self, tag: &ClientTag) -> Option<&Message> {
        self.entries.iter().find(|m| &m.client_tag == tag)
    }

    pub fn contains(&self, tag: &ClientTag) -> bool {
        self.order.contains_key(tag)
    }

    pub fn tags(&self) -> HashSet<ClientTag> {
        self.order.keys().cloned().collect()
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.entries.first().map(|m| m.timestamp)
    }

    /// Newest timestamp among server-confirmed entries
    pub fn newest_confirmed_timestamp(&self) -> Option<i64> {
        self.entries
            .iter()
            .filter(|m| m.status == MessageStatus::Sent)
            .map(|m| m.timestamp)
            .max()
    }

    /// Merge a batch into the view. Returns how many tags were new.
    ///
    /// A gateway copy replaces the payload of an existing entry and confirms
    /// it. A store copy only fills gaps, or confirms an entry the store
    /// already knows to be sent. `Sent` entries never change status.
    pub fn merge(&mut self, incoming: Vec<Message>, source: MergeSource) -> usize {
        let mut added = 0;
        for message in incoming {
            match self.entries.iter_mut().find(|m| m.client_tag == message.client_tag) {
                Some(existing) => Self::reconcile(existing, message, source),
                None => {
                    self.track(&message.client_tag);
                    self.entries.push(message);
                    added += 1;
                }
            }
        }
        self.resort();
        added
    }

    /// Add a locally created message. Returns false if the tag is already shown.
    pub fn insert_pending(&mut self, message: Message) -> bool {
        if self.contains(&message.client_tag) {
            return false;
        }
        self.track(&message.client_tag);
        self.entries.push(message);
        self.resort();
        true
    }

    /// Apply a status transition to the entry with `tag`.
    ///
    /// Returns false if the tag is not shown or the transition is illegal.
    pub fn apply_status(&mut self, tag: &ClientTag, server_id: Option<i64>, status: MessageStatus) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|m| &m.client_tag == tag) else {
            return false;
        };
        if entry.status != status && !entry.status.can_transition_to(status) {
            return false;
        }
        entry.status = status;
        if server_id.is_some() {
            entry.id = server_id;
        }
        true
    }

    /// Overwrite the payload of a shown entry with the server's echo of it
    pub fn confirm(&mut self, echo: Message) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|m| m.client_tag == echo.client_tag) else {
            return false;
        };
        Self::reconcile(entry, echo, MergeSource::Gateway);
        self.resort();
        true
    }

    fn reconcile(existing: &mut Message, incoming: Message, source: MergeSource) {
        match source {
            MergeSource::Gateway => {
                let status = if existing.status == MessageStatus::Sent {
                    MessageStatus::Sent
                } else {
                    incoming.status
                };
                let id = incoming.id.or(existing.id);
                let media_ref = incoming.media_ref.clone().or_else(|| existing.media_ref.take());
                *existing = Message {
                    id,
                    status,
                    media_ref,
                    ..incoming
                };
            }
            MergeSource::Store => {
                if incoming.status == MessageStatus::Sent && existing.status != MessageStatus::Sent {
                    *existing = incoming;
                }
            }
        }
    }

    fn track(&mut self, tag: &ClientTag) {
        self.order.entry(tag.clone()).or_insert_with(|| {
            let seq = self.next_seq;
            self.next_seq += 1;
            seq
        });
    }

    fn resort(&mut self) {
        let order = &self.order;
        self.entries.sort_by(|a, b| {
            a.timestamp.cmp(&b.timestamp).then_with(|| {
                let sa = order.get(&a.client_tag).copied().unwrap_or(u64::MAX);
                let sb = order.get(&b.client_tag).copied().unwrap_or(u64::MAX);
                sa.cmp(&sb)
            })
        });
    }
}
