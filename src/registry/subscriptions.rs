//! Subscription bookkeeping
//!
//! `SubscriptionRegistry` is the broker-side map from channel (sensor id) to
//! the set of connections subscribed to it. Push tasks on many connections
//! read it while connection handlers mutate it, so every operation takes the
//! internal lock for a single membership test or update and releases it
//! before returning.
//!
//! `SubscriptionFlags` is the client-side view: the client only tracks
//! whether it has asked the broker to subscribe to each channel.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

pub type ConnectionId = String;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    channels: RwLock<HashMap<String, HashSet<ConnectionId>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the entry was newly added, `false` if it was already present.
    pub fn add(&self, connection: &str, channel: &str) -> bool {
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(channel.to_string())
            .or_default()
            .insert(connection.to_string())
    }

    /// Returns `true` if the entry existed.
    pub fn remove(&self, connection: &str, channel: &str) -> bool {
        let mut channels = self.channels.write().unwrap();
        let Some(subscribers) = channels.get_mut(channel) else {
            return false;
        };
        let removed = subscribers.remove(connection);
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        removed
    }

    pub fn contains(&self, connection: &str, channel: &str) -> bool {
        self.channels
            .read()
            .unwrap()
            .get(channel)
            .is_some_and(|subscribers| subscribers.contains(connection))
    }

    /// Drops every entry for `connection` and returns the channels it was subscribed to.
    pub fn remove_all(&self, connection: &str) -> Vec<String> {
        let mut channels = self.channels.write().unwrap();
        let mut removed = Vec::new();
        channels.retain(|channel, subscribers| {
            if subscribers.remove(connection) {
                removed.push(channel.clone());
            }
            !subscribers.is_empty()
        });
        removed
    }

    pub fn subscribers(&self, channel: &str) -> Vec<ConnectionId> {
        self.channels
            .read()
            .unwrap()
            .get(channel)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.channels.read().unwrap().values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client-local record of which channels have an active subscription request.
#[derive(Debug, Default)]
pub struct SubscriptionFlags {
    flags: HashMap<String, bool>,
}

impl SubscriptionFlags {
    /// Returns `true` if the channel was not already flagged.
    pub fn add(&mut self, channel: &str) -> bool {
        !self.flags.insert(channel.to_string(), true).unwrap_or(false)
    }

    pub fn remove(&mut self, channel: &str) -> bool {
        self.flags.remove(channel).unwrap_or(false)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.flags.get(channel).copied().unwrap_or(false)
    }

    pub fn active(&self) -> Vec<String> {
        self.flags
            .iter()
            .filter(|(_, subscribed)| **subscribed)
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }
}
