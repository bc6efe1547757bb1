//! Subscription relations and topic matching
//!
//! The dispatcher only needs the set of `(client, filter, qos)` relations whose filters
//! select a published topic. [`DefaultRouter`] keeps them per client in a `DashMap`
//! and scans on every match. Embedders with large subscription counts can plug in
//! their own [`Router`] through the context builder.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::topic::Topic;
use crate::types::*;
use crate::Result;

/// One subscription selected by topic matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRelation {
    pub client_id: ClientId,
    pub topic_filter: TopicFilter,
    pub qos: QoS,
}

#[async_trait]
pub trait Router: Sync + Send {
    /// Add or replace the subscription of `id` to `topic_filter`
    async fn add(&self, topic_filter: &str, id: ClientId, qos: QoS) -> Result<()>;

    /// Remove with id topic filter, return true when it existed
    async fn remove(&self, topic_filter: &str, id: &str) -> bool;

    /// Remove all subscriptions of a client, return how many there were
    async fn remove_all(&self, id: &str) -> usize;

    /// Every relation whose filter selects `topic`
    async fn matches(&self, topic: &str) -> Vec<SubRelation>;

    /// Filters currently held by a client
    async fn subscriptions(&self, id: &str) -> Vec<(TopicFilter, QoS)>;

    ///Returns the number of Subscription relationship
    fn relations(&self) -> usize;
}

#[derive(Default)]
pub struct DefaultRouter {
    relations: DashMap<ClientId, HashMap<TopicFilter, (Topic, QoS)>>,
    relations_count: AtomicUsize,
}

impl DefaultRouter {
    #[inline]
    pub fn new() -> DefaultRouter {
        Self::default()
    }
}

#[async_trait]
impl Router for DefaultRouter {
    #[inline]
    async fn add(&self, topic_filter: &str, id: ClientId, qos: QoS) -> Result<()> {
        let topic = Topic::from_str(topic_filter)?;
        let prev = self.relations.entry(id).or_default().insert(TopicFilter::from(topic_filter), (topic, qos));
        if prev.is_none() {
            self.relations_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    #[inline]
    async fn remove(&self, topic_filter: &str, id: &str) -> bool {
        let removed = self.relations.get_mut(id).map(|mut subs| subs.remove(topic_filter).is_some()).unwrap_or_default();
        if removed {
            self.relations_count.fetch_sub(1, Ordering::SeqCst);
            self.relations.remove_if(id, |_, subs| subs.is_empty());
        }
        removed
    }

    #[inline]
    async fn remove_all(&self, id: &str) -> usize {
        let n = self.relations.remove(id).map(|(_, subs)| subs.len()).unwrap_or_default();
        if n > 0 {
            self.relations_count.fetch_sub(n, Ordering::SeqCst);
        }
        n
    }

    async fn matches(&self, topic: &str) -> Vec<SubRelation> {
        let mut rels = Vec::new();
        for entry in self.relations.iter() {
            for (topic_filter, (t, qos)) in entry.value().iter() {
                if t.matches_str(topic) {
                    rels.push(SubRelation {
                        client_id: entry.key().clone(),
                        topic_filter: topic_filter.clone(),
                        qos: *qos,
                    });
                }
            }
        }
        log::debug!("{} matched relations: {}", topic, rels.len());
        rels
    }

    async fn subscriptions(&self, id: &str) -> Vec<(TopicFilter, QoS)> {
        self.relations
            .get(id)
            .map(|subs| subs.iter().map(|(tf, (_, qos))| (tf.clone(), *qos)).collect())
            .unwrap_or_default()
    }

    #[inline]
    fn relations(&self) -> usize {
        self.relations_count.load(Ordering::SeqCst)
    }
}
