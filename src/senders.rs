use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use crate::error::Result;
use crate::mail::{MailboxApi, Message, ThreadRef};

pub const UNKNOWN_NO_MESSAGES: &str = "unknown-thread-no-messages";
pub const UNKNOWN_NO_FROM: &str = "unknown-no-from";

/// Thread id to resolved sender.
///
/// Thread-to-sender mappings are immutable for the process lifetime: an
/// entry is written once, never overwritten and never evicted.
#[derive(Debug, Default)]
pub struct SenderCache {
    entries: RwLock<HashMap<String, String>>,
}

impl SenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread_id: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(thread_id)
            .cloned()
    }

    /// Stores `sender` unless the thread already has one, and returns the
    /// sender now on record.
    pub fn insert(&self, thread_id: &str, sender: String) -> String {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(thread_id.to_owned())
            .or_insert(sender)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The verbatim `From` header of the first message.
pub fn first_message_sender(messages: &[Message]) -> String {
    match messages.first() {
        None => UNKNOWN_NO_MESSAGES.to_owned(),
        Some(first) => first.header("From").unwrap_or(UNKNOWN_NO_FROM).to_owned(),
    }
}

/// Every unread thread of a label, across all pages.
pub async fn get_all_threads_for_label(api: &dyn MailboxApi, label_id: &str) -> Result<Vec<ThreadRef>> {
    info!("get_all_threads_for_label - this method can be expensive: {}", label_id);

    let mut threads = vec![];
    let mut page_token: Option<String> = None;

    loop {
        let page = api.list_unread_threads(label_id, page_token).await?;

        if threads.is_empty() {
            if let Some(estimate) = page.result_size_estimate {
                info!("get_all_threads_for_label - result size estimate: {}", estimate);
            }
        }

        threads.extend(page.threads);

        match page.next_page_token {
            Some(next) => {
                page_token = Some(next);
                info!("Getting more threads for label {}: {}", label_id, threads.len());
            }
            None => break,
        }
    }

    Ok(threads)
}

/// Counts unread threads per sender for one label, fetching message metadata
/// only for threads the cache has not seen.
pub async fn aggregate_senders_for_label(
    api: &dyn MailboxApi,
    cache: &SenderCache,
    label_id: &str,
) -> Result<BTreeMap<String, u64>> {
    let mut sender_counts: BTreeMap<String, u64> = BTreeMap::new();

    for thread in get_all_threads_for_label(api, label_id).await? {
        let sender = match cache.get(&thread.id) {
            Some(sender) => sender,
            None => {
                let messages = api.get_thread_messages(&thread.id).await?;
                cache.insert(&thread.id, first_message_sender(&messages))
            }
        };

        *sender_counts.entry(sender).or_insert(0) += 1;
    }

    debug!(
        "label {} has {} senders, {} threads cached",
        label_id,
        sender_counts.len(),
        cache.len()
    );

    Ok(sender_counts)
}
