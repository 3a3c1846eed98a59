//! In-memory mailbox that counts the calls made against it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ExporterError, Result};
use crate::mail::{
    LabelInfo, LabelSummary, MailboxApi, Message, MessageHeader, MessagePart, ThreadPage, ThreadRef,
};

#[derive(Debug, Default, Clone)]
pub struct CallCounts {
    pub list_labels: usize,
    pub get_label: usize,
    pub list_unread_threads: usize,
    pub get_thread_messages: HashMap<String, usize>,
}

impl CallCounts {
    pub fn thread_fetches(&self) -> usize {
        self.get_thread_messages.values().sum()
    }
}

#[derive(Default)]
pub struct FakeMailbox {
    labels: Vec<LabelInfo>,
    missing: HashSet<String>,
    pages: HashMap<String, Vec<Vec<String>>>,
    threads: HashMap<String, Vec<Message>>,
    discovery_error: Mutex<Option<ExporterError>>,
    calls: Mutex<CallCounts>,
}

fn page_token(index: usize) -> String {
    format!("page-{}", index)
}

impl FakeMailbox {
    pub fn with_label(mut self, id: &str, name: &str, total: u64, unread: u64) -> Self {
        self.labels.push(LabelInfo {
            id: id.into(),
            name: name.into(),
            threads_total: total,
            threads_unread: unread,
        });
        self
    }

    /// A label that is listed but answers 404 when fetched.
    pub fn with_missing_label(mut self, id: &str) -> Self {
        self.missing.insert(id.into());
        self
    }

    pub fn with_thread_pages(mut self, label_id: &str, pages: Vec<Vec<&str>>) -> Self {
        self.pages.insert(
            label_id.into(),
            pages
                .into_iter()
                .map(|page| page.into_iter().map(String::from).collect())
                .collect(),
        );
        self
    }

    /// A thread whose first message has the given `From` header, or no
    /// `From` header at all when `None`.
    pub fn with_thread(mut self, thread_id: &str, from: Option<&str>) -> Self {
        let headers = from
            .map(|from| {
                vec![MessageHeader {
                    name: "From".into(),
                    value: from.into(),
                }]
            })
            .unwrap_or_default();

        self.threads.insert(
            thread_id.into(),
            vec![Message {
                id: format!("{}-m1", thread_id),
                payload: MessagePart { headers },
            }],
        );
        self
    }

    /// The first `list_labels` call fails with `error`; later calls succeed.
    pub fn with_discovery_error(self, error: ExporterError) -> Self {
        *self.discovery_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_empty_thread(mut self, thread_id: &str) -> Self {
        self.threads.insert(thread_id.into(), vec![]);
        self
    }

    pub fn calls(&self) -> CallCounts {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailboxApi for FakeMailbox {
    async fn list_labels(&self) -> Result<Vec<LabelSummary>> {
        self.calls.lock().unwrap().list_labels += 1;

        if let Some(error) = self.discovery_error.lock().unwrap().take() {
            return Err(error);
        }

        Ok(self
            .labels
            .iter()
            .map(|label| LabelSummary {
                id: label.id.clone(),
                name: label.name.clone(),
            })
            .chain(self.missing.iter().map(|id| LabelSummary {
                id: id.clone(),
                name: id.clone(),
            }))
            .collect())
    }

    async fn get_label(&self, label_id: &str) -> Result<LabelInfo> {
        self.calls.lock().unwrap().get_label += 1;

        self.labels
            .iter()
            .find(|label| label.id == label_id)
            .cloned()
            .ok_or_else(|| ExporterError::NotFound(format!("labels/{}", label_id)))
    }

    async fn list_unread_threads(
        &self,
        label_id: &str,
        page_token_in: Option<String>,
    ) -> Result<ThreadPage> {
        self.calls.lock().unwrap().list_unread_threads += 1;

        let pages = self.pages.get(label_id).cloned().unwrap_or_default();
        let index = match page_token_in {
            Some(token) => (0..pages.len())
                .find(|index| page_token(*index) == token)
                .ok_or_else(|| ExporterError::Api {
                    status: 400,
                    message: format!("bad page token {}", token),
                })?,
            None => 0,
        };

        let threads = pages
            .get(index)
            .map(|ids| ids.iter().map(|id| ThreadRef { id: id.clone() }).collect())
            .unwrap_or_default();
        let next_page_token = (index + 1 < pages.len()).then(|| page_token(index + 1));

        Ok(ThreadPage {
            threads,
            next_page_token,
            result_size_estimate: Some(pages.iter().map(Vec::len).sum::<usize>() as u64),
        })
    }

    async fn get_thread_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        *self
            .calls
            .lock()
            .unwrap()
            .get_thread_messages
            .entry(thread_id.to_owned())
            .or_default() += 1;

        self.threads
            .get(thread_id)
            .cloned()
            .ok_or_else(|| ExporterError::NotFound(format!("threads/{}", thread_id)))
    }
}
