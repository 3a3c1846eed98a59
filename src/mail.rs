use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::auth::GoogleAuth;
use crate::error::{ExporterError, Result};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LabelSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct LabelsList {
    #[serde(default)]
    labels: Vec<LabelSummary>,
}

/// Label metadata with aggregate thread counts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
    pub threads_total: u64,
    pub threads_unread: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadRef {
    pub id: String,
}

/// One page of a thread listing. The last page has no `next_page_token`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPage {
    #[serde(default)]
    pub threads: Vec<ThreadRef>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub payload: MessagePart,
}

impl Message {
    /// First header with exactly this name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .headers
            .iter()
            .find(|header| header.name == name)
            .map(|header| header.value.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePart {
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct ThreadDetails {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// The mailbox operations the exporter consumes.
#[async_trait]
pub trait MailboxApi: Send + Sync {
    async fn list_labels(&self) -> Result<Vec<LabelSummary>>;

    async fn get_label(&self, label_id: &str) -> Result<LabelInfo>;

    /// One page of unread threads carrying `label_id`.
    async fn list_unread_threads(
        &self,
        label_id: &str,
        page_token: Option<String>,
    ) -> Result<ThreadPage>;

    /// Message metadata (headers only) for a thread, in thread order.
    async fn get_thread_messages(&self, thread_id: &str) -> Result<Vec<Message>>;
}

pub struct GmailClient {
    http: reqwest::Client,
    base_url: Url,
    google_client: Mutex<GoogleAuth>,
}

impl GmailClient {
    pub fn new(google_client: GoogleAuth) -> Result<Self> {
        Self::with_base_url(google_client, GMAIL_API_BASE)
    }

    pub fn with_base_url(google_client: GoogleAuth, base_url: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
            google_client: Mutex::new(google_client),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ExporterError::Config(format!("unusable API base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(["gmail", "v1", "users", "me"])
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let res = {
            let mut google_client = self.google_client.lock().await;

            if google_client.is_expired() {
                google_client.do_refresh().await?;
            }

            let mut refreshed = false;
            loop {
                let res = self
                    .http
                    .get(url.clone())
                    .bearer_auth(google_client.access_token())
                    .send()
                    .await?;

                if GoogleAuth::needs_refresh(res.status()) && !refreshed {
                    google_client.do_refresh().await?;
                    refreshed = true;
                } else {
                    break res;
                }
            }
        };

        let status = res.status();
        let body = res.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(ExporterError::NotFound(url.path().to_owned()));
        }

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ExporterError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MailboxApi for GmailClient {
    async fn list_labels(&self) -> Result<Vec<LabelSummary>> {
        let url = self.endpoint(&["labels"])?;
        let list: LabelsList = self.get_json(url).await?;
        Ok(list.labels)
    }

    async fn get_label(&self, label_id: &str) -> Result<LabelInfo> {
        let url = self.endpoint(&["labels", label_id])?;
        self.get_json(url).await
    }

    async fn list_unread_threads(
        &self,
        label_id: &str,
        page_token: Option<String>,
    ) -> Result<ThreadPage> {
        let mut url = self.endpoint(&["threads"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("labelIds", label_id);
            query.append_pair("q", "is:unread");
            if let Some(page_token) = &page_token {
                query.append_pair("pageToken", page_token);
            }
        }

        self.get_json(url).await
    }

    async fn get_thread_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        debug!("Fetching thread messages for {}", thread_id);

        let mut url = self.endpoint(&["threads", thread_id])?;
        url.query_pairs_mut()
            .append_pair("format", "metadata")
            .append_pair("metadataHeaders", "From");

        let details: ThreadDetails = self.get_json(url).await?;
        Ok(details.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_label_info_requires_counts() {
        let complete = json!({
            "id": "INBOX",
            "name": "INBOX",
            "type": "system",
            "threadsTotal": 10,
            "threadsUnread": 3
        });
        let info: LabelInfo = serde_json::from_value(complete).unwrap();
        assert_eq!(info.threads_total, 10);
        assert_eq!(info.threads_unread, 3);

        let missing = json!({"id": "INBOX", "name": "INBOX"});
        assert!(serde_json::from_value::<LabelInfo>(missing).is_err());
    }

    #[test]
    fn test_thread_page_without_threads() {
        let page: ThreadPage = serde_json::from_value(json!({"resultSizeEstimate": 0})).unwrap();
        assert!(page.threads.is_empty());
        assert!(page.next_page_token.is_none());
        assert_eq!(page.result_size_estimate, Some(0));
    }

    #[test]
    fn test_message_header_lookup_is_exact() {
        let message: Message = serde_json::from_value(json!({
            "id": "m1",
            "threadId": "t1",
            "payload": {
                "headers": [
                    {"name": "from", "value": "lower@example.com"},
                    {"name": "From", "value": "Alice <alice@example.com>"}
                ]
            }
        }))
        .unwrap();

        assert_eq!(message.header("From"), Some("Alice <alice@example.com>"));
        assert_eq!(message.header("Subject"), None);
    }

    #[test]
    fn test_message_without_payload() {
        let message: Message = serde_json::from_value(json!({"id": "m1"})).unwrap();
        assert!(message.payload.headers.is_empty());
    }
}
