use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use reqwest::header::COOKIE;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};
use url::Url;

use crate::envelope::Envelope;
use crate::model::{Group, Item, ItemStatus, RemoteItem, split_group};
use crate::provider::{Provider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://todo.example.com";
const API_ROOT: &str = "/pims/todo/rest/v1";
const PAGE_SIZE: u32 = 30;
const STALE_AFTER: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const STATUS_COMPLETED: &str = "COMPLETED";
const STATUS_NEED_ACTION: &str = "NEED_ACTION";

#[derive(Debug, Clone)]
pub struct TodoClientConfig {
    pub base_url: String,
    /// Raw `Cookie` header value of an authenticated board session.
    pub session: String,
    /// Only projects whose name starts with this prefix are synced.
    pub group_prefix: String,
    pub timeout: Duration,
}

impl Default for TodoClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            session: String::new(),
            group_prefix: "+".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct Cache {
    groups: HashMap<String, Group>,
    items: HashMap<String, RemoteItem>,
}

/// [`Provider`] backed by a project / group / todo task board.
///
/// Every group is the default group of a project whose name carries the
/// configured prefix; the project name is the first key segment and the todo
/// subject is the rest of the key.
pub struct TodoClient {
    http: Client,
    base_url: Url,
    session: String,
    group_prefix: String,
    cache: Mutex<Cache>,
}

impl TodoClient {
    pub fn new(config: TodoClientConfig) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: Url::parse(&config.base_url)?,
            session: config.session,
            group_prefix: config.group_prefix,
            cache: Mutex::new(Cache::default()),
        })
    }

    pub fn with_base_url(base_url: &str, session: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(TodoClientConfig {
            base_url: base_url.to_string(),
            session: session.into(),
            ..TodoClientConfig::default()
        })
    }

    fn cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        Ok(self.base_url.join(&format!("{API_ROOT}{path}"))?)
    }

    fn project_list_url(&self) -> Result<Url, ProviderError> {
        let mut url = self.endpoint("/project/list")?;
        url.query_pairs_mut()
            .append_pair("size", "100")
            .append_pair("orderField", "CREATE_DATE")
            .append_pair("orderType", "DESC");
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(url)
            .header(COOKIE, &self.session)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .post(url)
            .header(COOKIE, &self.session)
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn post_inline_update(
        &self,
        task_id: &str,
        body: serde_json::Value,
    ) -> Result<(), ProviderError> {
        let url = self.endpoint(&format!("/phase2/todos/{task_id}/inline/update"))?;
        let response = self
            .http
            .post(url)
            .header(COOKIE, &self.session)
            .json(&body)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::Api { status, body })
        }
    }

    async fn set_task_status(&self, task_id: &str, status: &str) -> Result<(), ProviderError> {
        self.post_inline_update(
            task_id,
            json!({
                "inlineType": "STATUS",
                "status": status,
            }),
        )
        .await
    }

    async fn fetch_projects(&self) -> Result<Vec<ProjectSummary>, ProviderError> {
        let list: ProjectList = self.get_json(self.project_list_url()?).await?;
        Ok(list
            .elements
            .into_iter()
            .filter(|project| project.project_name.starts_with(&self.group_prefix))
            .collect())
    }

    async fn fetch_default_group(
        &self,
        project: &ProjectSummary,
    ) -> Result<Option<Group>, ProviderError> {
        let url = self.endpoint(&format!("/project/{}/group/list", project.project_id))?;
        let groups: Vec<GroupSummary> = self.get_json(url).await?;
        Ok(groups
            .into_iter()
            .find(|group| group.default_yn == "Y")
            .map(|group| Group {
                id: group.uid,
                project_id: project.project_id.clone(),
                name: project.project_name.clone(),
            }))
    }

    async fn fetch_group_items(&self, group: &Group) -> Result<Vec<RemoteItem>, ProviderError> {
        let mut task_ids = Vec::new();
        let mut page = 0u32;
        loop {
            let mut url = self.endpoint(&format!("/project/{}/group/todos/list", group.project_id))?;
            url.query_pairs_mut()
                .append_pair("groupId", &group.id)
                .append_pair("page", &page.to_string())
                .append_pair("size", &PAGE_SIZE.to_string())
                .append_pair("orderField", "REG_UPDATE_TIME")
                .append_pair("orderType", "ASCEND")
                .append_pair("complete", "INCLUSION");
            let list: TaskList = self.get_json(url).await?;
            task_ids.extend(list.elements.into_iter().map(|task| task.uid));
            page += 1;
            if page >= list.total_pages {
                break;
            }
        }

        let details = join_all(
            task_ids
                .iter()
                .map(|task_id| self.fetch_task(task_id, &group.name)),
        )
        .await;
        let mut items = Vec::with_capacity(details.len());
        for detail in details {
            if let Some(item) = detail? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Fetches one todo and decodes it into an item; `None` for todos that are
    /// not sync items.
    async fn fetch_task(
        &self,
        task_id: &str,
        group_name: &str,
    ) -> Result<Option<RemoteItem>, ProviderError> {
        let mut url = self.endpoint(&format!("/phase2/todos/{task_id}"))?;
        url.query_pairs_mut()
            .append_pair("type", "ALL")
            .append_pair("orderType", "ASCEND")
            .append_pair("orderField", "REG_UPDATE_TIME");
        let task: TaskDetail = self.get_json(url).await?;

        let envelope = match Envelope::extract(task.contents.as_deref().unwrap_or_default()) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!(task = %task.uid, error = %err, "skipping todo with unreadable payload");
                return Ok(None);
            }
        };

        let completed = task.status == STATUS_COMPLETED;
        if !completed && is_stale(task.modified.as_deref()) {
            // Touch idle todos so the board does not archive them.
            if let Err(err) = self.set_task_status(&task.uid, STATUS_NEED_ACTION).await {
                warn!(task = %task.uid, error = %err, "failed to refresh idle todo");
            }
        }

        Ok(Some(RemoteItem {
            provider_id: task.uid,
            group_id: task.group_id,
            key: format!("{group_name}/{}", task.subject),
            status: if completed {
                ItemStatus::Deleted
            } else {
                ItemStatus::Unchanged
            },
            created_at: envelope.created_at,
            modified_at: envelope.modified_at,
            size: envelope.size,
            content: envelope.content,
        }))
    }

    fn find_group(&self, key: &str) -> Option<(Group, String)> {
        let (group_name, subject) = split_group(key)?;
        let group = self.cache().groups.get(group_name).cloned()?;
        Some((group, subject.to_string()))
    }

    async fn create_item(
        &self,
        item: &Item,
        group: &Group,
        subject: &str,
    ) -> Result<RemoteItem, ProviderError> {
        let url = self.endpoint(&format!(
            "/project/{}/group/{}/todos/create",
            group.project_id, group.id
        ))?;
        let created: TaskDetail = self.post_json(url, json!({ "subject": subject })).await?;
        debug!(key = %item.key, task = %created.uid, "created remote todo");
        Ok(RemoteItem {
            provider_id: created.uid,
            group_id: group.id.clone(),
            key: item.key.clone(),
            status: ItemStatus::Unchanged,
            created_at: item.created_at,
            modified_at: item.modified_at,
            size: item.size,
            content: None,
        })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::Api { status, body })
        }
    }
}

#[async_trait]
impl Provider for TodoClient {
    async fn open(&self) -> bool {
        *self.cache() = Cache::default();
        match self
            .http
            .get(self.base_url.clone())
            .header(COOKIE, &self.session)
            .send()
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(host = %self.base_url, error = %err, "task board is unreachable");
                false
            }
        }
    }

    async fn close(&self) -> bool {
        *self.cache() = Cache::default();
        true
    }

    async fn is_ready(&self) -> bool {
        let Ok(url) = self.project_list_url() else {
            return false;
        };
        match self.http.get(url).header(COOKIE, &self.session).send().await {
            Ok(response) => {
                response.status().is_success() && !response.url().path().contains("login")
            }
            Err(err) => {
                warn!(error = %err, "session probe failed");
                false
            }
        }
    }

    async fn fetch_group_list(&self) -> Result<Vec<Group>, ProviderError> {
        let projects = self.fetch_projects().await?;
        let mut groups = HashMap::new();
        for project in &projects {
            if let Some(group) = self.fetch_default_group(project).await? {
                groups.insert(group.name.clone(), group);
            }
        }
        let list = groups.values().cloned().collect();
        self.cache().groups = groups;
        Ok(list)
    }

    async fn fetch_item_list(&self) -> Result<Vec<RemoteItem>, ProviderError> {
        let groups: Vec<Group> = self.cache().groups.values().cloned().collect();
        let mut items = Vec::new();
        for group in &groups {
            items.extend(self.fetch_group_items(group).await?);
        }
        self.cache().items = items
            .iter()
            .map(|item| (item.key.clone(), item.clone()))
            .collect();
        Ok(items)
    }

    async fn fetch_item_info(&self, key: &str) -> Result<Option<RemoteItem>, ProviderError> {
        let Some(known) = self.cache().items.get(key).cloned() else {
            return Ok(None);
        };
        let Some((group_name, _)) = split_group(key) else {
            return Ok(None);
        };
        let fresh = self.fetch_task(&known.provider_id, group_name).await?;
        if let Some(item) = &fresh {
            self.cache().items.insert(item.key.clone(), item.clone());
        }
        Ok(fresh)
    }

    async fn download_file(&self, key: &str) -> Result<Option<Vec<u8>>, ProviderError> {
        Ok(self
            .cache()
            .items
            .get(key)
            .and_then(|item| item.content.clone()))
    }

    async fn upload_file(&self, item: &Item, data: &[u8]) -> Result<bool, ProviderError> {
        let Some((group, subject)) = self.find_group(&item.key) else {
            debug!(key = %item.key, "no remote group for key");
            return Ok(false);
        };

        let existing = self.cache().items.get(&item.key).cloned();
        let remote = match existing {
            Some(remote) => remote,
            None => self.create_item(item, &group, &subject).await?,
        };
        if remote.is_deleted() {
            self.set_task_status(&remote.provider_id, STATUS_NEED_ACTION)
                .await?;
        }

        let envelope = Envelope {
            modified_at: item.modified_at,
            created_at: item.created_at,
            size: data.len() as u64,
            content: Some(data.to_vec()),
        };
        self.post_inline_update(
            &remote.provider_id,
            json!({
                "inlineType": "CONTENTS",
                "contentsType": "TEXT",
                "contents": envelope.encode(),
            }),
        )
        .await?;

        self.cache().items.insert(
            item.key.clone(),
            RemoteItem {
                status: ItemStatus::Unchanged,
                created_at: item.created_at,
                modified_at: item.modified_at,
                size: data.len() as u64,
                content: Some(data.to_vec()),
                ..remote
            },
        );
        Ok(true)
    }

    async fn delete_file(&self, item: &Item) -> Result<bool, ProviderError> {
        if self.find_group(&item.key).is_none() {
            debug!(key = %item.key, "no remote group for key");
            return Ok(false);
        }
        let Some(remote) = self.cache().items.get(&item.key).cloned() else {
            // Never reached the board, nothing to delete.
            return Ok(true);
        };
        if !remote.is_deleted() {
            self.set_task_status(&remote.provider_id, STATUS_COMPLETED)
                .await?;
        }
        if let Some(cached) = self.cache().items.get_mut(&item.key) {
            cached.status = ItemStatus::Deleted;
            cached.modified_at = item.modified_at;
        }
        Ok(true)
    }
}

fn is_stale(modified: Option<&str>) -> bool {
    let Some(modified) = modified else {
        return false;
    };
    match OffsetDateTime::parse(modified, &Rfc3339) {
        Ok(modified) => modified + STALE_AFTER < OffsetDateTime::now_utc(),
        Err(_) => false,
    }
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    #[serde(default)]
    elements: Vec<ProjectSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectSummary {
    project_id: String,
    project_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupSummary {
    uid: String,
    #[serde(default)]
    default_yn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskList {
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    elements: Vec<TaskSummary>,
}

#[derive(Debug, Deserialize)]
struct TaskSummary {
    uid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDetail {
    uid: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    contents: Option<String>,
    #[serde(default)]
    group_id: String,
    #[serde(default)]
    modified: Option<String>,
}
