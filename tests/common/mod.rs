#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue};

use nexus_hook_dispatcher::components::register_builtin;
use nexus_hook_dispatcher::github::{
    ApiConnector, ApiError, CommitDetail, GitHubApi, GitIdentity, NewStatus, PullRef,
    RepositoryCommit, StatusState,
};
use nexus_hook_dispatcher::storage::{BucketMut, BucketRef};
use nexus_hook_dispatcher::{
    Component, ComponentError, ComponentRegistry, Db, Delivery, Dispatcher, Hook, HookStore,
    Outcome, Params,
};

pub const RECORDING: &str = "recording";
pub const FAILING: &str = "failing";

// ─── Stub API ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListCommits(String),
    Status { sha: String, state: StatusState },
    CreateComment { id: u64, body: String },
    EditComment { id: u64, body: String },
    DeleteComment(u64),
    RequestReviewers(Vec<String>),
}

/// Records every call and answers from canned data.
pub struct StubApi {
    pub commits: Mutex<Vec<RepositoryCommit>>,
    pub calls: Mutex<Vec<Call>>,
    pub tokens: Mutex<Vec<String>>,
    pub fail_edit: AtomicBool,
    pub fail_reviewers: AtomicBool,
    next_comment: AtomicU64,
}

impl Default for StubApi {
    fn default() -> Self {
        Self {
            commits: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            fail_edit: AtomicBool::new(false),
            fail_reviewers: AtomicBool::new(false),
            next_comment: AtomicU64::new(100),
        }
    }
}

impl StubApi {
    pub fn set_commits(&self, commits: Vec<RepositoryCommit>) {
        *self.commits.lock().unwrap() = commits;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn unavailable() -> ApiError {
    ApiError::Status {
        status: 503,
        body: "unavailable".into(),
    }
}

#[async_trait]
impl GitHubApi for StubApi {
    async fn list_commits(&self, pr: &PullRef) -> Result<Vec<RepositoryCommit>, ApiError> {
        self.push(Call::ListCommits(pr.key()));
        Ok(self.commits.lock().unwrap().clone())
    }

    async fn create_status(
        &self,
        _pr: &PullRef,
        sha: &str,
        status: &NewStatus,
    ) -> Result<(), ApiError> {
        self.push(Call::Status {
            sha: sha.to_string(),
            state: status.state,
        });
        Ok(())
    }

    async fn create_comment(&self, _pr: &PullRef, body: &str) -> Result<u64, ApiError> {
        let id = self.next_comment.fetch_add(1, Ordering::SeqCst);
        self.push(Call::CreateComment {
            id,
            body: body.to_string(),
        });
        Ok(id)
    }

    async fn edit_comment(&self, _pr: &PullRef, id: u64, body: &str) -> Result<(), ApiError> {
        if self.fail_edit.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.push(Call::EditComment {
            id,
            body: body.to_string(),
        });
        Ok(())
    }

    async fn delete_comment(&self, _pr: &PullRef, id: u64) -> Result<(), ApiError> {
        self.push(Call::DeleteComment(id));
        Ok(())
    }

    async fn request_reviewers(&self, _pr: &PullRef, reviewers: &[String]) -> Result<(), ApiError> {
        if self.fail_reviewers.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.push(Call::RequestReviewers(reviewers.to_vec()));
        Ok(())
    }
}

pub struct StubConnector(pub Arc<StubApi>);

impl ApiConnector for StubConnector {
    fn connect(&self, token: &str) -> Arc<dyn GitHubApi> {
        self.0.tokens.lock().unwrap().push(token.to_string());
        self.0.clone()
    }
}

// ─── Test components ──────────────────────────────────────────────────────────

/// Writes a marker for each delivery and appends its own name to `log`.
pub struct Recording {
    pub label: &'static str,
    pub log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Component for Recording {
    fn name(&self) -> &'static str {
        self.label
    }

    fn template(&self) -> &'static str {
        "recording"
    }

    fn params(&self, _hook: &Hook, _ns: BucketRef<'_>) -> Params {
        Params::new()
    }

    fn init(
        &self,
        _hook: &Hook,
        _params: &Params,
        _ns: &mut BucketMut<'_>,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    async fn process(
        &self,
        _hook: &Hook,
        delivery: &Delivery,
        ns: &mut BucketMut<'_>,
    ) -> Result<Outcome, ComponentError> {
        self.log.lock().unwrap().push(self.label.to_string());
        ns.put(&format!("seen-{}", delivery.id.as_deref().unwrap_or("")), "1")?;
        Ok(Outcome::Processed)
    }
}

/// Writes to its namespace, then fails.
pub struct Failing {
    pub log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Component for Failing {
    fn name(&self) -> &'static str {
        "Failing"
    }

    fn template(&self) -> &'static str {
        "failing"
    }

    fn params(&self, _hook: &Hook, _ns: BucketRef<'_>) -> Params {
        Params::new()
    }

    fn init(
        &self,
        _hook: &Hook,
        _params: &Params,
        _ns: &mut BucketMut<'_>,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    async fn process(
        &self,
        _hook: &Hook,
        _delivery: &Delivery,
        ns: &mut BucketMut<'_>,
    ) -> Result<Outcome, ComponentError> {
        self.log.lock().unwrap().push(FAILING.to_string());
        ns.put("attempted", "1")?;
        Err(ComponentError::Rejected("always fails".into()))
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub hooks: HookStore,
    pub dispatcher: Arc<Dispatcher>,
    pub api: Arc<StubApi>,
    pub log: Arc<Mutex<Vec<String>>>,
}

pub async fn harness(db: Db) -> Harness {
    let api = Arc::new(StubApi::default());
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut registry = ComponentRegistry::new();
    register_builtin(&mut registry, Arc::new(StubConnector(api.clone()))).unwrap();
    registry
        .register(
            RECORDING,
            Arc::new(Recording {
                label: RECORDING,
                log: log.clone(),
            }),
        )
        .unwrap();
    registry
        .register(FAILING, Arc::new(Failing { log: log.clone() }))
        .unwrap();

    let hooks = HookStore::open(db, Arc::new(registry)).await.unwrap();
    let dispatcher = Arc::new(Dispatcher::new(hooks.clone()));
    Harness {
        hooks,
        dispatcher,
        api,
        log,
    }
}

impl Harness {
    /// Creates hook `id` with `components` attached in order, each given
    /// a token.
    pub async fn hook(&self, id: &str, components: &[&str]) -> Hook {
        self.hooks.create(&Hook::with_id(id, "test")).await.unwrap();
        for component in components {
            self.hooks
                .attach_component(id, component, &token_params("secret-token"))
                .await
                .unwrap();
        }
        self.hooks.get(id).unwrap()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

pub fn token_params(token: &str) -> Params {
    Params::from([("token".to_string(), token.to_string())])
}

pub fn pull_request_body(owner: &str, repo: &str, number: u64) -> Bytes {
    let event = serde_json::json!({
        "action": "synchronize",
        "number": number,
        "pull_request": {
            "number": number,
            "base": { "repo": { "name": repo, "owner": { "login": owner } } }
        }
    });
    Bytes::from(serde_json::to_vec(&event).unwrap())
}

pub fn delivery(id: Option<&str>, body: Bytes) -> Delivery {
    let mut headers = HeaderMap::new();
    if let Some(id) = id {
        headers.insert("x-github-delivery", HeaderValue::from_str(id).unwrap());
    }
    Delivery::from_request("X-GitHub-Delivery", headers, body)
}

pub fn pr_delivery(id: &str) -> Delivery {
    delivery(Some(id), pull_request_body("acme", "widgets", 7))
}

pub fn commit(sha: &str, message: &str) -> RepositoryCommit {
    RepositoryCommit {
        sha: sha.to_string(),
        commit: CommitDetail {
            message: message.to_string(),
            author: Some(GitIdentity {
                name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
            }),
        },
    }
}

pub fn signed(sha: &str) -> RepositoryCommit {
    commit(sha, "Change\n\nSigned-off-by: Ada Lovelace <ada@example.com>")
}

/// Reads a key from a binding namespace in the committed state.
pub fn binding_value(db: &Db, hook_id: &str, component: &str, path: &[&str]) -> Option<Vec<u8>> {
    let tx = db.read();
    let mut bucket = tx.bucket("components")?.bucket(hook_id)?.bucket(component)?;
    let (key, parents) = path.split_last()?;
    for name in parents {
        bucket = bucket.bucket(name)?;
    }
    bucket.get(key).map(<[u8]>::to_vec)
}
