use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

pub const DEFAULT_SPEED_APPLY: u32 = 500;
pub const DEFAULT_SPEED_JOBS: u32 = 100;

/// A job listing delivered by the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppJob {
    pub id: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub easy_apply: bool,
}

impl AppJob {
    pub fn new(
        id: impl Into<String>,
        company: impl Into<String>,
        title: impl Into<String>,
        easy_apply: bool,
    ) -> Self {
        Self {
            id: id.into(),
            company: company.into(),
            title: title.into(),
            easy_apply,
        }
    }
}

/// Outcome record for a job. Extra fields sent by the UI are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub job: AppJob,
    /// When the application was skipped or completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Application {
    pub fn new(job: AppJob) -> Self {
        Self {
            job,
            resolved_at: None,
            extra: Map::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    /// Stamp the resolution time unless the caller already set one.
    pub fn resolve(mut self) -> Self {
        self.resolved_at.get_or_insert_with(Utc::now);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Text,
    Number,
    Select,
    Radio,
    Checkbox,
    Textarea,
}

impl std::fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuestionKind::Text => write!(f, "text"),
            QuestionKind::Number => write!(f, "number"),
            QuestionKind::Select => write!(f, "select"),
            QuestionKind::Radio => write!(f, "radio"),
            QuestionKind::Checkbox => write!(f, "checkbox"),
            QuestionKind::Textarea => write!(f, "textarea"),
        }
    }
}

/// A form question seen while applying, with the answer to reuse next time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub label: String,
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_speed_apply")]
    pub speed_apply: u32,
    #[serde(default = "default_speed_jobs")]
    pub speed_jobs: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_speed_apply() -> u32 {
    DEFAULT_SPEED_APPLY
}

fn default_speed_jobs() -> u32 {
    DEFAULT_SPEED_JOBS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            speed_apply: DEFAULT_SPEED_APPLY,
            speed_jobs: DEFAULT_SPEED_JOBS,
            extra: Map::new(),
        }
    }
}

impl Settings {
    pub fn reset_speed(&mut self) {
        self.speed_apply = DEFAULT_SPEED_APPLY;
        self.speed_jobs = DEFAULT_SPEED_JOBS;
    }

    /// Shallow-merge a JSON object into the settings. Known keys must still
    /// deserialize to their declared types.
    pub fn merge(&mut self, patch: Map<String, Value>) -> serde_json::Result<()> {
        let mut current = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        current.extend(patch);
        *self = serde_json::from_value(Value::Object(current))?;
        Ok(())
    }
}

/// One entry of the `questions` list.
///
/// Entries written in another shape are kept verbatim so an older document
/// still loads and saves back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionEntry {
    Typed(Question),
    Raw(Value),
}

impl QuestionEntry {
    pub fn as_question(&self) -> Option<&Question> {
        match self {
            QuestionEntry::Typed(q) => Some(q),
            QuestionEntry::Raw(_) => None,
        }
    }
}

/// Result of the last call to the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Credentials synced with the remote service. Serializes to `{}` when empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res: Option<AuthResult>,
}

impl AuthState {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Both tokens present and non-empty.
    pub fn tokens(&self) -> Option<(&str, &str)> {
        match (self.access_token.as_deref(), self.refresh_token.as_deref()) {
            (Some(a), Some(r)) if !a.is_empty() && !r.is_empty() => Some((a, r)),
            _ => None,
        }
    }
}

/// Outcome of an auth exchange performed outside the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthOutcome {
    Authenticated {
        access_token: String,
        refresh_token: String,
        #[serde(default)]
        email: String,
        #[serde(default)]
        credits: u64,
    },
    Rejected {
        #[serde(default)]
        message: String,
    },
}

/// The whole persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PilotState {
    /// Pending queue; head runs next
    pub jobs: Vec<AppJob>,
    pub applied: Vec<AppJob>,
    pub questions: Vec<QuestionEntry>,
    pub skipped_apps: Vec<Application>,
    pub completed_apps: Vec<Application>,
    pub active_job: Option<AppJob>,
    pub is_app_running: bool,
    /// `is_app_running` was only raised for an on-demand job and drops
    /// again when that job is released
    pub on_demand_run: bool,
    pub is_list_running: bool,
    pub settings: Settings,
    pub count: u64,
    pub auth: AuthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
}

impl PilotState {
    /// A queue-driven activation must not start a new job.
    pub fn cant_run(&self) -> bool {
        self.active_job.is_some() || !self.is_app_running
    }

    pub fn next_pending(&self) -> Option<&AppJob> {
        self.jobs.first()
    }

    /// True when a queued job other than `started` is waiting.
    ///
    /// With nothing started this is the second queue slot.
    pub fn has_follow_up(&self, started: Option<&str>) -> bool {
        match started {
            Some(id) => self.jobs.iter().any(|j| j.id != id),
            None => self.jobs.len() > 1,
        }
    }

    /// Mark `job` active, raising the run flag for an on-demand job on a
    /// stopped run.
    pub fn activate(&mut self, job: AppJob) {
        if !self.is_app_running {
            self.is_app_running = true;
            self.on_demand_run = true;
        }
        self.active_job = Some(job);
    }

    /// Clear the active job. A run raised only for an on-demand job ends
    /// with it.
    pub fn clear_active(&mut self) {
        self.active_job = None;
        if self.on_demand_run {
            self.is_app_running = false;
            self.on_demand_run = false;
        }
    }

    /// Turn the queue run on or off at the user's request.
    pub fn set_app_running(&mut self, running: bool) {
        self.is_app_running = running;
        self.on_demand_run = false;
        self.active_job = None;
    }

    /// Append to `applied` unless a job with the same id is already there.
    pub fn add_applied(&mut self, job: AppJob) -> bool {
        push_unique(&mut self.applied, job)
    }

    /// Append to the pending queue unless a job with the same id is queued.
    pub fn add_job(&mut self, job: AppJob) -> bool {
        push_unique(&mut self.jobs, job)
    }

    /// Remove a job from the pending queue. Returns whether it was queued.
    pub fn dequeue(&mut self, job_id: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.id != job_id);
        before != self.jobs.len()
    }

    pub fn is_skipped(&self, job_id: &str) -> bool {
        self.skipped_apps.iter().any(|a| a.job.id == job_id)
    }

    pub fn is_completed(&self, job_id: &str) -> bool {
        self.completed_apps.iter().any(|a| a.job.id == job_id)
    }

    /// Clear the active job if it refers to `job_id`.
    pub fn release_active(&mut self, job_id: &str) {
        if self.active_job.as_ref().is_some_and(|j| j.id == job_id) {
            self.clear_active();
        }
    }

    /// Insert or replace a question by id.
    pub fn save_question(&mut self, question: Question) {
        let existing = self
            .questions
            .iter_mut()
            .find(|e| e.as_question().is_some_and(|q| q.id == question.id));
        match existing {
            Some(entry) => *entry = QuestionEntry::Typed(question),
            None => self.questions.push(QuestionEntry::Typed(question)),
        }
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions
            .iter()
            .filter_map(QuestionEntry::as_question)
            .find(|q| q.id == id)
    }

    /// Decode a stored document field by field.
    ///
    /// A field whose value does not fit its type falls back to its default
    /// and is named in the returned list; the other fields keep their data.
    pub fn from_document(doc: Map<String, Value>) -> (Self, Vec<String>) {
        if let Ok(state) = serde_json::from_value(Value::Object(doc.clone())) {
            return (state, Vec::new());
        }

        let mut accepted = Map::new();
        let mut rejected = Vec::new();
        for (key, value) in doc {
            let mut single = Map::new();
            single.insert(key.clone(), value.clone());
            if serde_json::from_value::<Self>(Value::Object(single)).is_ok() {
                accepted.insert(key, value);
            } else {
                rejected.push(key);
            }
        }

        let state = serde_json::from_value(Value::Object(accepted)).unwrap_or_default();
        (state, rejected)
    }

    pub fn apply_auth(&mut self, outcome: AuthOutcome) {
        match outcome {
            AuthOutcome::Authenticated {
                access_token,
                refresh_token,
                email,
                credits,
            } => {
                self.auth = AuthState {
                    access_token: Some(access_token),
                    refresh_token: Some(refresh_token),
                    email: Some(email),
                    credits: Some(Number::from(credits)),
                    res: Some(AuthResult {
                        success: true,
                        message: None,
                    }),
                };
            }
            AuthOutcome::Rejected { message } => {
                self.auth.res = Some(AuthResult {
                    success: false,
                    message: Some(message),
                });
            }
        }
    }
}

fn push_unique(list: &mut Vec<AppJob>, job: AppJob) -> bool {
    if list.iter().any(|j| j.id == job.id) {
        return false;
    }
    list.push(job);
    true
}
