//! Jira-backed executors and their wiring from configuration

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tahecho_agent::{
    ConversationState, Executor, ExecutorError, ExecutorRegistry, LanguageModel, ModelExecutor,
    TaskType, UnavailableExecutor,
};

use crate::config::Config;
use crate::jira::{Issue, JiraClient, MAX_RESULTS};

pub const ISSUE_TRACKER: &str = "issue_tracker";
pub const ISSUE_RELATIONSHIPS: &str = "issue_relationships";

/// Issues looked up per relationship question
const MAX_LINKED_ISSUES: usize = 3;

const ASK_FOR_ISSUE_KEY: &str =
    "Which issue should I look at? Please give me its issue key, for example PGA-123.";

static ISSUE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][A-Z0-9]+-\d+\b").unwrap());

const PLANNER_PROMPT: &str = r#"You turn a user's request about Jira tickets into one JQL search against {instance} ({flavor}).

Reply with exactly one JSON object and nothing else, either
{"action": "search", "jql": "<JQL query>"}
or
{"action": "clarify", "question": "<question for the user>"}

Rules:
1. If the user asks for "my tickets" or tickets "assigned to me" and the conversation doesn't say who they are, ask for their Jira username or email address.
2. If the user names a project without a clear project key, ask them to confirm the exact project key (for example "PGA").
3. A bare username or email address answers an earlier question: search with assignee = '<value>'.
4. A bare project key answers an earlier question about the project: search with project = '<KEY>'.
5. Exclude finished work only when the user asks for open tickets: status != 'Done' AND status != 'Closed'.
6. End every query with ORDER BY updated DESC.

Examples:
- assignee = 'user@company.com' AND project = 'PGA' ORDER BY updated DESC
- project = 'PGA' AND status != 'Done' ORDER BY updated DESC"#;

/// What the planner decided to do with a request
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum Plan {
    Search { jql: String },
    Clarify { question: String },
}

impl Plan {
    /// Read the planner's reply. A plain-text question is taken as a
    /// clarification; anything else is an error.
    fn parse(text: &str) -> Result<Self, ExecutorError> {
        let text = text.trim();
        let object = match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => &text[start..=end],
            _ => text,
        };

        match serde_json::from_str::<Plan>(object) {
            Ok(Plan::Search { jql }) if jql.trim().is_empty() => {
                Err(ExecutorError::untagged("The ticket search came back empty."))
            }
            Ok(plan) => Ok(plan),
            Err(_) if text.ends_with('?') => Ok(Plan::Clarify {
                question: text.to_string(),
            }),
            Err(e) => Err(ExecutorError::untagged(format!(
                "Could not read the ticket search plan: {}",
                e
            ))),
        }
    }
}

/// Answers ticket questions with a JQL search planned by the language model
pub struct IssueTrackerExecutor {
    jira: JiraClient,
    planner: ModelExecutor,
}

impl IssueTrackerExecutor {
    pub fn new(jira: JiraClient, model: Arc<dyn LanguageModel>) -> Self {
        let prompt = PLANNER_PROMPT
            .replace("{instance}", jira.base_url())
            .replace("{flavor}", jira.flavor());
        Self {
            planner: ModelExecutor::new(ISSUE_TRACKER, prompt, model).with_temperature(0.0),
            jira,
        }
    }
}

#[async_trait]
impl Executor for IssueTrackerExecutor {
    fn name(&self) -> &str {
        ISSUE_TRACKER
    }

    async fn execute(&self, state: &ConversationState) -> Result<String, ExecutorError> {
        match Plan::parse(&self.planner.execute(state).await?)? {
            Plan::Clarify { question } => Ok(question),
            Plan::Search { jql } => {
                tracing::info!("Searching Jira: {}", jql);
                let issues = self.jira.search(&jql).await?;
                Ok(format_search(&jql, &issues))
            }
        }
    }
}

fn format_search(jql: &str, issues: &[Issue]) -> String {
    if issues.is_empty() {
        return format!("No matching tickets were found for JQL `{}`.", jql);
    }

    let mut out = format!("Found {} ticket(s) for JQL `{}`", issues.len(), jql);
    if issues.len() as u32 >= MAX_RESULTS {
        out.push_str(&format!(" (showing the first {})", MAX_RESULTS));
    }
    out.push(':');
    for issue in issues {
        out.push_str(&format!("\n- {}", issue.key));
        if let Some(kind) = &issue.fields.issue_type {
            out.push_str(&format!(" [{}]", kind.name));
        }
        out.push_str(&format!(
            " {} (status: {}, assignee: {}",
            issue.summary(),
            issue.status(),
            issue.assignee()
        ));
        if let Some(priority) = &issue.fields.priority {
            out.push_str(&format!(", priority: {}", priority.name));
        }
        out.push(')');
    }
    out
}

/// Reports links, parent and subtasks of the issues named in the request
pub struct RelationshipExecutor {
    jira: JiraClient,
}

impl RelationshipExecutor {
    pub fn new(jira: JiraClient) -> Self {
        Self { jira }
    }
}

#[async_trait]
impl Executor for RelationshipExecutor {
    fn name(&self) -> &str {
        ISSUE_RELATIONSHIPS
    }

    async fn execute(&self, state: &ConversationState) -> Result<String, ExecutorError> {
        let keys = issue_keys(&state.user_input);
        if keys.is_empty() {
            return Ok(ASK_FOR_ISSUE_KEY.to_string());
        }

        let mut sections = Vec::with_capacity(keys.len());
        for key in keys {
            let issue = self.jira.issue(key).await?;
            sections.push(format_relationships(&issue));
        }
        Ok(sections.join("\n\n"))
    }
}

/// Distinct issue keys in order of appearance
fn issue_keys(text: &str) -> Vec<&str> {
    let mut keys: Vec<&str> = Vec::new();
    for m in ISSUE_KEY.find_iter(text) {
        if !keys.contains(&m.as_str()) {
            keys.push(m.as_str());
        }
        if keys.len() == MAX_LINKED_ISSUES {
            break;
        }
    }
    keys
}

fn format_relationships(issue: &Issue) -> String {
    let mut lines = vec![format!(
        "{} {} (status: {})",
        issue.key,
        issue.summary(),
        issue.status()
    )];

    let fields = &issue.fields;
    if let Some(parent) = &fields.parent {
        lines.push(format!("- child of {} {}", parent.key, parent.summary()));
    }
    for (relation, other) in fields.issue_links.iter().filter_map(|l| l.describe()) {
        lines.push(format!(
            "- {} {} {} (status: {})",
            relation,
            other.key,
            other.summary(),
            other.status()
        ));
    }
    for subtask in &fields.subtasks {
        lines.push(format!(
            "- subtask {} {} (status: {})",
            subtask.key,
            subtask.summary(),
            subtask.status()
        ));
    }

    if lines.len() == 1 {
        lines.push("- no linked issues, parent or subtasks".to_string());
    }
    lines.join("\n")
}

/// Build the routing table. Without a complete Jira connection both
/// capabilities get an executor that explains what is missing.
pub fn build_registry(config: &Config, model: Arc<dyn LanguageModel>) -> ExecutorRegistry {
    let registry = ExecutorRegistry::new();

    match JiraClient::from_settings(&config.jira) {
        Some(jira) => registry
            .with(
                TaskType::Issues,
                Arc::new(IssueTrackerExecutor::new(jira.clone(), model)),
            )
            .with(TaskType::Relationships, Arc::new(RelationshipExecutor::new(jira))),
        None => {
            let missing = config.jira.missing().join(", ");
            tracing::info!("Jira not configured; missing {}", missing);
            let explanation = format!(
                "I can't reach Jira because it isn't configured yet. Please set {} and try again.",
                missing
            );
            registry
                .with(
                    TaskType::Issues,
                    Arc::new(UnavailableExecutor::new(ISSUE_TRACKER, explanation.clone())),
                )
                .with(
                    TaskType::Relationships,
                    Arc::new(UnavailableExecutor::new(ISSUE_RELATIONSHIPS, explanation)),
                )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JiraSettings;
    use serde_json::json;
    use tahecho_agent::{
        CompletionRequest, ErrorTag,
        executor::{MarkedResult, mark, parse_marked},
    };
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    /// Model that always gives the same reply
    struct Fixed(&'static str);

    #[async_trait]
    impl LanguageModel for Fixed {
        async fn complete(&self, _request: &CompletionRequest) -> tahecho_ai::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn state(input: &str) -> ConversationState {
        let mut state = ConversationState::new(None);
        state.begin_turn(input);
        state
    }

    fn config_for(server: &MockServer) -> Config {
        Config {
            jira: JiraSettings {
                instance_url: Some(server.uri()),
                username: Some("bot@acme.com".into()),
                api_token: Some("token".into()),
                cloud: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_parsing() {
        assert_eq!(
            Plan::parse("```json\n{\"action\": \"search\", \"jql\": \"project = 'PGA'\"}\n```")
                .unwrap(),
            Plan::Search {
                jql: "project = 'PGA'".into()
            }
        );
        assert_eq!(
            Plan::parse("Could you please tell me your Jira username?").unwrap(),
            Plan::Clarify {
                question: "Could you please tell me your Jira username?".into()
            }
        );
        assert!(Plan::parse(r#"{"action": "search", "jql": " "}"#).is_err());
        assert!(Plan::parse("PGA-1 is assigned to you.").is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_jira_explains_missing_settings() {
        let registry = build_registry(&Config::default(), Arc::new(Fixed("unused")));
        assert_eq!(registry.names(), vec![ISSUE_RELATIONSHIPS, ISSUE_TRACKER]);

        for task_type in [TaskType::Issues, TaskType::Relationships] {
            let err = registry
                .get(task_type)
                .unwrap()
                .execute(&state("my tickets"))
                .await
                .unwrap_err();
            match parse_marked(&mark(Err(err))) {
                MarkedResult::Unavailable(text) => {
                    assert!(text.contains("JIRA_INSTANCE_URL"));
                    assert!(text.contains("JIRA_API_TOKEN"));
                }
                other => panic!("expected unavailable, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_issue_tracker_runs_planned_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/search/jql"))
            .and(query_param("jql", "assignee = 'jdoe' ORDER BY updated DESC"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issues": [
                    {"key": "PGA-1", "fields": {
                        "summary": "Fix login",
                        "status": {"name": "In Progress"},
                        "assignee": {"displayName": "Jane Doe"},
                        "issuetype": {"name": "Bug"},
                        "priority": {"name": "High"}
                    }},
                    {"key": "PGA-4", "fields": {"summary": "Update docs", "status": {"name": "To Do"}}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let model = Fixed(r#"{"action": "search", "jql": "assignee = 'jdoe' ORDER BY updated DESC"}"#);
        let registry = build_registry(&config_for(&server), Arc::new(model));
        let result = registry
            .get(TaskType::Issues)
            .unwrap()
            .execute(&state("jdoe"))
            .await
            .unwrap();

        assert!(result.starts_with("Found 2 ticket(s)"));
        assert!(result.contains(
            "- PGA-1 [Bug] Fix login (status: In Progress, assignee: Jane Doe, priority: High)"
        ));
        assert!(result.contains("- PGA-4 Update docs (status: To Do, assignee: Unassigned)"));
    }

    #[tokio::test]
    async fn test_issue_tracker_reports_empty_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"issues": []})))
            .mount(&server)
            .await;

        let model = Fixed(r#"{"action": "search", "jql": "project = 'PGA'"}"#);
        let registry = build_registry(&config_for(&server), Arc::new(model));
        let result = registry
            .get(TaskType::Issues)
            .unwrap()
            .execute(&state("PGA"))
            .await
            .unwrap();
        assert_eq!(result, "No matching tickets were found for JQL `project = 'PGA'`.");
    }

    #[tokio::test]
    async fn test_clarification_skips_jira() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let model = Fixed(
            r#"{"action": "clarify", "question": "Could you please tell me your Jira username or email address?"}"#,
        );
        let registry = build_registry(&config_for(&server), Arc::new(model));
        let result = registry
            .get(TaskType::Issues)
            .unwrap()
            .execute(&state("What tickets are assigned to me?"))
            .await
            .unwrap();
        assert_eq!(
            result,
            "Could you please tell me your Jira username or email address?"
        );
    }

    #[tokio::test]
    async fn test_issue_tracker_surfaces_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let model = Fixed(r#"{"action": "search", "jql": "project = 'PGA'"}"#);
        let registry = build_registry(&config_for(&server), Arc::new(model));
        let err = registry
            .get(TaskType::Issues)
            .unwrap()
            .execute(&state("PGA"))
            .await
            .unwrap_err();
        assert_eq!(err.tag, ErrorTag::DomainAuth);
    }

    #[tokio::test]
    async fn test_relationships_ask_for_issue_key() {
        let registry = build_registry(
            &Config {
                jira: JiraSettings {
                    instance_url: Some("http://127.0.0.1:1".into()),
                    username: Some("bot".into()),
                    api_token: Some("token".into()),
                    cloud: None,
                },
                ..Default::default()
            },
            Arc::new(Fixed("unused")),
        );
        let result = registry
            .get(TaskType::Relationships)
            .unwrap()
            .execute(&state("what is blocking my release?"))
            .await
            .unwrap();
        assert_eq!(result, ASK_FOR_ISSUE_KEY);
    }

    #[tokio::test]
    async fn test_relationships_list_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PGA-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "key": "PGA-2",
                "fields": {
                    "summary": "Deploy",
                    "status": {"name": "To Do"},
                    "issuelinks": [{
                        "type": {"inward": "is blocked by", "outward": "blocks"},
                        "inwardIssue": {"key": "PGA-1", "fields": {
                            "summary": "Fix login", "status": {"name": "In Progress"}
                        }}
                    }],
                    "parent": {"key": "PGA-0", "fields": {"summary": "Release 1.0"}},
                    "subtasks": [{"key": "PGA-3", "fields": {
                        "summary": "Write runbook", "status": {"name": "Done"}
                    }}]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PGA-5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "key": "PGA-5",
                "fields": {"summary": "Cleanup", "status": {"name": "Done"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let registry = build_registry(&config_for(&server), Arc::new(Fixed("unused")));
        let result = registry
            .get(TaskType::Relationships)
            .unwrap()
            .execute(&state("What blocks PGA-2, and PGA-5? Is PGA-2 late?"))
            .await
            .unwrap();

        assert_eq!(
            result,
            "PGA-2 Deploy (status: To Do)\n\
             - child of PGA-0 Release 1.0\n\
             - is blocked by PGA-1 Fix login (status: In Progress)\n\
             - subtask PGA-3 Write runbook (status: Done)\n\
             \n\
             PGA-5 Cleanup (status: Done)\n\
             - no linked issues, parent or subtasks"
        );
    }

    #[tokio::test]
    async fn test_missing_issue_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "errorMessages": ["Issue does not exist or you do not have permission to see it."]
            })))
            .mount(&server)
            .await;

        let registry = build_registry(&config_for(&server), Arc::new(Fixed("unused")));
        let err = registry
            .get(TaskType::Relationships)
            .unwrap()
            .execute(&state("what blocks PGA-404?"))
            .await
            .unwrap_err();
        assert_eq!(err.tag, ErrorTag::NotFound);
    }

    #[test]
    fn test_issue_keys_are_distinct_and_capped() {
        assert_eq!(
            issue_keys("PGA-1 PGA-1 X-3 OPS-22 A1-4 ZZ-9"),
            vec!["PGA-1", "OPS-22", "A1-4"]
        );
        assert!(issue_keys("covid-19 and pga-1").is_empty());
    }
}
