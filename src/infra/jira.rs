use async_trait::async_trait;
use base64::prelude::{BASE64_STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{
    Client, RequestBuilder, Response,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{JiraAuth, OAuthCredentials};
use crate::domain::ticket::{
    AttachmentBlob, AttachmentRef, AttachmentUpload, CommentRecord, TicketId, TicketRecord,
};
use crate::error::{AppError, AppResult};
use crate::services::{CredentialRefresher, IssueTrackerService};

type RefreshSink = Box<dyn Fn(&OAuthCredentials) + Send + Sync>;

pub struct JiraClient {
    http: Client,
    base_url: String,
    auth: RwLock<JiraAuth>,
    on_refresh: Option<RefreshSink>,
}

impl JiraClient {
    pub fn new(base_url: impl Into<String>, auth: JiraAuth) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            auth: RwLock::new(auth),
            on_refresh: None,
        }
    }

    pub fn on_refresh(mut self, sink: impl Fn(&OAuthCredentials) + Send + Sync + 'static) -> Self {
        self.on_refresh = Some(Box::new(sink));
        self
    }

    pub fn refreshes_credentials(&self) -> bool {
        matches!(self.auth.try_read().as_deref(), Ok(JiraAuth::OAuth(_)))
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/2/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> AppResult<Response> {
        let authorization = auth_header(&*self.auth.read().await);
        let response = request
            .header(AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|err| AppError::Network(format!("failed to call Jira: {err}")))?;
        check_status(response).await
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> AppResult<T> {
        let response = self.send(request.header(ACCEPT, "application/json")).await?;
        response.json().await.map_err(parse_error)
    }
}

#[async_trait]
impl IssueTrackerService for JiraClient {
    async fn fetch_ticket(&self, id: &TicketId) -> AppResult<TicketRecord> {
        let issue: JiraIssue = self
            .send_json(
                self.http
                    .get(self.api(&format!("issue/{id}")))
                    .query(&[("fields", "summary,status,description,created,comment,attachment")]),
            )
            .await?;
        issue.into_record()
    }

    async fn update_ticket_status(&self, id: &TicketId, status: &str) -> AppResult<()> {
        let url = self.api(&format!("issue/{id}/transitions"));
        let available: JiraTransitions = self.send_json(self.http.get(&url)).await?;
        let transition = pick_transition(&available.transitions, status).ok_or_else(|| {
            AppError::Validation(format!("{id} cannot move to '{status}' from its current status"))
        })?;

        self.send(
            self.http
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .json(&TransitionRequest {
                    transition: TransitionRef {
                        id: transition.id.clone(),
                    },
                }),
        )
        .await?;
        info!(ticket = %id, status, "transitioned ticket");
        Ok(())
    }

    async fn upload_attachment(&self, id: &TicketId, upload: &AttachmentUpload) -> AppResult<()> {
        let part = Part::bytes(upload.bytes.clone()).file_name(upload.filename.clone());
        let form = Form::new().part("file", part);
        self.send(
            self.http
                .post(self.api(&format!("issue/{id}/attachments")))
                .header("X-Atlassian-Token", "no-check")
                .multipart(form),
        )
        .await?;
        debug!(ticket = %id, file = %upload.filename, "uploaded attachment");
        Ok(())
    }

    async fn post_comment(&self, id: &TicketId, body: &str) -> AppResult<CommentRecord> {
        let comment: JiraComment = self
            .send_json(
                self.http
                    .post(self.api(&format!("issue/{id}/comment")))
                    .header(CONTENT_TYPE, "application/json")
                    .json(&CommentRequest { body }),
            )
            .await?;
        comment.into_record()
    }

    async fn resolve_attachment(&self, attachment_id: &str) -> AppResult<AttachmentBlob> {
        let response = self
            .send(
                self.http
                    .get(self.api(&format!("attachment/content/{attachment_id}")))
                    .header(ACCEPT, "*/*"),
            )
            .await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::Network(format!("failed to read attachment: {err}")))?;
        Ok(AttachmentBlob {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

#[async_trait]
impl CredentialRefresher for JiraClient {
    async fn refresh_credentials(&self) -> AppResult<()> {
        let credentials = match &*self.auth.read().await {
            JiraAuth::OAuth(credentials) => credentials.clone(),
            _ => {
                return Err(AppError::Auth(
                    "Jira rejected the configured token; run `spotter config init`".to_string(),
                ));
            }
        };

        let response = self
            .http
            .post(&credentials.token_url)
            .header(CONTENT_TYPE, "application/json")
            .json(&TokenRefreshRequest {
                grant_type: "refresh_token",
                client_id: &credentials.client_id,
                client_secret: &credentials.client_secret,
                refresh_token: &credentials.refresh_token,
            })
            .send()
            .await
            .map_err(|err| AppError::Network(format!("failed to reach token endpoint: {err}")))?;
        let response = check_status(response).await.map_err(|err| match err {
            AppError::Network(message) => AppError::Network(message),
            other => AppError::Auth(format!("token refresh rejected: {other}")),
        })?;
        let tokens: TokenRefreshResponse = response.json().await.map_err(parse_error)?;

        let refreshed = OAuthCredentials {
            access_token: tokens.access_token,
            refresh_token: tokens
                .refresh_token
                .unwrap_or_else(|| credentials.refresh_token.clone()),
            ..credentials
        };
        if let Some(sink) = &self.on_refresh {
            sink(&refreshed);
        }
        *self.auth.write().await = JiraAuth::OAuth(refreshed);
        info!("refreshed Jira access token");
        Ok(())
    }
}

fn auth_header(auth: &JiraAuth) -> String {
    match auth {
        JiraAuth::Basic { email, token } => {
            let encoded = BASE64_STANDARD.encode(format!("{email}:{token}"));
            format!("Basic {encoded}")
        }
        JiraAuth::Bearer { token } => format!("Bearer {token}"),
        JiraAuth::OAuth(credentials) => format!("Bearer {}", credentials.access_token),
    }
}

async fn check_status(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unable to read response>".to_string());
    Err(status_error(status.as_u16(), body))
}

fn status_error(status: u16, body: String) -> AppError {
    match status {
        401 => AppError::Auth(format!("Jira responded with 401: {body}")),
        404 => AppError::NotFound(body),
        _ => AppError::Tracker {
            status,
            message: body,
        },
    }
}

fn parse_error(err: reqwest::Error) -> AppError {
    AppError::Network(format!("failed to parse Jira response: {err}"))
}

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| AppError::Network(format!("unexpected Jira timestamp '{raw}': {err}")))
}

fn pick_transition<'a>(transitions: &'a [JiraTransition], status: &str) -> Option<&'a JiraTransition> {
    let wanted = status.trim();
    transitions
        .iter()
        .find(|t| t.to.as_ref().is_some_and(|to| to.name.eq_ignore_ascii_case(wanted)))
        .or_else(|| transitions.iter().find(|t| t.name.eq_ignore_ascii_case(wanted)))
}

#[derive(Deserialize)]
struct JiraIssue {
    key: String,
    fields: JiraIssueFields,
}

#[derive(Deserialize)]
struct JiraIssueFields {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    status: Option<JiraNamed>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    comment: Option<JiraCommentPage>,
    #[serde(default)]
    attachment: Vec<JiraAttachment>,
}

impl JiraIssue {
    fn into_record(self) -> AppResult<TicketRecord> {
        let fields = self.fields;
        let comments = fields
            .comment
            .map(|page| page.comments)
            .unwrap_or_default()
            .into_iter()
            .map(JiraComment::into_record)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(TicketRecord {
            id: TicketId::parse(&self.key)?,
            status: fields.status.map(|s| s.name).unwrap_or_default(),
            summary: fields.summary.unwrap_or_default(),
            description_raw: fields.description.unwrap_or_default(),
            comments,
            created_at: fields.created.as_deref().map(parse_timestamp).transpose()?,
            attachments: fields
                .attachment
                .into_iter()
                .map(|a| AttachmentRef {
                    id: a.id,
                    filename: a.filename,
                })
                .collect(),
        })
    }
}

#[derive(Deserialize)]
struct JiraNamed {
    name: String,
}

#[derive(Deserialize)]
struct JiraCommentPage {
    #[serde(default)]
    comments: Vec<JiraComment>,
}

#[derive(Deserialize)]
struct JiraComment {
    id: String,
    #[serde(default)]
    author: Option<JiraUser>,
    #[serde(default)]
    body: String,
    created: String,
}

impl JiraComment {
    fn into_record(self) -> AppResult<CommentRecord> {
        Ok(CommentRecord {
            created_at: parse_timestamp(&self.created)?,
            id: self.id,
            author: self
                .author
                .and_then(|user| user.display_name)
                .unwrap_or_else(|| "Unknown".to_string()),
            body_raw: self.body,
        })
    }
}

#[derive(Deserialize)]
struct JiraUser {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct JiraAttachment {
    id: String,
    filename: String,
}

#[derive(Deserialize)]
struct JiraTransitions {
    #[serde(default)]
    transitions: Vec<JiraTransition>,
}

#[derive(Deserialize)]
struct JiraTransition {
    id: String,
    name: String,
    #[serde(default)]
    to: Option<JiraNamed>,
}

#[derive(Serialize)]
struct TransitionRequest {
    transition: TransitionRef,
}

#[derive(Serialize)]
struct TransitionRef {
    id: String,
}

#[derive(Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

#[derive(Serialize)]
struct TokenRefreshRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ticket::find_attachment;

    const ISSUE: &str = r#"{
        "key": "proj-7",
        "fields": {
            "summary": "Checkout button misaligned",
            "status": { "name": "In Progress" },
            "description": null,
            "created": "2026-02-16T12:00:00.000+0100",
            "comment": {
                "comments": [
                    {
                        "id": "10001",
                        "author": { "displayName": "Dana" },
                        "body": "see !shot.png|thumbnail!",
                        "created": "2026-02-16T12:05:30.250+0000"
                    },
                    { "id": "10002", "body": "", "created": "2026-02-16T13:00:00.000+0000" }
                ]
            },
            "attachment": [ { "id": "555", "filename": "shot.png", "mimeType": "image/png" } ]
        }
    }"#;

    #[test]
    fn parses_issue_payload_into_record() {
        let issue: JiraIssue = serde_json::from_str(ISSUE).expect("issue json");
        let record = issue.into_record().expect("record");

        assert_eq!(record.id.as_str(), "PROJ-7");
        assert_eq!(record.status, "In Progress");
        assert_eq!(record.description_raw, "");
        assert_eq!(
            record.created_at.map(|t| t.to_rfc3339()),
            Some("2026-02-16T11:00:00+00:00".to_string())
        );
        assert_eq!(record.comments.len(), 2);
        assert_eq!(record.comments[0].author, "Dana");
        assert_eq!(record.comments[1].author, "Unknown");
        assert_eq!(
            find_attachment(&record.attachments, "shot.png").map(|a| a.id.as_str()),
            Some("555")
        );
    }

    #[test]
    fn malformed_comment_timestamp_is_an_error() {
        let raw = r#"{"key":"P-1","fields":{"comment":{"comments":[{"id":"1","created":"yesterday"}]}}}"#;
        let issue: JiraIssue = serde_json::from_str(raw).expect("issue json");
        assert!(issue.into_record().is_err());
    }

    #[test]
    fn maps_http_status_to_error_kind() {
        assert!(status_error(401, String::new()).is_auth());
        assert!(matches!(status_error(404, String::new()), AppError::NotFound(_)));
        assert!(matches!(
            status_error(503, "down".to_string()),
            AppError::Tracker { status: 503, .. }
        ));
    }

    #[test]
    fn builds_authorization_header_per_auth_kind() {
        let basic = JiraAuth::Basic {
            email: "me@example.com".to_string(),
            token: "secret".to_string(),
        };
        assert_eq!(auth_header(&basic), "Basic bWVAZXhhbXBsZS5jb206c2VjcmV0");
        let bearer = JiraAuth::Bearer {
            token: "pat".to_string(),
        };
        assert_eq!(auth_header(&bearer), "Bearer pat");
    }

    #[test]
    fn picks_transition_by_target_status_then_name() {
        let transitions: JiraTransitions = serde_json::from_str(
            r#"{"transitions":[
                {"id":"11","name":"Start work","to":{"name":"In Progress"}},
                {"id":"31","name":"Done"}
            ]}"#,
        )
        .expect("transitions json");

        let by_target = pick_transition(&transitions.transitions, "in progress").map(|t| t.id.as_str());
        let by_name = pick_transition(&transitions.transitions, "DONE").map(|t| t.id.as_str());

        assert_eq!(by_target, Some("11"));
        assert_eq!(by_name, Some("31"));
        assert!(pick_transition(&transitions.transitions, "Blocked").is_none());
    }

    #[test]
    fn token_only_clients_cannot_refresh() {
        let client = JiraClient::new(
            "https://jira.example/",
            JiraAuth::Bearer {
                token: "pat".to_string(),
            },
        );
        assert!(!client.refreshes_credentials());
        assert_eq!(
            client.api("issue/PROJ-1"),
            "https://jira.example/rest/api/2/issue/PROJ-1"
        );
    }
}
