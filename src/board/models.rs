use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceRole {
    Owner,
    Admin,
    Member,
}

impl WorkspaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Admin => "ADMIN",
            Self::Member => "MEMBER",
        }
    }
}

impl FromStr for WorkspaceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OWNER" => Ok(Self::Owner),
            "ADMIN" => Ok(Self::Admin),
            "MEMBER" => Ok(Self::Member),
            _ => Err(format!("Invalid workspace role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub role: WorkspaceRole,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub is_default: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    pub pipeline_id: String,
    pub name: String,
    pub position: i64,
    pub color: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl ApplicationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl FromStr for ApplicationPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    #[default]
    Active,
    Archived,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "ARCHIVED" => Ok(Self::Archived),
            _ => Err(format!("Invalid application status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub workspace_id: String,
    pub pipeline_id: String,
    pub stage_id: String,
    pub company: String,
    pub role: String,
    pub link: Option<String>,
    pub source: Option<String>,
    pub location: Option<String>,
    pub comp_min: Option<i64>,
    pub comp_max: Option<i64>,
    pub priority: ApplicationPriority,
    pub status: ApplicationStatus,
    pub position: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Note,
    StageMoved,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "NOTE",
            Self::StageMoved => "STAGE_MOVED",
        }
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOTE" => Ok(Self::Note),
            "STAGE_MOVED" => Ok(Self::StageMoved),
            _ => Err(format!("Invalid activity type: {}", s)),
        }
    }
}

/// Audit trail entry attached to an application.
///
/// `STAGE_MOVED` entries carry `{"fromStageId": .., "toStageId": ..}` in
/// `data`; notes carry free text in `content`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub application_id: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub content: Option<String>,
    pub data: Option<serde_json::Value>,
    pub created_by_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Open,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Done => "DONE",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "DONE" => Ok(Self::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub workspace_id: String,
    pub application_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub due_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Metadata for an uploaded file; the bytes live in object storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub workspace_id: String,
    pub application_id: String,
    pub name: String,
    pub storage_key: String,
    pub mime: String,
    pub size: i64,
    pub created_at: String,
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    pub pipeline: Pipeline,
    pub columns: Vec<ColumnView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnView {
    pub stage: Stage,
    pub applications: Vec<Application>,
}

// Write-side inputs, validated by the API layer before they reach the db
#[derive(Debug, Clone, Default)]
pub struct NewApplication {
    pub workspace_id: String,
    pub pipeline_id: String,
    pub stage_id: String,
    pub company: String,
    pub role: String,
    pub link: Option<String>,
    pub source: Option<String>,
    pub location: Option<String>,
    pub comp_min: Option<i64>,
    pub comp_max: Option<i64>,
    pub priority: Option<ApplicationPriority>,
    pub status: Option<ApplicationStatus>,
    pub position: Option<i64>,
}

/// Partial update of an application. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ApplicationPatch {
    pub company: Option<String>,
    pub role: Option<String>,
    pub link: Option<String>,
    pub source: Option<String>,
    pub location: Option<String>,
    pub comp_min: Option<i64>,
    pub comp_max: Option<i64>,
    pub priority: Option<ApplicationPriority>,
    pub status: Option<ApplicationStatus>,
    pub stage_id: Option<String>,
    pub position: Option<i64>,
}

impl ApplicationPatch {
    pub fn is_move(&self) -> bool {
        self.stage_id.is_some() || self.position.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplicationFilter {
    pub pipeline_id: Option<String>,
    pub stage_id: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    pub due_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub storage_key: String,
    pub mime: String,
    pub size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_is_move() {
        assert!(!ApplicationPatch::default().is_move());
        let patch = ApplicationPatch {
            position: Some(0),
            ..Default::default()
        };
        assert!(patch.is_move());
    }

    #[test]
    fn test_workspace_role_roundtrip() {
        for s in &["OWNER", "ADMIN", "MEMBER"] {
            let parsed: WorkspaceRole = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("owner".parse::<WorkspaceRole>().is_err());
    }

    #[test]
    fn test_activity_type_roundtrip() {
        for s in &["NOTE", "STAGE_MOVED"] {
            let parsed: ActivityType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("MOVED".parse::<ActivityType>().is_err());
    }

    #[test]
    fn test_serde_uses_screaming_case_for_enums() {
        assert_eq!(
            serde_json::to_string(&ActivityType::StageMoved).unwrap(),
            "\"STAGE_MOVED\""
        );
        assert_eq!(
            serde_json::from_str::<TaskStatus>("\"DONE\"").unwrap(),
            TaskStatus::Done
        );
        assert_eq!(
            serde_json::to_string(&ApplicationPriority::High).unwrap(),
            "\"HIGH\""
        );
    }

    #[test]
    fn test_application_serializes_camel_case() {
        let app = Application {
            id: "a1".into(),
            workspace_id: "w1".into(),
            pipeline_id: "p1".into(),
            stage_id: "s1".into(),
            company: "ACME Corp".into(),
            role: "Intern".into(),
            link: None,
            source: None,
            location: None,
            comp_min: Some(10),
            comp_max: None,
            priority: ApplicationPriority::default(),
            status: ApplicationStatus::default(),
            position: 0,
            created_at: "2026-01-01 00:00:00".into(),
            updated_at: "2026-01-01 00:00:00".into(),
        };
        let value = serde_json::to_value(&app).unwrap();
        assert_eq!(value["stageId"], "s1");
        assert_eq!(value["compMin"], 10);
        assert_eq!(value["priority"], "MEDIUM");
        assert_eq!(value["status"], "ACTIVE");
    }

    #[test]
    fn test_activity_type_field_is_named_type() {
        let activity = Activity {
            id: "x".into(),
            application_id: "a".into(),
            activity_type: ActivityType::Note,
            content: Some("hi".into()),
            data: None,
            created_by_id: "u".into(),
            created_at: "now".into(),
        };
        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["type"], "NOTE");
        assert_eq!(value["createdById"], "u");
    }
}
