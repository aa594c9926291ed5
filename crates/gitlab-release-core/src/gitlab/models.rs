//! Request and response bodies of the GitLab REST and GraphQL APIs.
//!
//! Only the fields the release steps read are typed. Issues and merge
//! requests keep every other field in `extra` so templates see the full
//! object GitLab returned.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Access level granting read access (Guest).
pub const PULL_ACCESS_LEVEL: u32 = 10;
/// Access level granting push access (Developer).
pub const PUSH_ACCESS_LEVEL: u32 = 30;

/// `GET /projects/:id`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Project {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub path_with_namespace: Option<String>,
    #[serde(default)]
    pub permissions: Option<Permissions>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Permissions {
    #[serde(default)]
    pub project_access: Option<Access>,
    #[serde(default)]
    pub group_access: Option<Access>,
}

impl Permissions {
    /// Highest access level granted through the project or its group.
    pub fn max_access_level(&self) -> Option<u32> {
        [&self.project_access, &self.group_access]
            .into_iter()
            .flatten()
            .map(|access| access.access_level)
            .max()
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Access {
    pub access_level: u32,
}

/// GraphQL `project { userPermissions { ... } }`.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserPermissions {
    #[serde(default)]
    pub push_code: bool,
    #[serde(default)]
    pub download_code: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MergeRequest {
    pub iid: u64,
    pub project_id: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Issue {
    pub iid: u64,
    pub project_id: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `POST /projects/:id/uploads`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct UploadResponse {
    #[serde(default)]
    pub alt: Option<String>,
    pub url: String,
    #[serde(default)]
    pub full_path: Option<String>,
    #[serde(default)]
    pub markdown: Option<String>,
}

/// `POST /projects/:id/releases`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReleasePayload {
    pub tag_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestones: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_at: Option<String>,
    pub assets: ReleaseAssets,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReleaseAssets {
    pub links: Vec<ReleaseLink>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReleaseLink {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
}

/// `POST /projects/:id/issues`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewIssue {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
}

/// `POST .../notes`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NoteBody {
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_max_access_level() {
        let permissions: Permissions = serde_json::from_value(json!({
            "project_access": {"access_level": 10},
            "group_access": {"access_level": 40},
        }))
        .unwrap();
        assert_eq!(permissions.max_access_level(), Some(40));

        let none: Permissions = serde_json::from_value(json!({
            "project_access": null,
            "group_access": null,
        }))
        .unwrap();
        assert_eq!(none.max_access_level(), None);
    }

    #[test]
    fn test_issue_keeps_unknown_fields() {
        let issue: Issue = serde_json::from_value(json!({
            "id": 99,
            "iid": 3,
            "project_id": 1,
            "state": "closed",
            "title": "bug",
            "labels": ["a"],
        }))
        .unwrap();
        assert_eq!(issue.iid, 3);
        let back = serde_json::to_value(&issue).unwrap();
        assert_eq!(back["labels"], json!(["a"]));
        assert_eq!(back["id"], json!(99));
    }

    #[test]
    fn test_release_payload_omits_absent_fields() {
        let payload = ReleasePayload {
            tag_name: "v1.0.0".into(),
            description: "body".into(),
            milestones: None,
            released_at: None,
            assets: ReleaseAssets::default(),
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"tag_name": "v1.0.0", "description": "body", "assets": {"links": []}})
        );
    }
}
