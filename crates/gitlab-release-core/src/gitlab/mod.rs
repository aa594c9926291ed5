//! GitLab API access: the retrying HTTP client and the payloads it exchanges.

pub mod client;
pub mod models;

pub use client::GitLabClient;
pub use models::{
    Access, Issue, MergeRequest, NewIssue, NoteBody, Permissions, Project, ReleaseAssets,
    ReleaseLink, ReleasePayload, UploadResponse, UserPermissions,
};
