use crate::path::{Patch, WorkspacePaths};
use crate::types::{IdentityId, Language, Permission};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Reads one field of a stored object, logging and skipping it when malformed.
fn field<T: DeserializeOwned>(fields: &Map<String, Value>, name: &str, what: &str) -> Option<T> {
    let value = fields.get(name).filter(|v| !v.is_null())?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            log::warn!("Ignoring malformed {}.{}: {}", what, name, e);
            None
        }
    }
}

/// A permission that is stored but unreadable grants nothing.
fn permission_field(fields: &Map<String, Value>, name: &str, what: &str) -> Option<Permission> {
    match fields.get(name) {
        None | Some(Value::Null) => None,
        Some(_) => Some(field(fields, name, what).unwrap_or(Permission::Private)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sample {
    pub input: String,
    pub output: String,
}

/// Problem statement metadata attached to a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProblemData {
    pub unique_id: String,
    pub name: String,
    pub url: String,
    pub samples: Vec<Sample>,
}

impl ProblemData {
    pub fn to_value(&self) -> Value {
        json!({
            "uniqueId": self.unique_id,
            "name": self.name,
            "url": self.url,
            "samples": self
                .samples
                .iter()
                .map(|s| json!({ "input": s.input, "output": s.output }))
                .collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceSettings {
    pub default_permission: Option<Permission>,
    pub language: Option<Language>,
    pub compiler_options: BTreeMap<Language, String>,
    pub problem: Option<ProblemData>,
    pub creation_time: Option<i64>,
    pub workspace_name: Option<String>,
}

impl WorkspaceSettings {
    /// Each field is read on its own and a malformed one is skipped.
    ///
    /// Settings that exist but can't be read as an object count as a
    /// PRIVATE workspace, never as an unclaimed one.
    pub fn from_value(value: Option<&Value>) -> Self {
        let fields = match value {
            None | Some(Value::Null) => return Self::default(),
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                log::warn!("Unreadable workspace settings {}, reading as private", other);
                return Self {
                    default_permission: Some(Permission::Private),
                    ..Self::default()
                };
            }
        };
        let compiler_options = fields
            .get("compilerOptions")
            .and_then(Value::as_object)
            .map(|options| {
                options
                    .iter()
                    .filter_map(|(language, flags)| {
                        match (language.parse::<Language>(), flags.as_str()) {
                            (Ok(language), Some(flags)) => Some((language, flags.to_owned())),
                            _ => {
                                log::warn!("Ignoring compiler options for {:?}", language);
                                None
                            }
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            default_permission: permission_field(fields, "defaultPermission", "settings"),
            language: field(fields, "language", "settings"),
            compiler_options,
            problem: field(fields, "problem", "settings"),
            creation_time: field(fields, "creationTime", "settings"),
            workspace_name: field(fields, "workspaceName", "settings"),
        }
    }

    /// Workspaces are claimed once their creator has written a default permission.
    pub fn is_claimed(&self) -> bool {
        self.default_permission.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRecord {
    pub name: Option<String>,
    pub color: Option<String>,
    /// `None` defers to the workspace default.
    pub permission: Option<Permission>,
    pub connections: BTreeMap<String, Value>,
}

impl UserRecord {
    /// Field by field, like `WorkspaceSettings::from_value`. Only a non-object is no record.
    pub fn from_value(value: Option<&Value>) -> Option<Self> {
        let fields = match value? {
            Value::Object(fields) => fields,
            Value::Null => return None,
            other => {
                log::warn!("Ignoring malformed user record {}", other);
                return None;
            }
        };
        Some(Self {
            name: field(fields, "name", "user"),
            color: field(fields, "color", "user"),
            permission: permission_field(fields, "permission", "user"),
            connections: field(fields, "connections", "user").unwrap_or_default(),
        })
    }

    pub fn is_online(&self) -> bool {
        !self.connections.is_empty()
    }
}

pub type Roster = BTreeMap<IdentityId, UserRecord>;

/// One malformed record doesn't hide the rest of the roster.
pub fn parse_roster(value: Option<&Value>) -> Roster {
    value
        .and_then(|v| v.as_object())
        .map(|users| {
            users
                .iter()
                .filter_map(|(id, v)| UserRecord::from_value(Some(v)).map(|r| (id.clone(), r)))
                .collect()
        })
        .unwrap_or_default()
}

/// A partial change of workspace settings requested from the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsChange {
    pub default_permission: Option<Permission>,
    pub language: Option<Language>,
    pub compiler_options: BTreeMap<Language, String>,
    /// `Some(None)` detaches the problem.
    pub problem: Option<Option<ProblemData>>,
    pub workspace_name: Option<String>,
}

impl SettingsChange {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// One entry per touched field, so concurrent writers of other fields are untouched.
    pub fn to_patch(&self, paths: &WorkspacePaths) -> Patch {
        let mut patch = Patch::new();
        if let Some(permission) = self.default_permission {
            patch.set(paths.setting("defaultPermission"), json!(permission));
        }
        if let Some(language) = self.language {
            patch.set(paths.setting("language"), language.as_str());
        }
        for (language, options) in &self.compiler_options {
            patch.set(
                paths.setting("compilerOptions").child(language),
                options.as_str(),
            );
        }
        match &self.problem {
            Some(Some(problem)) => {
                patch.set(paths.setting("problem"), problem.to_value());
            }
            Some(None) => {
                patch.delete(paths.setting("problem"));
            }
            None => {}
        }
        if let Some(name) = &self.workspace_name {
            patch.set(paths.setting("workspaceName"), name.as_str());
        }
        patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkspaceId;

    #[test]
    fn it_reads_settings_snapshots() {
        let value = json!({
            "defaultPermission": "READ",
            "language": "java",
            "compilerOptions": { "cpp": "-O2", "py": "" },
            "problem": { "uniqueId": "p1", "samples": [{ "input": "1", "output": "2" }] },
            "unknownField": true,
        });
        let settings = WorkspaceSettings::from_value(Some(&value));
        assert_eq!(settings.default_permission, Some(Permission::Read));
        assert_eq!(settings.language, Some(Language::Java));
        assert_eq!(
            settings.compiler_options.get(&Language::Cpp).map(|s| s.as_str()),
            Some("-O2")
        );
        assert_eq!(settings.problem.map(|p| p.samples.len()), Some(1));
        assert!(!WorkspaceSettings::from_value(None).is_claimed());
    }

    #[test]
    fn one_bad_field_keeps_the_rest_of_the_settings() {
        let value = json!({
            "defaultPermission": "PRIVATE",
            "language": "rust",
            "compilerOptions": { "cpp": "-O2", "cobol": "-x", "py": 3 },
            "workspaceName": 42,
        });
        let settings = WorkspaceSettings::from_value(Some(&value));
        assert_eq!(settings.default_permission, Some(Permission::Private));
        assert_eq!(settings.language, None);
        assert_eq!(settings.compiler_options.len(), 1);
        assert_eq!(settings.workspace_name, None);
        assert!(settings.is_claimed());
    }

    #[test]
    fn unreadable_settings_never_read_as_unclaimed() {
        let bad_permission = json!({ "defaultPermission": "EVERYONE" });
        assert_eq!(
            WorkspaceSettings::from_value(Some(&bad_permission)).default_permission,
            Some(Permission::Private)
        );
        let not_an_object = json!("settings");
        assert!(WorkspaceSettings::from_value(Some(&not_an_object)).is_claimed());
        let partial = json!({ "language": "java" });
        assert!(!WorkspaceSettings::from_value(Some(&partial)).is_claimed());
    }

    #[test]
    fn a_malformed_record_does_not_hide_the_roster() {
        let value = json!({
            "u1": { "name": "Alice", "permission": "OWNER", "connections": { "c": { "registeredAt": 1 } } },
            "u2": { "name": "Bob", "permission": "SUPERUSER" },
            "u3": { "name": "Carol" },
            "u4": "garbage",
        });
        let roster = parse_roster(Some(&value));
        assert_eq!(roster.len(), 3);
        assert!(roster["u1"].is_online());
        assert_eq!(roster["u2"].name.as_deref(), Some("Bob"));
        assert_eq!(roster["u2"].permission, Some(Permission::Private));
        assert_eq!(roster["u3"].permission, None);
        assert!(!roster["u3"].is_online());
    }

    #[test]
    fn settings_changes_become_partial_updates() {
        let workspace_id = WorkspaceId::parse("MZ1hG2tqfZ8CfQ2l1xA").expect("");
        let paths = WorkspacePaths::new(&workspace_id);
        let change = SettingsChange {
            language: Some(Language::Py),
            problem: Some(None),
            ..SettingsChange::default()
        };
        let patch = change.to_patch(&paths);
        assert_eq!(patch.len(), 2);
        assert_eq!(
            patch.get(&paths.setting("language")),
            Some(&Some(json!("py")))
        );
        assert_eq!(patch.get(&paths.setting("problem")), Some(&None));
    }
}
