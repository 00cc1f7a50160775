use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

pub type IdentityId = String;
pub type ConnectionKey = String;
pub type SubscriptionId = u32;
pub type CommandId = u32;
pub type ClientId = u32;

/// Characters a push key is made of, in ascending sort order.
pub const PUSH_KEY_ALPHABET: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

pub const WORKSPACE_ID_LEN: usize = 19;

/// Generates a 20 character, roughly time ordered unique key starting with `-`.
pub fn generate_push_key(now_millis: u64) -> String {
    let mut key = String::with_capacity(WORKSPACE_ID_LEN + 1);
    key.push('-');

    // 7 characters cover 42 bits of milliseconds
    let mut time_chars = [0u8; 7];
    let mut t = now_millis;
    for c in time_chars.iter_mut().rev() {
        *c = PUSH_KEY_ALPHABET[(t % 64) as usize];
        t /= 64;
    }
    key.extend(time_chars.iter().map(|c| *c as char));

    let random = uuid::Uuid::new_v4();
    for byte in random.as_bytes().iter().take(WORKSPACE_ID_LEN - time_chars.len()) {
        key.push(PUSH_KEY_ALPHABET[(*byte % 64) as usize] as char);
    }
    key
}

/// Milliseconds since the unix epoch, zero if the clock is before it.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn is_push_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// The id of a workspace as it appears in the URL: a push key without its leading `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn parse(segment: &str) -> Result<Self, SessionError> {
        if segment.chars().count() == WORKSPACE_ID_LEN && segment.chars().all(is_push_key_char) {
            Ok(Self(segment.to_owned()))
        } else {
            Err(SessionError::BadWorkspaceId(segment.to_owned()))
        }
    }

    pub fn from_push_key(key: &str) -> Result<Self, SessionError> {
        Self::parse(key.strip_prefix('-').unwrap_or(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkspaceId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WorkspaceId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WorkspaceId> for String {
    fn from(id: WorkspaceId) -> Self {
        id.0
    }
}

/// Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Private,
    Read,
    ReadWrite,
    Owner,
}

impl Permission {
    pub fn allows(self, required: Permission) -> bool {
        self >= required
    }
}

/// The permission actually applied to an identity: its own override wins over the workspace default.
pub fn effective_permission(
    override_permission: Option<Permission>,
    default_permission: Option<Permission>,
) -> Option<Permission> {
    override_permission.or(default_permission)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Language {
    Cpp,
    Java,
    Py,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Cpp, Language::Java, Language::Py];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Py => "py",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Cpp
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| format!("unknown language {:?}", s))
    }
}

impl TryFrom<String> for Language {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Language> for String {
    fn from(l: Language) -> Self {
        l.as_str().to_owned()
    }
}

/// Identifies one shared buffer of a workspace: `code:<lang>`, `input` or `scribble`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BufferKey {
    Code(Language),
    Input,
    Scribble,
}

impl BufferKey {
    pub fn is_code(&self) -> bool {
        matches!(self, BufferKey::Code(_))
    }

    /// Every `code:<lang>` key other than this one. Empty for non-code keys.
    pub fn code_siblings(&self) -> Vec<BufferKey> {
        match self {
            BufferKey::Code(lang) => Language::ALL
                .iter()
                .filter(|l| *l != lang)
                .map(|l| BufferKey::Code(*l))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn buffer_id(&self, workspace_id: &WorkspaceId) -> String {
        format!("workspace/{}/buffers/{}", workspace_id, self)
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferKey::Code(lang) => write!(f, "code:{}", lang),
            BufferKey::Input => f.write_str("input"),
            BufferKey::Scribble => f.write_str("scribble"),
        }
    }
}

impl FromStr for BufferKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(BufferKey::Input),
            "scribble" => Ok(BufferKey::Scribble),
            _ => match s.strip_prefix("code:") {
                Some(lang) => lang.parse().map(BufferKey::Code),
                None => Err(format!("unknown buffer key {:?}", s)),
            },
        }
    }
}

impl TryFrom<String> for BufferKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BufferKey> for String {
    fn from(key: BufferKey) -> Self {
        key.to_string()
    }
}

/// What the identity provider hands us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub color: String,
}

impl Identity {
    pub fn new(id: impl Into<IdentityId>, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: color.into(),
        }
    }
}
