//! JSON command and event types exchanged with the lock.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ProtocolError, ProtocolResult};

/// Well-known query targets.
pub mod targets {
    /// Current unlock password; answered with `{"password": "..."}`.
    pub const PASSWORD: &str = "password";
    /// Unlock history records.
    pub const UNLOCK_LOGS: &str = "unlock_logs";
    /// Doorbell / sensor event records.
    pub const EVENTS: &str = "events";
    /// Visitor-intent analytics, accepts `limit`.
    pub const VISITOR_INTENTS: &str = "visitor_intents";
    /// Package-alert analytics, accepts `limit`.
    pub const PACKAGE_ALERTS: &str = "package_alerts";
    /// Replies to user-management commands.
    pub const USER_MGMT: &str = "user_mgmt";
}

/// Client-generated correlation token.
///
/// Generated as a UUID string; parsed leniently from either a JSON string or
/// number since devices echo it back in whichever form they stored it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SeqId(String);

impl SeqId {
    /// Generates a fresh, session-unique sequence id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SeqId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de;

        struct SeqIdVisitor;

        impl de::Visitor<'_> for SeqIdVisitor {
            type Value = SeqId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or integer sequence id")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<SeqId, E> {
                Ok(SeqId::new(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<SeqId, E> {
                Ok(SeqId::new(value.to_string()))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<SeqId, E> {
                Ok(SeqId::new(value.to_string()))
            }
        }

        deserializer.deserialize_any(SeqIdVisitor)
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Any request sent to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    /// Poll server-held state.
    Query(Query),
    /// Fingerprint / NFC / password user management.
    UserMgmt(UserMgmtCommand),
    /// Plain device command such as `unlock`.
    Command(DeviceCommand),
}

impl OutboundCommand {
    /// Correlation handle, if this command expects a reply.
    pub fn seq_id(&self) -> Option<&SeqId> {
        match self {
            Self::Query(query) => Some(&query.seq_id),
            Self::UserMgmt(cmd) => cmd.seq_id.as_ref(),
            Self::Command(cmd) => cmd.seq_id.as_ref(),
        }
    }

    /// Returns the correlation handle, generating one if none is set.
    pub fn ensure_seq_id(&mut self) -> SeqId {
        let slot = match self {
            Self::Query(query) => return query.seq_id.clone(),
            Self::UserMgmt(cmd) => &mut cmd.seq_id,
            Self::Command(cmd) => &mut cmd.seq_id,
        };
        slot.get_or_insert_with(SeqId::generate).clone()
    }

    /// Name of the `query_result` target expected in reply.
    pub fn reply_target(&self) -> &str {
        match self {
            Self::Query(query) => &query.target,
            Self::UserMgmt(_) => targets::USER_MGMT,
            Self::Command(cmd) => &cmd.command,
        }
    }

    /// Serializes to a JSON text message.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Query> for OutboundCommand {
    fn from(query: Query) -> Self {
        Self::Query(query)
    }
}

impl From<UserMgmtCommand> for OutboundCommand {
    fn from(cmd: UserMgmtCommand) -> Self {
        Self::UserMgmt(cmd)
    }
}

impl From<DeviceCommand> for OutboundCommand {
    fn from(cmd: DeviceCommand) -> Self {
        Self::Command(cmd)
    }
}

/// `{"type":"query","target":...,"seq_id":...}` plus optional parameters
/// (e.g. `limit`) at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub target: String,
    pub seq_id: SeqId,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Query {
    /// Creates a query with a freshly generated sequence id.
    pub fn new(target: impl Into<String>) -> Self {
        Self::with_seq_id(target, SeqId::generate())
    }

    pub fn with_seq_id(target: impl Into<String>, seq_id: SeqId) -> Self {
        Self {
            target: target.into(),
            seq_id,
            params: Map::new(),
        }
    }

    /// Builder: set `limit`.
    pub fn limit(self, limit: u32) -> Self {
        self.param("limit", limit)
    }

    /// Builder: set an arbitrary top-level parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Builder: merge a parameter map.
    pub fn params(mut self, params: Map<String, Value>) -> Self {
        self.params.extend(params);
        self
    }
}

/// Credential category managed by a user-management command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserCategory {
    Finger,
    Nfc,
    Password,
}

impl UserCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Finger => "finger",
            Self::Nfc => "nfc",
            Self::Password => "password",
        }
    }
}

impl FromStr for UserCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "finger" => Ok(Self::Finger),
            "nfc" => Ok(Self::Nfc),
            "password" => Ok(Self::Password),
            other => Err(format!("unknown user category: {other} (expected finger, nfc or password)")),
        }
    }
}

/// User-management operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserCommand {
    Add,
    Del,
    Clear,
    Query,
    Set,
}

impl UserCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Del => "del",
            Self::Clear => "clear",
            Self::Query => "query",
            Self::Set => "set",
        }
    }
}

impl FromStr for UserCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "del" => Ok(Self::Del),
            "clear" => Ok(Self::Clear),
            "query" => Ok(Self::Query),
            "set" => Ok(Self::Set),
            other => Err(format!("unknown user command: {other}")),
        }
    }
}

/// `{"type":"user_mgmt","category":...,"command":...,"user_id":N,"payload"?:...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMgmtCommand {
    pub category: UserCategory,
    pub command: UserCommand,
    #[serde(default)]
    pub user_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_id: Option<SeqId>,
}

impl UserMgmtCommand {
    /// Builds a command, applying the payload inclusion rule.
    ///
    /// `password`/`set` always carries a payload (empty when none is given).
    /// Every other combination carries one only when the caller supplies it.
    pub fn new(
        category: UserCategory,
        command: UserCommand,
        user_id: u32,
        payload: Option<String>,
    ) -> Self {
        let payload = match (category, command) {
            (UserCategory::Password, UserCommand::Set) => Some(payload.unwrap_or_default()),
            _ => payload,
        };
        Self {
            category,
            command,
            user_id,
            payload,
            seq_id: None,
        }
    }

    /// Builder: attach a correlation id.
    pub fn with_seq_id(mut self, seq_id: SeqId) -> Self {
        self.seq_id = Some(seq_id);
        self
    }
}

/// Plain device command: `{"type":"command","command":"unlock",...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_id: Option<SeqId>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl DeviceCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            seq_id: None,
            params: Map::new(),
        }
    }

    /// Builder: attach a correlation id.
    pub fn with_seq_id(mut self, seq_id: SeqId) -> Self {
        self.seq_id = Some(seq_id);
        self
    }

    /// Builder: set an arbitrary top-level parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Outcome reported by a `query_result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
    /// Any status string this client does not know; treated as a failure.
    #[serde(other)]
    Unknown,
}

/// Reply envelope for a query or command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub target: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_id: Option<SeqId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Creates a successful result.
    pub fn success(target: impl Into<String>, data: Value) -> Self {
        Self {
            target: target.into(),
            status: ResultStatus::Success,
            seq_id: None,
            data: Some(data),
            total: None,
            error: None,
        }
    }

    /// Creates a failed result.
    pub fn failure(target: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: ResultStatus::Error,
            seq_id: None,
            data: None,
            total: None,
            error: Some(error.into()),
        }
    }

    /// Builder: set the echoed sequence id.
    pub fn with_seq_id(mut self, seq_id: SeqId) -> Self {
        self.seq_id = Some(seq_id);
        self
    }

    /// Builder: set `total`.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Error text for a failed result.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }

    /// The `data` array, or an empty slice when absent or not an array.
    pub fn records(&self) -> &[Value] {
        match &self.data {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }
}

/// A parsed text message from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Log(Value),
    Status(Value),
    Stats(Value),
    /// Frame notification sent alongside binary media.
    Frame(Value),
    QueryResult(QueryResult),
    VisitorIntent(Value),
    PackageAlert(Value),
    /// Any other `type`.
    Other { kind: String, body: Value },
}

impl InboundMessage {
    /// Parses a JSON text message.
    ///
    /// Domain pushes arrive either with their own `type`
    /// (`{"type":"visitor_intent",...}`) or wrapped as
    /// `{"type":"event","event":"visitor_intent",...}`; both map to the same
    /// variant.
    ///
    /// # Example
    ///
    /// ```rust
    /// use doorlink_protocol::InboundMessage;
    ///
    /// let msg = InboundMessage::parse(r#"{"type":"log","msg":"boot"}"#).unwrap();
    /// assert_eq!(msg.kind(), "log");
    /// ```
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let body: Value = serde_json::from_str(text)?;
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        let message = match kind.as_str() {
            "query_result" => Self::QueryResult(serde_json::from_value(body)?),
            "log" => Self::Log(body),
            "status" => Self::Status(body),
            "stats" => Self::Stats(body),
            "frame" => Self::Frame(body),
            "visitor_intent" => Self::VisitorIntent(body),
            "package_alert" => Self::PackageAlert(body),
            "event" => match body.get("event").and_then(Value::as_str) {
                Some("visitor_intent") => Self::VisitorIntent(body),
                Some("package_alert") => Self::PackageAlert(body),
                _ => Self::Other { kind, body },
            },
            _ => Self::Other { kind, body },
        };
        Ok(message)
    }

    /// The message type name.
    pub fn kind(&self) -> &str {
        match self {
            Self::Log(_) => "log",
            Self::Status(_) => "status",
            Self::Stats(_) => "stats",
            Self::Frame(_) => "frame",
            Self::QueryResult(_) => "query_result",
            Self::VisitorIntent(_) => "visitor_intent",
            Self::PackageAlert(_) => "package_alert",
            Self::Other { kind, .. } => kind,
        }
    }
}
