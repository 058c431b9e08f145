//! Audit event categories and their payload shapes

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::time::SystemTime;

/// Category written for any tag this crate does not know
pub const MISSED_CATEGORY: &str = "hip:missed";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PLACEHOLDER: &str = "unknown";

/// What happened, which also decides the payload shape
///
/// Parsing never fails: an unknown tag becomes [`EventCategory::Unrecognized`]
/// and is emitted under [`MISSED_CATEGORY`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventCategory {
    AccountCreated,
    AccountLogin,
    AccountDeleted,
    RequestBlocked,
    RecordsCreated,
    RecordsViewed,
    AppointmentUpdated,
    ProfileCreated,
    ProfileViewed,
    ProfileUpdated,
    Unrecognized(String),
}

impl EventCategory {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "hip_accountCreated" => EventCategory::AccountCreated,
            "hip_accountLogin" => EventCategory::AccountLogin,
            "hip_deleteAccount" => EventCategory::AccountDeleted,
            "hip_request_blocked" => EventCategory::RequestBlocked,
            "records_created" => EventCategory::RecordsCreated,
            "records_viewed" => EventCategory::RecordsViewed,
            "appointmentUpdate" => EventCategory::AppointmentUpdated,
            "profile_created" => EventCategory::ProfileCreated,
            "profile_viewed" => EventCategory::ProfileViewed,
            "profile_updated" => EventCategory::ProfileUpdated,
            other => EventCategory::Unrecognized(other.to_string()),
        }
    }

    /// The wire tag; an unrecognized category keeps the tag it was parsed from
    pub fn tag(&self) -> &str {
        match self {
            EventCategory::AccountCreated => "hip_accountCreated",
            EventCategory::AccountLogin => "hip_accountLogin",
            EventCategory::AccountDeleted => "hip_deleteAccount",
            EventCategory::RequestBlocked => "hip_request_blocked",
            EventCategory::RecordsCreated => "records_created",
            EventCategory::RecordsViewed => "records_viewed",
            EventCategory::AppointmentUpdated => "appointmentUpdate",
            EventCategory::ProfileCreated => "profile_created",
            EventCategory::ProfileViewed => "profile_viewed",
            EventCategory::ProfileUpdated => "profile_updated",
            EventCategory::Unrecognized(tag) => tag,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, EventCategory::Unrecognized(_))
    }
}

impl From<String> for EventCategory {
    fn from(tag: String) -> Self {
        EventCategory::parse(&tag)
    }
}

impl From<EventCategory> for String {
    fn from(category: EventCategory) -> Self {
        category.tag().to_string()
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One audit record, built inside the request path
///
/// The actor is the authenticated identity the request ran as. Which of the
/// optional fields end up in the payload depends on the category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub category: EventCategory,
    pub actor_identity: String,
    #[serde(default)]
    pub actor_name: Option<String>,
    /// Record or health reference the event is about
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Network origin of account events
    #[serde(default)]
    pub address: Option<String>,
}

impl AuditEvent {
    pub fn new(category: EventCategory, actor_identity: impl Into<String>) -> Self {
        Self {
            category,
            actor_identity: actor_identity.into(),
            actor_name: None,
            subject: None,
            name: None,
            email: None,
            address: None,
        }
    }

    pub fn actor_name(mut self, actor_name: impl Into<String>) -> Self {
        self.actor_name = Some(actor_name.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Project the event onto its category's field set, stamped with `at`
    pub fn to_payload(&self, at: SystemTime) -> Value {
        let date = DateTime::<Local>::from(at).format(DATE_FORMAT).to_string();

        let mut body = match &self.category {
            EventCategory::Unrecognized(tag) => {
                return json!({
                    "category": MISSED_CATEGORY,
                    "name": PLACEHOLDER,
                    "email": PLACEHOLDER,
                    "healthcareId": self.actor_identity,
                    "unrecognized_category": tag,
                    "date": date,
                });
            }
            EventCategory::AccountCreated | EventCategory::AccountLogin => fields([
                ("hip_name", &self.name),
                ("hip_email", &self.email),
                ("hip_ipaddress", &self.address),
            ]),
            EventCategory::AccountDeleted | EventCategory::RequestBlocked => {
                fields([("hip_name", &self.name), ("hip_email", &self.email)])
            }
            EventCategory::RecordsCreated | EventCategory::RecordsViewed => {
                fields([("health_id", &self.subject)])
            }
            EventCategory::AppointmentUpdated => fields([
                ("name", &self.name),
                ("email", &self.email),
                ("health_id", &self.subject),
            ]),
            EventCategory::ProfileCreated | EventCategory::ProfileUpdated => fields([
                ("patient_name", &self.name),
                ("patient_email", &self.email),
                ("health_id", &self.subject),
            ]),
            EventCategory::ProfileViewed => fields([
                ("patient_name", &self.name),
                ("email", &self.email),
                ("health_id", &self.subject),
            ]),
        };

        body.insert("category".into(), Value::from(self.category.tag()));
        body.insert("date".into(), Value::from(date));
        body.insert("healthcare_id".into(), Value::from(self.actor_identity.as_str()));
        body.insert("healthcare_name".into(), Value::from(self.actor_name.clone()));
        Value::Object(body)
    }
}

fn fields<const N: usize>(pairs: [(&str, &Option<String>); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), Value::from(value.clone())))
        .collect()
}
