#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::{validate_opt_coordinate, validate_opt_text, validate_text};
use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const COMPLAINT_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const NOISE_TYPE_MAX_LEN: usize = 64;
pub const DESCRIPTION_MAX_LEN: usize = 4096;
pub const LOCATION_MAX_LEN: usize = 256;
pub const CONTACT_MAX_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = v.into();
        validate_text("user_id", &v, 128)?;
        Ok(Self(v))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for UserId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("user_id", &self.0, 128)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComplaintId(String);

impl ComplaintId {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = v.into();
        validate_text("complaint_id", &v, 64)?;
        Ok(Self(v))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ComplaintId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("complaint_id", &self.0, 64)
    }
}

impl fmt::Display for ComplaintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoiseIntensity {
    Low,
    Medium,
    High,
}

impl NoiseIntensity {
    pub const ALL: [NoiseIntensity; 3] = [
        NoiseIntensity::Low,
        NoiseIntensity::Medium,
        NoiseIntensity::High,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NoiseIntensity::Low => "low",
            NoiseIntensity::Medium => "medium",
            NoiseIntensity::High => "high",
        }
    }
}

impl FromStr for NoiseIntensity {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "low" => Ok(NoiseIntensity::Low),
            "medium" => Ok(NoiseIntensity::Medium),
            "high" => Ok(NoiseIntensity::High),
            _ => Err(ContractViolation::InvalidValue {
                field: "intensity",
                reason: "must be one of low|medium|high",
            }),
        }
    }
}

impl fmt::Display for NoiseIntensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Triage status. Any value may replace any other; there is no forward-only rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplaintStatus {
    Submitted,
    InProgress,
    Resolved,
}

impl ComplaintStatus {
    pub const ALL: [ComplaintStatus; 3] = [
        ComplaintStatus::Submitted,
        ComplaintStatus::InProgress,
        ComplaintStatus::Resolved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComplaintStatus::Submitted => "submitted",
            ComplaintStatus::InProgress => "in-progress",
            ComplaintStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for ComplaintStatus {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "submitted" => Ok(ComplaintStatus::Submitted),
            "in-progress" => Ok(ComplaintStatus::InProgress),
            "resolved" => Ok(ComplaintStatus::Resolved),
            _ => Err(ContractViolation::InvalidValue {
                field: "status",
                reason: "must be one of submitted|in-progress|resolved",
            }),
        }
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComplaintScope {
    OwnedBy(UserId),
    All,
}

impl ComplaintScope {
    pub fn includes(&self, record: &ComplaintRecord) -> bool {
        match self {
            ComplaintScope::OwnedBy(owner) => &record.owner_id == owner,
            ComplaintScope::All => true,
        }
    }
}

/// Submitted fields before the store assigns an id and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplaintInput {
    pub schema_version: SchemaVersion,
    pub owner_id: UserId,
    pub noise_type: String,
    pub description: String,
    pub intensity: NoiseIntensity,
    pub location: String,
    pub contact: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl ComplaintInput {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        owner_id: UserId,
        noise_type: String,
        description: String,
        intensity: NoiseIntensity,
        location: String,
        contact: Option<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<Self, ContractViolation> {
        let input = Self {
            schema_version: COMPLAINT_CONTRACT_VERSION,
            owner_id,
            noise_type,
            description,
            intensity,
            location,
            // A blank contact is the same as no contact.
            contact: contact.filter(|c| !c.trim().is_empty()),
            latitude,
            longitude,
        };
        input.validate()?;
        Ok(input)
    }
}

impl Validate for ComplaintInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != COMPLAINT_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "complaint_input.schema_version",
                reason: "must match COMPLAINT_CONTRACT_VERSION",
            });
        }
        self.owner_id.validate()?;
        validate_text(
            "complaint_input.noise_type",
            &self.noise_type,
            NOISE_TYPE_MAX_LEN,
        )?;
        validate_text(
            "complaint_input.description",
            &self.description,
            DESCRIPTION_MAX_LEN,
        )?;
        validate_text("complaint_input.location", &self.location, LOCATION_MAX_LEN)?;
        validate_opt_text("complaint_input.contact", &self.contact, CONTACT_MAX_LEN)?;
        validate_opt_coordinate("complaint_input.latitude", self.latitude, 90.0)?;
        validate_opt_coordinate("complaint_input.longitude", self.longitude, 180.0)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplaintRecord {
    pub schema_version: SchemaVersion,
    pub complaint_id: ComplaintId,
    pub created_at: MonotonicTimeNs,
    pub owner_id: UserId,
    pub noise_type: String,
    pub description: String,
    pub intensity: NoiseIntensity,
    pub location: String,
    pub contact: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: ComplaintStatus,
}

impl ComplaintRecord {
    pub fn from_input_v1(
        complaint_id: ComplaintId,
        created_at: MonotonicTimeNs,
        input: ComplaintInput,
    ) -> Result<Self, ContractViolation> {
        input.validate()?;
        let r = Self {
            schema_version: COMPLAINT_CONTRACT_VERSION,
            complaint_id,
            created_at,
            owner_id: input.owner_id,
            noise_type: input.noise_type,
            description: input.description,
            intensity: input.intensity,
            location: input.location,
            contact: input.contact,
            latitude: input.latitude,
            longitude: input.longitude,
            status: ComplaintStatus::Submitted,
        };
        r.validate()?;
        Ok(r)
    }

    /// Copy of this record with only `status` replaced.
    pub fn with_status(&self, status: ComplaintStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

impl Validate for ComplaintRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != COMPLAINT_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "complaint_record.schema_version",
                reason: "must match COMPLAINT_CONTRACT_VERSION",
            });
        }
        self.complaint_id.validate()?;
        if self.created_at.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "complaint_record.created_at",
                reason: "must be > 0",
            });
        }
        // Reuse input validation for the descriptive fields.
        ComplaintInput {
            schema_version: self.schema_version,
            owner_id: self.owner_id.clone(),
            noise_type: self.noise_type.clone(),
            description: self.description.clone(),
            intensity: self.intensity,
            location: self.location.clone(),
            contact: self.contact.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
        }
        .validate()
    }
}
