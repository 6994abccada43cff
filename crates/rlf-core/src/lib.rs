//! Core domain model for RLF: lead sources, fetch targets, lead drafts and
//! validated lead records, plus the pure normalization helpers every source
//! shares.

pub mod contact;
pub mod geo;
pub mod score;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::contact::{is_valid_email, is_valid_phone, ContactInfo};

pub const CRATE_NAME: &str = "rlf-core";

/// Addresses shorter than this (after trimming) are not usable leads.
pub const MIN_ADDRESS_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadSource {
    Zillow,
    Redfin,
    Cad,
    Permit,
    Storm,
}

impl LeadSource {
    pub const ALL: [LeadSource; 5] = [
        LeadSource::Zillow,
        LeadSource::Redfin,
        LeadSource::Cad,
        LeadSource::Permit,
        LeadSource::Storm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadSource::Zillow => "zillow",
            LeadSource::Redfin => "redfin",
            LeadSource::Cad => "cad",
            LeadSource::Permit => "permit",
            LeadSource::Storm => "storm",
        }
    }

    /// Destination table in the hosted datastore.
    pub fn table_name(&self) -> &'static str {
        match self {
            LeadSource::Zillow => "zillow_leads",
            LeadSource::Redfin => "redfin_leads",
            LeadSource::Cad => "cad_leads",
            LeadSource::Permit => "permit_leads",
            LeadSource::Storm => "storm_events",
        }
    }

    /// Column that carries the numeric price/value for this source's table.
    pub fn value_column(&self) -> &'static str {
        match self {
            LeadSource::Zillow | LeadSource::Redfin => "price",
            LeadSource::Cad => "appraised_value",
            LeadSource::Permit => "permit_value",
            LeadSource::Storm => "damage_estimate",
        }
    }
}

impl fmt::Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown lead source `{0}` (expected zillow, redfin, cad, permit or storm)")]
pub struct UnknownSource(pub String);

impl FromStr for LeadSource {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zillow" => Ok(LeadSource::Zillow),
            "redfin" => Ok(LeadSource::Redfin),
            "cad" => Ok(LeadSource::Cad),
            "permit" | "permits" => Ok(LeadSource::Permit),
            "storm" | "storms" => Ok(LeadSource::Storm),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// One URL to retrieve during a run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTarget {
    pub source: LeadSource,
    pub url: String,
}

impl FetchTarget {
    pub fn new(source: LeadSource, url: impl Into<String>) -> Self {
        Self {
            source,
            url: url.into(),
        }
    }
}

/// A successfully fetched page body, keyed by the target URL it was requested for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub source: LeadSource,
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    /// Convenience constructor for pages that did not come off the network.
    pub fn from_body(source: LeadSource, url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            source,
            final_url: url.clone(),
            url,
            status: 200,
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// Per-source columns carried alongside the shared lead fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDetails {
    Zillow {
        zpid: Option<String>,
        days_on_market: Option<i64>,
        home_status: Option<String>,
    },
    Redfin {
        mls_number: Option<String>,
        days_on_market: Option<i64>,
    },
    Cad {
        account_number: String,
        owner_name: Option<String>,
        homestead_exemption: bool,
        market_value: Option<i64>,
    },
    Permit {
        permit_id: String,
        permit_type: String,
        date_filed: Option<String>,
        contractor_name: Option<String>,
        status: String,
        priority: u8,
    },
    Storm {
        event_id: String,
        event_type: String,
        event_date: Option<String>,
        event_time: Option<String>,
        magnitude: Option<String>,
        hail_size_inches: Option<f64>,
        wind_speed_mph: Option<u32>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        severity: String,
        impact_radius_miles: u32,
        roofing_potential: String,
    },
}

impl SourceDetails {
    pub fn source(&self) -> LeadSource {
        match self {
            SourceDetails::Zillow { .. } => LeadSource::Zillow,
            SourceDetails::Redfin { .. } => LeadSource::Redfin,
            SourceDetails::Cad { .. } => LeadSource::Cad,
            SourceDetails::Permit { .. } => LeadSource::Permit,
            SourceDetails::Storm { .. } => LeadSource::Storm,
        }
    }

    /// Fields that identify one observation from this source across runs.
    fn identity_fields(&self, address_key: &str, value: Option<i64>) -> Vec<String> {
        let value = value.map(|v| v.to_string()).unwrap_or_default();
        let text = |field: &Option<String>| field.clone().unwrap_or_default();
        match self {
            SourceDetails::Zillow { zpid, .. } => vec![text(zpid), address_key.to_string(), value],
            SourceDetails::Redfin { mls_number, .. } => {
                vec![text(mls_number), address_key.to_string(), value]
            }
            SourceDetails::Cad { account_number, .. } => {
                vec![account_number.clone(), address_key.to_string(), value]
            }
            SourceDetails::Permit {
                permit_id,
                date_filed,
                ..
            } => vec![permit_id.clone(), address_key.to_string(), text(date_filed)],
            SourceDetails::Storm {
                event_id,
                event_date,
                event_type,
                ..
            } => vec![event_id.clone(), text(event_date), event_type.clone()],
        }
    }

    fn write_columns(&self, row: &mut Map<String, JsonValue>) {
        match self {
            SourceDetails::Zillow {
                zpid,
                days_on_market,
                home_status,
            } => {
                put(row, "zpid", zpid.as_deref());
                put(row, "days_on_zillow", *days_on_market);
                put(row, "home_status", home_status.as_deref());
            }
            SourceDetails::Redfin {
                mls_number,
                days_on_market,
            } => {
                put(row, "mls_number", mls_number.as_deref());
                put(row, "days_on_redfin", *days_on_market);
            }
            SourceDetails::Cad {
                account_number,
                owner_name,
                homestead_exemption,
                market_value,
            } => {
                put(row, "account_number", Some(account_number.as_str()));
                put(row, "owner_name", owner_name.as_deref());
                put(row, "homestead_exemption", Some(*homestead_exemption));
                put(row, "market_value", *market_value);
            }
            SourceDetails::Permit {
                permit_id,
                permit_type,
                date_filed,
                contractor_name,
                status,
                priority,
            } => {
                put(row, "permit_id", Some(permit_id.as_str()));
                put(row, "permit_type", Some(permit_type.as_str()));
                put(row, "work_description", Some(permit_type.as_str()));
                put(row, "date_filed", date_filed.as_deref());
                put(row, "contractor_name", contractor_name.as_deref());
                put(row, "status", Some(status.as_str()));
                put(row, "lead_priority", Some(*priority));
            }
            SourceDetails::Storm {
                event_id,
                event_type,
                event_date,
                event_time,
                magnitude,
                hail_size_inches,
                wind_speed_mph,
                latitude,
                longitude,
                severity,
                impact_radius_miles,
                roofing_potential,
            } => {
                put(row, "event_id", Some(event_id.as_str()));
                put(row, "event_type", Some(event_type.as_str()));
                put(row, "event_date", event_date.as_deref());
                put(row, "event_time", event_time.as_deref());
                put(row, "magnitude", magnitude.as_deref());
                put(row, "hail_size_inches", *hail_size_inches);
                put(row, "wind_speed_mph", *wind_speed_mph);
                put(row, "latitude", *latitude);
                put(row, "longitude", *longitude);
                put(row, "severity_level", Some(severity.as_str()));
                put(row, "impact_radius_miles", Some(*impact_radius_miles));
                put(row, "roofing_lead_potential", Some(roofing_potential.as_str()));
            }
        }
    }
}

/// Parser output: one candidate lead before contact extraction and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadDraft {
    pub source: LeadSource,
    pub address_text: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub county: String,
    pub value: Option<i64>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<u32>,
    pub year_built: Option<i32>,
    pub property_type: String,
    pub source_url: String,
    /// Raw text the contact extractor scans (card text, contact JSON fields).
    pub contact_text: String,
    pub details: SourceDetails,
}

impl LeadDraft {
    pub fn new(address_text: impl Into<String>, source_url: impl Into<String>, details: SourceDetails) -> Self {
        Self {
            source: details.source(),
            address_text: address_text.into().trim().to_string(),
            city: String::new(),
            state: String::new(),
            zip_code: String::new(),
            county: String::new(),
            value: None,
            bedrooms: None,
            bathrooms: None,
            square_feet: None,
            year_built: None,
            property_type: String::new(),
            source_url: source_url.into(),
            contact_text: String::new(),
            details,
        }
    }

    pub fn address_key(&self) -> String {
        address_key(&self.address_text, &self.zip_code)
    }

    /// Run-local dedup key. Storm addresses name an area rather than a parcel,
    /// so distinct events at the same place carry their event identity too.
    pub fn dedup_key(&self) -> String {
        let key = self.address_key();
        match &self.details {
            SourceDetails::Storm { .. } => {
                let identity = self.details.identity_fields(&key, self.value).join("_");
                format!("{key}_{identity}")
            }
            _ => key,
        }
    }

    pub fn has_usable_address(&self) -> bool {
        self.address_text.trim().chars().count() >= MIN_ADDRESS_LEN
    }
}

/// Run-local dedup key: lowercased, trimmed address joined to the trimmed zip.
pub fn address_key(address: &str, zip_code: &str) -> String {
    format!("{}_{}", address.trim().to_lowercase(), zip_code.trim())
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("address `{0}` is shorter than {MIN_ADDRESS_LEN} characters")]
    AddressTooShort(String),
    #[error("draft source {draft} does not match detail block for {details}")]
    SourceMismatch {
        draft: LeadSource,
        details: LeadSource,
    },
    #[error("lead score {0} outside 1..=10")]
    ScoreOutOfRange(u8),
    #[error("phone `{0}` is not normalized")]
    InvalidPhone(String),
    #[error("email `{0}` is not a deliverable contact address")]
    InvalidEmail(String),
}

/// Validated lead ready for insertion. Only constructible through [`LeadRecord::from_draft`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadRecord {
    source: LeadSource,
    address_text: String,
    address_key: String,
    city: String,
    state: String,
    zip_code: String,
    county: String,
    value: Option<i64>,
    bedrooms: Option<u32>,
    bathrooms: Option<f64>,
    square_feet: Option<u32>,
    year_built: Option<i32>,
    property_type: String,
    source_url: String,
    phone: Option<String>,
    email: Option<String>,
    lead_score: u8,
    dfw: bool,
    scraped_at: DateTime<Utc>,
    details: SourceDetails,
}

impl LeadRecord {
    pub fn from_draft(
        draft: LeadDraft,
        contact: ContactInfo,
        lead_score: u8,
        scraped_at: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        if !draft.has_usable_address() {
            return Err(RecordError::AddressTooShort(draft.address_text));
        }
        if draft.source != draft.details.source() {
            return Err(RecordError::SourceMismatch {
                draft: draft.source,
                details: draft.details.source(),
            });
        }
        if !(score::MIN_SCORE..=score::MAX_SCORE).contains(&lead_score) {
            return Err(RecordError::ScoreOutOfRange(lead_score));
        }
        if let Some(phone) = contact.phone.as_deref() {
            if !is_valid_phone(phone) {
                return Err(RecordError::InvalidPhone(phone.to_string()));
            }
        }
        if let Some(email) = contact.email.as_deref() {
            if !is_valid_email(email) {
                return Err(RecordError::InvalidEmail(email.to_string()));
            }
        }

        let dfw = geo::is_dfw(&draft.county, &draft.zip_code, &draft.city);
        Ok(Self {
            address_key: draft.address_key(),
            source: draft.source,
            address_text: draft.address_text,
            city: draft.city,
            state: draft.state,
            zip_code: draft.zip_code,
            county: draft.county,
            value: draft.value,
            bedrooms: draft.bedrooms,
            bathrooms: draft.bathrooms,
            square_feet: draft.square_feet,
            year_built: draft.year_built,
            property_type: draft.property_type,
            source_url: draft.source_url,
            phone: contact.phone,
            email: contact.email,
            lead_score,
            dfw,
            scraped_at,
            details: draft.details,
        })
    }

    pub fn source(&self) -> LeadSource {
        self.source
    }

    pub fn table_name(&self) -> &'static str {
        self.source.table_name()
    }

    pub fn address_text(&self) -> &str {
        &self.address_text
    }

    pub fn address_key(&self) -> &str {
        &self.address_key
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn zip_code(&self) -> &str {
        &self.zip_code
    }

    pub fn county(&self) -> &str {
        &self.county
    }

    pub fn value(&self) -> Option<i64> {
        self.value
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn lead_score(&self) -> u8 {
        self.lead_score
    }

    pub fn is_dfw(&self) -> bool {
        self.dfw
    }

    pub fn details(&self) -> &SourceDetails {
        &self.details
    }

    /// SHA-256 over the source's identifying fields; stable across runs so a
    /// unique constraint on `lead_hash` can reject cross-run repeats.
    pub fn lead_hash(&self) -> String {
        let material = std::iter::once(self.source.as_str().to_string())
            .chain(self.details.identity_fields(&self.address_key, self.value))
            .collect::<Vec<_>>()
            .join("|");
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Wire row for the insert boundary. Absent and empty values are omitted.
    pub fn to_row(&self) -> Map<String, JsonValue> {
        let mut row = Map::new();
        put(&mut row, "source", Some(self.source.as_str()));
        put(&mut row, "source_url", Some(self.source_url.as_str()));
        put(&mut row, "scraped_at", Some(self.scraped_at.to_rfc3339()));
        put(&mut row, "dfw", Some(self.dfw));
        put(&mut row, "lead_score", Some(self.lead_score));
        put(&mut row, "lead_hash", Some(self.lead_hash()));
        put(&mut row, "address_text", Some(self.address_text.as_str()));
        put(&mut row, "address_key", Some(self.address_key.as_str()));
        put(&mut row, "city", Some(self.city.as_str()));
        put(&mut row, "state", Some(self.state.as_str()));
        put(&mut row, "zip_code", Some(self.zip_code.as_str()));
        put(&mut row, "county", Some(self.county.as_str()));
        put(&mut row, self.source.value_column(), self.value);
        put(&mut row, "num_bedrooms", self.bedrooms);
        put(&mut row, "num_bathrooms", self.bathrooms);
        put(&mut row, "square_feet", self.square_feet);
        put(&mut row, "year_built", self.year_built);
        put(&mut row, "property_type", Some(self.property_type.as_str()));
        put(&mut row, "phone", self.phone.as_deref());
        put(&mut row, "email", self.email.as_deref());
        self.details.write_columns(&mut row);
        row
    }
}

fn put<T: Into<JsonValue>>(row: &mut Map<String, JsonValue>, key: &str, value: Option<T>) {
    let Some(value) = value else {
        return;
    };
    let value = value.into();
    match &value {
        JsonValue::Null => {}
        JsonValue::String(s) if s.trim().is_empty() => {}
        _ => {
            row.insert(key.to_string(), value);
        }
    }
}
