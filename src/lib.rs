#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod safe_places;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::capabilities::{GeolocationError, StorageError};
use crate::safe_places::{SafePlace, SafePlaceKind};

pub use app::App;
pub use capabilities::{Capabilities, Effect};

// ============================================================================
// Constants
// ============================================================================

pub const APP_NAME: &str = "Amani";

/// Key under which the whole application state document is stored.
pub const STORE_KEY: &str = "amani_app_state";

/// Version stamp written into every state document. Documents with another
/// version are discarded rather than migrated.
pub const STORE_SCHEMA_VERSION: u32 = 1;

pub const PIN_LENGTH: usize = 4;

pub const MAX_EMERGENCY_CONTACTS: usize = 5;

pub const DEFAULT_SOS_MESSAGE: &str =
    "I'm in danger and need help urgently. This is my current location.";

pub const MAPS_QUERY_BASE: &str = "https://maps.google.com/?q=";

/// Fallback map center when no fix is available: Nairobi CBD.
pub const DEFAULT_MAP_CENTER: LatLon = LatLon {
    lat: -1.292_066,
    lon: 36.821_945,
};

pub const DEFAULT_MAP_ZOOM: f64 = 12.0;
pub const FOCUSED_MAP_ZOOM: f64 = 14.0;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub const DIARY_PREVIEW_LENGTH: usize = 80;

/// Ranges the disguise screen samples its fake wellness numbers from.
pub const DISGUISE_STEPS_RANGE: (u32, u32) = (2_000, 7_000);
pub const DISGUISE_HEART_RATE_RANGE: (u32, u32) = (60, 90);
pub const DISGUISE_SLEEP_HOURS_RANGE: (f32, f32) = (5.0, 8.0);

// ============================================================================
// Error taxonomy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Storage,
    Serialization,
    Deserialization,
    SchemaMismatch,
    Location,
    LocationPermissionDenied,
    LocationUnsupported,
    InsecureContext,
    Timeout,
    Validation,
    PinIncorrect,
    PinInvalid,
    PinConfirmMismatch,
    NoPinConfigured,
    ContactLimitExceeded,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::Location => "LOCATION_ERROR",
            Self::LocationPermissionDenied => "LOCATION_PERMISSION_DENIED",
            Self::LocationUnsupported => "LOCATION_UNSUPPORTED",
            Self::InsecureContext => "INSECURE_CONTEXT",
            Self::Timeout => "TIMEOUT",
            Self::Validation => "VALIDATION_ERROR",
            Self::PinIncorrect => "PIN_INCORRECT",
            Self::PinInvalid => "PIN_INVALID",
            Self::PinConfirmMismatch => "PIN_CONFIRM_MISMATCH",
            Self::NoPinConfigured => "NO_PIN_CONFIGURED",
            Self::ContactLimitExceeded => "CONTACT_LIMIT_EXCEEDED",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Storage | Self::Location | Self::Timeout => ErrorSeverity::Transient,

            Self::Serialization | Self::InvalidState | Self::Internal => ErrorSeverity::Fatal,

            Self::Deserialization
            | Self::SchemaMismatch
            | Self::LocationPermissionDenied
            | Self::LocationUnsupported
            | Self::InsecureContext
            | Self::Validation
            | Self::PinIncorrect
            | Self::PinInvalid
            | Self::PinConfirmMismatch
            | Self::NoPinConfigured
            | Self::ContactLimitExceeded
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Storage | Self::Location | Self::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Storage => {
                "Unable to save your data on this device. Recent changes may not survive a restart."
                    .into()
            }
            ErrorKind::Serialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::Deserialization | ErrorKind::SchemaMismatch => {
                "Saved data could not be read and has been reset.".into()
            }
            ErrorKind::Location => {
                "Unable to determine your location. Please check your GPS settings.".into()
            }
            ErrorKind::LocationPermissionDenied => {
                "Location access is required. Please enable location permissions in Settings."
                    .into()
            }
            ErrorKind::LocationUnsupported => {
                "Location is not supported on this device.".into()
            }
            ErrorKind::InsecureContext => {
                "Location requires a secure (HTTPS) connection.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::PinIncorrect => "Incorrect PIN. Please try again.".into(),
            ErrorKind::PinInvalid => {
                format!("Your PIN must be exactly {PIN_LENGTH} digits.")
            }
            ErrorKind::PinConfirmMismatch => "The PINs you entered don't match.".into(),
            ErrorKind::NoPinConfigured => "No PIN has been set up yet.".into(),
            ErrorKind::ContactLimitExceeded => {
                format!("You can save up to {MAX_EMERGENCY_CONTACTS} emergency contacts.")
            }
            ErrorKind::InvalidState => {
                "The app is in an invalid state. Please restart the app.".into()
            }
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Error)]
pub enum CoordinateError {
    #[error("latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("coordinate value is not finite")]
    NonFinite,
}

impl From<CoordinateError> for AppError {
    fn from(err: CoordinateError) -> Self {
        Self::new(ErrorKind::Validation, "Received an invalid location. Please try again.")
            .with_internal(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PinError {
    #[error("entered PIN does not match the stored PIN")]
    Incorrect,
    #[error("PIN must be exactly {} digits, got {actual}", PIN_LENGTH)]
    InvalidLength { actual: usize },
    #[error("PIN must contain only digits")]
    NotNumeric,
    #[error("PIN confirmation does not match")]
    ConfirmMismatch,
    #[error("no PIN has been configured")]
    NotConfigured,
}

impl From<PinError> for AppError {
    fn from(err: PinError) -> Self {
        let kind = match err {
            PinError::Incorrect => ErrorKind::PinIncorrect,
            PinError::InvalidLength { .. } | PinError::NotNumeric => ErrorKind::PinInvalid,
            PinError::ConfirmMismatch => ErrorKind::PinConfirmMismatch,
            PinError::NotConfigured => ErrorKind::NoPinConfigured,
        };
        Self::new(kind, err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactError {
    #[error("emergency contact limit of {max} reached")]
    LimitExceeded { max: usize },
    #[error("contact name is required")]
    MissingName,
    #[error("contact phone number is required")]
    MissingPhone,
}

impl From<ContactError> for AppError {
    fn from(err: ContactError) -> Self {
        match err {
            ContactError::LimitExceeded { .. } => {
                Self::new(ErrorKind::ContactLimitExceeded, err.to_string())
            }
            ContactError::MissingName => {
                Self::new(ErrorKind::Validation, "Please enter the contact's name.")
            }
            ContactError::MissingPhone => {
                Self::new(ErrorKind::Validation, "Please enter the contact's phone number.")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiaryError {
    #[error("diary entry title is required")]
    MissingTitle,
    #[error("diary entry content is required")]
    MissingContent,
    #[error("diary entry attachment is required")]
    MissingAttachment,
}

impl From<DiaryError> for AppError {
    fn from(err: DiaryError) -> Self {
        let message = match err {
            DiaryError::MissingTitle => "Please add a title for this entry.",
            DiaryError::MissingContent => "Please write something before saving.",
            DiaryError::MissingAttachment => "Please attach a recording or photo before saving.",
        };
        Self::new(ErrorKind::Validation, message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("failed to serialize state document: {message}")]
    Serialize { message: String },
    #[error("failed to parse state document: {message}")]
    Parse { message: String },
    #[error("state document has schema version {found}, expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },
}

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        let kind = match err {
            PersistenceError::Serialize { .. } => ErrorKind::Serialization,
            PersistenceError::Parse { .. } => ErrorKind::Deserialization,
            PersistenceError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let kind = match &err {
            StorageError::InvalidKey { .. } => ErrorKind::InvalidState,
            _ => ErrorKind::Storage,
        };
        Self::new(kind, "storage operation failed").with_internal(err.to_string())
    }
}

impl From<GeolocationError> for AppError {
    fn from(err: GeolocationError) -> Self {
        let kind = match &err {
            GeolocationError::InsecureContext => ErrorKind::InsecureContext,
            GeolocationError::Unsupported => ErrorKind::LocationUnsupported,
            GeolocationError::PermissionDenied => ErrorKind::LocationPermissionDenied,
            GeolocationError::Timeout => ErrorKind::Timeout,
            GeolocationError::PositionUnavailable | GeolocationError::Unknown { .. } => {
                ErrorKind::Location
            }
        };
        Self::new(kind, err.to_string())
    }
}

// ============================================================================
// Coordinates and formatting helpers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    #[serde(rename = "latitude")]
    pub lat: f64,
    #[serde(rename = "longitude")]
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedCoordinate {
    lat: f64,
    lon: f64,
}

impl ValidatedCoordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    #[must_use]
    pub const fn lat(self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lon(self) -> f64 {
        self.lon
    }

    #[must_use]
    pub fn distance_to(self, other: Self) -> f64 {
        haversine_distance(self, other)
    }
}

impl TryFrom<LatLon> for ValidatedCoordinate {
    type Error = CoordinateError;

    fn try_from(value: LatLon) -> Result<Self, Self::Error> {
        Self::new(value.lat, value.lon)
    }
}

impl From<ValidatedCoordinate> for LatLon {
    fn from(coord: ValidatedCoordinate) -> Self {
        Self {
            lat: coord.lat,
            lon: coord.lon,
        }
    }
}

#[must_use]
pub fn haversine_distance(p1: ValidatedCoordinate, p2: ValidatedCoordinate) -> f64 {
    const EPSILON: f64 = 1e-10;

    if (p1.lat - p2.lat).abs() < EPSILON && (p1.lon - p2.lon).abs() < EPSILON {
        return 0.0;
    }

    let lat1_rad = p1.lat.to_radians();
    let lat2_rad = p2.lat.to_radians();
    let delta_lat = (p2.lat - p1.lat).to_radians();
    let delta_lon = (p2.lon - p1.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    let a = a.clamp(0.0, 1.0);

    let c = 2.0 * a.sqrt().asin();

    let result = EARTH_RADIUS_M * c;

    if result.is_finite() {
        result
    } else {
        f64::MAX
    }
}

#[must_use]
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "Unknown".to_string();
    }

    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else if meters < 10_000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{:.0} km", meters / 1000.0)
    }
}

#[must_use]
pub fn format_time_ago(timestamp_ms: u64, now_ms: u64) -> String {
    if timestamp_ms > now_ms {
        return "Just now".into();
    }

    let diff_secs = now_ms.saturating_sub(timestamp_ms) / 1000;

    if diff_secs < 5 {
        return "Just now".into();
    }
    if diff_secs < 60 {
        return format!("{diff_secs}s ago");
    }

    let diff_mins = diff_secs / 60;
    if diff_mins < 60 {
        return format!("{diff_mins}m ago");
    }

    let diff_hours = diff_mins / 60;
    if diff_hours < 24 {
        return format!("{diff_hours}h ago");
    }

    let diff_days = diff_hours / 24;
    if diff_days < 7 {
        return format!("{diff_days}d ago");
    }
    if diff_days < 30 {
        return format!("{}w ago", diff_days / 7);
    }
    if diff_days < 365 {
        return format!("{}mo ago", diff_days / 30);
    }

    format!("{}y ago", diff_days / 365)
}

/// Renders a step count with thousands separators, e.g. `4521` as `4,521`.
#[must_use]
pub fn format_step_count(steps: u32) -> String {
    let raw = steps.to_string();
    let mut out = String::with_capacity(raw.len() + raw.len() / 3);
    for (i, ch) in raw.chars().enumerate() {
        if i > 0 && (raw.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Truncates `text` to at most `max_chars` characters, appending an ellipsis
/// when anything was cut.
#[must_use]
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Identifiers and time
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(pub String);

impl ContactId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(get_current_time_ms())
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

// ============================================================================
// PIN
// ============================================================================

/// The access PIN. Stored in the state document as entered; the shell is
/// responsible for protecting the backing store. Debug output is redacted
/// and the buffer is wiped on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin(String);

impl Pin {
    pub fn new(raw: &str) -> Result<Self, PinError> {
        let length = raw.chars().count();
        if length != PIN_LENGTH {
            return Err(PinError::InvalidLength { actual: length });
        }
        if !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(PinError::NotNumeric);
        }
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn matches(&self, entered: &str) -> bool {
        self.0 == entered
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin([REDACTED])")
    }
}

impl Drop for Pin {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Validates a PIN being set for the first time: shape first, then the
/// confirmation field.
pub fn validate_new_pin(pin: &str, confirm: &str) -> Result<Pin, PinError> {
    let pin = Pin::new(pin)?;
    if !pin.matches(confirm) {
        return Err(PinError::ConfirmMismatch);
    }
    Ok(pin)
}

/// Validates a PIN change. The current PIN is checked before anything about
/// the new one.
pub fn validate_pin_change(
    stored: Option<&Pin>,
    entered: &str,
    new_pin: &str,
    confirm: &str,
) -> Result<Pin, PinError> {
    let stored = stored.ok_or(PinError::NotConfigured)?;
    if !stored.matches(entered) {
        return Err(PinError::Incorrect);
    }
    validate_new_pin(new_pin, confirm)
}

// ============================================================================
// Domain types
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockState {
    #[default]
    NoPinSet,
    Locked,
    Unlocked,
}

impl UnlockState {
    #[must_use]
    pub const fn is_unlocked(self) -> bool {
        matches!(self, Self::Unlocked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    Set,
    Enter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    #[default]
    Disguise,
    Contacts,
    Diary,
    Map,
    Settings,
}

impl Route {
    /// Every screen except the disguise carries data worth hiding.
    #[must_use]
    pub const fn is_protected(self) -> bool {
        !matches!(self, Self::Disguise)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Sw,
}

impl Locale {
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Sw => "sw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub id: ContactId,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiaryEntryKind {
    Text,
    Photo,
    Voice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryEntry {
    pub id: EntryId,
    #[serde(rename = "type")]
    pub kind: DiaryEntryKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    #[serde(rename = "timestamp")]
    pub created_at: UnixTimeMs,
}

/// A position the device reported, after validation. `fetched_at` is `None`
/// for fixes restored from the state document, whose age is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub coordinate: ValidatedCoordinate,
    pub accuracy_m: Option<f64>,
    pub fetched_at: Option<UnixTimeMs>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SosOutcome {
    SentWithLocation,
    SentWithStaleLocation,
    SentWithoutLocation,
}

impl SosOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SentWithLocation => "sent_with_location",
            Self::SentWithStaleLocation => "sent_with_stale_location",
            Self::SentWithoutLocation => "sent_without_location",
        }
    }

    #[must_use]
    pub const fn includes_location(self) -> bool {
        !matches!(self, Self::SentWithoutLocation)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SosPhase {
    #[default]
    Idle,
    CheckingAvailability,
    Locating,
}

impl SosPhase {
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosReport {
    pub outcome: SosOutcome,
    pub message: String,
    pub recipient_count: usize,
    pub sent_at: UnixTimeMs,
}

/// Best location knowledge at the moment an SOS goes out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertLocation {
    /// Fix obtained during this SOS.
    Fresh(ValidatedCoordinate),
    /// The fetch failed but an earlier fix is on hand.
    LastKnown(ValidatedCoordinate),
    /// No fix and nothing remembered.
    Unavailable,
    /// The environment blocked positioning outright.
    Blocked,
}

impl AlertLocation {
    #[must_use]
    pub const fn outcome(&self) -> SosOutcome {
        match self {
            Self::Fresh(_) => SosOutcome::SentWithLocation,
            Self::LastKnown(_) => SosOutcome::SentWithStaleLocation,
            Self::Unavailable | Self::Blocked => SosOutcome::SentWithoutLocation,
        }
    }
}

#[must_use]
pub fn maps_location_link(coordinate: ValidatedCoordinate) -> String {
    format!("{MAPS_QUERY_BASE}{},{}", coordinate.lat(), coordinate.lon())
}

/// Composes the outgoing alert text from the user's template and the
/// location knowledge. The template always leads.
#[must_use]
pub fn compose_sos_alert(template: &str, location: &AlertLocation) -> String {
    match location {
        AlertLocation::Fresh(coordinate) => {
            format!("{template} My location: {}", maps_location_link(*coordinate))
        }
        AlertLocation::LastKnown(coordinate) => {
            format!(
                "{template} My last known location: {}",
                maps_location_link(*coordinate)
            )
        }
        AlertLocation::Unavailable => {
            format!("{template} Location not available - please call for help immediately!")
        }
        AlertLocation::Blocked => {
            format!(
                "{template} Location not available - EMERGENCY! Please call for help immediately!"
            )
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreHealth {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unavailable,
}

impl StoreHealth {
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded | Self::Unavailable)
    }
}

/// Configuration handed over by the shell at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub maps_api_key: Option<String>,
    pub dev_mode: bool,
}

/// Fake wellness numbers for the disguise screen. Resampled on every visit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisguiseStats {
    pub steps: u32,
    pub heart_rate_bpm: u32,
    pub sleep_hours: f32,
}

impl DisguiseStats {
    #[must_use]
    pub fn sample() -> Self {
        use rand::{thread_rng, Rng};

        let mut rng = thread_rng();
        let sleep_raw: f32 = rng.gen_range(DISGUISE_SLEEP_HOURS_RANGE.0..DISGUISE_SLEEP_HOURS_RANGE.1);
        Self {
            steps: rng.gen_range(DISGUISE_STEPS_RANGE.0..DISGUISE_STEPS_RANGE.1),
            heart_rate_bpm: rng.gen_range(DISGUISE_HEART_RATE_RANGE.0..DISGUISE_HEART_RATE_RANGE.1),
            sleep_hours: (sleep_raw * 10.0).round() / 10.0,
        }
    }
}

impl Default for DisguiseStats {
    fn default() -> Self {
        Self {
            steps: 4_200,
            heart_rate_bpm: 72,
            sleep_hours: 6.5,
        }
    }
}

// ============================================================================
// Persisted state document
// ============================================================================

/// The single JSON document written to storage. Transient state (gate, route,
/// toasts, in-flight requests, locale) never appears here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub schema_version: u32,
    pub pin: Option<Pin>,
    pub is_pin_set: bool,
    pub is_unlocked: bool,
    pub sos_message: String,
    pub contacts: Vec<EmergencyContact>,
    pub diary_entries: Vec<DiaryEntry>,
    #[serde(default)]
    pub current_location: Option<LatLon>,
}

impl PersistedState {
    pub fn from_json(input: &str) -> Result<Self, PersistenceError> {
        let doc: Self = serde_json::from_str(input).map_err(|e| PersistenceError::Parse {
            message: e.to_string(),
        })?;
        if doc.schema_version != STORE_SCHEMA_VERSION {
            return Err(PersistenceError::SchemaMismatch {
                found: doc.schema_version,
                expected: STORE_SCHEMA_VERSION,
            });
        }
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        serde_json::to_string(self).map_err(|e| PersistenceError::Serialize {
            message: e.to_string(),
        })
    }
}

// ============================================================================
// Model
// ============================================================================

pub struct Model {
    pub config: AppConfig,
    pub pin: Option<Pin>,
    pub unlock: UnlockState,
    pub sos_message: String,
    pub contacts: Vec<EmergencyContact>,
    pub diary_entries: Vec<DiaryEntry>,
    pub locale: Locale,
    pub route: Route,
    pub gate: Option<GateMode>,
    pub gate_error: Option<AppError>,
    pub current_location: Option<PositionFix>,
    pub location_permission: PermissionState,
    pub request_seq: u64,
    pub passive_request: Option<u64>,
    pub sos_request: Option<u64>,
    pub sos_phase: SosPhase,
    pub last_sos: Option<SosReport>,
    pub store_health: StoreHealth,
    pub hydrated: bool,
    pub safe_places: Vec<SafePlace>,
    pub disguise_stats: DisguiseStats,
    pub active_error: Option<AppError>,
    pub active_toast: Option<ToastMessage>,
    pub view_timestamp_ms: u64,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            pin: None,
            unlock: UnlockState::NoPinSet,
            sos_message: DEFAULT_SOS_MESSAGE.to_string(),
            contacts: Vec::new(),
            diary_entries: Vec::new(),
            locale: Locale::default(),
            route: Route::Disguise,
            gate: None,
            gate_error: None,
            current_location: None,
            location_permission: PermissionState::Unknown,
            request_seq: 0,
            passive_request: None,
            sos_request: None,
            sos_phase: SosPhase::Idle,
            last_sos: None,
            store_health: StoreHealth::Unknown,
            hydrated: false,
            safe_places: safe_places::default_catalog(),
            disguise_stats: DisguiseStats::default(),
            active_error: None,
            active_toast: None,
            view_timestamp_ms: get_current_time_ms(),
        }
    }
}

impl Model {
    pub fn update_timestamp(&mut self) {
        self.view_timestamp_ms = get_current_time_ms();
    }

    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    pub fn show_toast(&mut self, message: impl Into<String>, kind: ToastKind) {
        self.active_toast = Some(ToastMessage::new(message, kind));
    }

    pub fn clear_toast(&mut self) {
        self.active_toast = None;
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.unlock.is_unlocked()
    }

    #[must_use]
    pub fn can_add_contact(&self) -> bool {
        self.contacts.len() < MAX_EMERGENCY_CONTACTS
    }

    fn next_request_id(&mut self) -> u64 {
        self.request_seq += 1;
        self.request_seq
    }

    pub fn try_add_contact(&mut self, name: &str, phone: &str) -> Result<ContactId, ContactError> {
        validate_contact_fields(name, phone)?;
        if self.contacts.len() >= MAX_EMERGENCY_CONTACTS {
            return Err(ContactError::LimitExceeded {
                max: MAX_EMERGENCY_CONTACTS,
            });
        }
        let id = ContactId::generate();
        self.contacts.push(EmergencyContact {
            id: id.clone(),
            name: name.trim().to_string(),
            phone: phone.trim().to_string(),
        });
        Ok(id)
    }

    /// Updates an existing contact. Returns `Ok(false)` when no contact has
    /// the given id, which callers treat as a quiet no-op.
    pub fn try_update_contact(
        &mut self,
        id: &ContactId,
        name: &str,
        phone: &str,
    ) -> Result<bool, ContactError> {
        validate_contact_fields(name, phone)?;
        match self.contacts.iter_mut().find(|c| &c.id == id) {
            Some(contact) => {
                contact.name = name.trim().to_string();
                contact.phone = phone.trim().to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove_contact(&mut self, id: &ContactId) -> bool {
        let before = self.contacts.len();
        self.contacts.retain(|c| &c.id != id);
        self.contacts.len() < before
    }

    pub fn try_add_diary_entry(
        &mut self,
        kind: DiaryEntryKind,
        title: &str,
        content: Option<&str>,
        data_url: Option<&str>,
    ) -> Result<EntryId, DiaryError> {
        if title.trim().is_empty() {
            return Err(DiaryError::MissingTitle);
        }

        let entry = match kind {
            DiaryEntryKind::Text => {
                let text = content
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or(DiaryError::MissingContent)?;
                DiaryEntry {
                    id: EntryId::generate(),
                    kind,
                    title: title.trim().to_string(),
                    content: Some(text.to_string()),
                    data_url: None,
                    created_at: UnixTimeMs::now(),
                }
            }
            DiaryEntryKind::Photo | DiaryEntryKind::Voice => {
                let attachment = data_url
                    .filter(|d| !d.is_empty())
                    .ok_or(DiaryError::MissingAttachment)?;
                DiaryEntry {
                    id: EntryId::generate(),
                    kind,
                    title: title.trim().to_string(),
                    content: None,
                    data_url: Some(attachment.to_string()),
                    created_at: UnixTimeMs::now(),
                }
            }
        };

        let id = entry.id.clone();
        // Newest first.
        self.diary_entries.insert(0, entry);
        Ok(id)
    }

    pub fn remove_diary_entry(&mut self, id: &EntryId) -> bool {
        let before = self.diary_entries.len();
        self.diary_entries.retain(|e| &e.id != id);
        self.diary_entries.len() < before
    }

    #[must_use]
    pub fn sos_recipients(&self) -> Vec<String> {
        self.contacts.iter().map(|c| c.phone.clone()).collect()
    }

    #[must_use]
    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            schema_version: STORE_SCHEMA_VERSION,
            pin: self.pin.clone(),
            is_pin_set: self.pin.is_some(),
            is_unlocked: self.unlock.is_unlocked(),
            sos_message: self.sos_message.clone(),
            contacts: self.contacts.clone(),
            diary_entries: self.diary_entries.clone(),
            current_location: self
                .current_location
                .as_ref()
                .map(|fix| LatLon::from(fix.coordinate)),
        }
    }

    /// Replaces the durable portion of the model with a restored document,
    /// sanitizing anything inconsistent instead of failing.
    pub fn apply_persisted(&mut self, doc: PersistedState) {
        let PersistedState {
            pin,
            is_pin_set,
            is_unlocked,
            sos_message,
            mut contacts,
            diary_entries,
            current_location,
            ..
        } = doc;

        if is_pin_set && pin.is_none() {
            warn!("state document claims a PIN is set but carries none, treating as no PIN");
        }
        self.pin = pin;
        self.unlock = match (&self.pin, is_unlocked) {
            (None, _) => UnlockState::NoPinSet,
            (Some(_), true) => UnlockState::Unlocked,
            (Some(_), false) => UnlockState::Locked,
        };

        if contacts.len() > MAX_EMERGENCY_CONTACTS {
            warn!(stored = contacts.len(), "truncating stored contacts to the limit");
            contacts.truncate(MAX_EMERGENCY_CONTACTS);
        }
        self.contacts = contacts;
        self.diary_entries = diary_entries;
        self.sos_message = sos_message;
        self.current_location = current_location
            .and_then(|raw| ValidatedCoordinate::try_from(raw).ok())
            .map(|coordinate| PositionFix {
                coordinate,
                accuracy_m: None,
                fetched_at: None,
            });
    }
}

fn validate_contact_fields(name: &str, phone: &str) -> Result<(), ContactError> {
    if name.trim().is_empty() {
        return Err(ContactError::MissingName);
    }
    if phone.trim().is_empty() {
        return Err(ContactError::MissingPhone);
    }
    Ok(())
}

// ============================================================================
// Permission state and toasts
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    #[default]
    Unknown,
    Requesting,
    Granted,
    Denied,
    Restricted,
}

impl PermissionState {
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }

    #[must_use]
    pub const fn is_denied(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }

    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl ToastKind {
    #[must_use]
    pub const fn default_duration_ms(self) -> u64 {
        match self {
            Self::Info => 3_000,
            Self::Success => 2_000,
            Self::Warning => 4_000,
            Self::Error => 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToastMessage {
    pub message: String,
    pub kind: ToastKind,
    pub created_at_ms: u64,
    pub duration_ms: u64,
}

impl ToastMessage {
    #[must_use]
    pub fn new(message: impl Into<String>, kind: ToastKind) -> Self {
        Self {
            message: message.into(),
            kind,
            created_at_ms: get_current_time_ms(),
            duration_ms: kind.default_duration_ms(),
        }
    }

    #[must_use]
    pub const fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > self.duration_ms
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone)]
pub enum Event {
    Noop,

    // Lifecycle
    Started { config: AppConfig },
    RestoreRequested,
    RestoreCompleted { result: Box<capabilities::StorageResult> },
    PersistCompleted { result: Box<capabilities::StorageResult> },

    // PIN gate
    GateOpened { mode: GateMode },
    GateClosed,
    PinSetSubmitted { pin: String, confirm: String },
    UnlockSubmitted { pin: String },
    LockRequested,
    PinChangeSubmitted { current: String, new_pin: String, confirm: String },

    // Emergency contacts
    ContactAddRequested { name: String, phone: String },
    ContactUpdateRequested { id: ContactId, name: String, phone: String },
    ContactDeleteRequested { id: ContactId },

    // Diary
    DiaryEntryAddRequested {
        kind: DiaryEntryKind,
        title: String,
        content: Option<String>,
        data_url: Option<String>,
    },
    DiaryEntryDeleteRequested { id: EntryId },

    // Settings
    SosMessageChanged { message: String },
    LocaleChanged { locale: Locale },

    // Navigation and disguise
    RouteRequested { route: Route },
    DisguiseStatsRefreshed,

    // Passive location
    LocationRefreshRequested,
    LocationAvailabilityChecked { result: Box<capabilities::GeolocationResult> },
    LocationFixReceived { request_id: u64, result: Box<capabilities::GeolocationResult> },

    // SOS
    SosTriggered,
    SosAvailabilityChecked { result: Box<capabilities::GeolocationResult> },
    SosFixReceived { request_id: u64, result: Box<capabilities::GeolocationResult> },

    // Safe places
    SafePlacesLoaded { geojson: String },

    // Notices
    ToastDismissed,
    ErrorDismissed,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Started { .. } => "started",
            Self::RestoreRequested => "restore_requested",
            Self::RestoreCompleted { .. } => "restore_completed",
            Self::PersistCompleted { .. } => "persist_completed",
            Self::GateOpened { .. } => "gate_opened",
            Self::GateClosed => "gate_closed",
            Self::PinSetSubmitted { .. } => "pin_set_submitted",
            Self::UnlockSubmitted { .. } => "unlock_submitted",
            Self::LockRequested => "lock_requested",
            Self::PinChangeSubmitted { .. } => "pin_change_submitted",
            Self::ContactAddRequested { .. } => "contact_add_requested",
            Self::ContactUpdateRequested { .. } => "contact_update_requested",
            Self::ContactDeleteRequested { .. } => "contact_delete_requested",
            Self::DiaryEntryAddRequested { .. } => "diary_entry_add_requested",
            Self::DiaryEntryDeleteRequested { .. } => "diary_entry_delete_requested",
            Self::SosMessageChanged { .. } => "sos_message_changed",
            Self::LocaleChanged { .. } => "locale_changed",
            Self::RouteRequested { .. } => "route_requested",
            Self::DisguiseStatsRefreshed => "disguise_stats_refreshed",
            Self::LocationRefreshRequested => "location_refresh_requested",
            Self::LocationAvailabilityChecked { .. } => "location_availability_checked",
            Self::LocationFixReceived { .. } => "location_fix_received",
            Self::SosTriggered => "sos_triggered",
            Self::SosAvailabilityChecked { .. } => "sos_availability_checked",
            Self::SosFixReceived { .. } => "sos_fix_received",
            Self::SafePlacesLoaded { .. } => "safe_places_loaded",
            Self::ToastDismissed => "toast_dismissed",
            Self::ErrorDismissed => "error_dismissed",
        }
    }

    /// Whether this event originates from a direct user action, as opposed
    /// to a capability completing or the core chaining work.
    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::GateOpened { .. }
                | Self::GateClosed
                | Self::PinSetSubmitted { .. }
                | Self::UnlockSubmitted { .. }
                | Self::LockRequested
                | Self::PinChangeSubmitted { .. }
                | Self::ContactAddRequested { .. }
                | Self::ContactUpdateRequested { .. }
                | Self::ContactDeleteRequested { .. }
                | Self::DiaryEntryAddRequested { .. }
                | Self::DiaryEntryDeleteRequested { .. }
                | Self::SosMessageChanged { .. }
                | Self::LocaleChanged { .. }
                | Self::RouteRequested { .. }
                | Self::DisguiseStatsRefreshed
                | Self::LocationRefreshRequested
                | Self::SosTriggered
                | Self::ToastDismissed
                | Self::ErrorDismissed
        )
    }
}

// ============================================================================
// View model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFacingError {
    pub message: String,
    pub code: String,
    pub is_retryable: bool,
}

impl From<&AppError> for UserFacingError {
    fn from(error: &AppError) -> Self {
        Self {
            message: error.user_facing_message(),
            code: error.code().to_string(),
            is_retryable: error.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToastView {
    pub message: String,
    pub kind: ToastKind,
    pub duration_ms: u64,
}

impl From<&ToastMessage> for ToastView {
    fn from(toast: &ToastMessage) -> Self {
        Self {
            message: toast.message.clone(),
            kind: toast.kind,
            duration_ms: toast.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactView {
    pub id: String,
    pub name: String,
    pub phone: String,
}

impl From<&EmergencyContact> for ContactView {
    fn from(contact: &EmergencyContact) -> Self {
        Self {
            id: contact.id.as_str().to_string(),
            name: contact.name.clone(),
            phone: contact.phone.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryEntryView {
    pub id: String,
    pub kind: DiaryEntryKind,
    pub title: String,
    pub preview: Option<String>,
    pub has_attachment: bool,
    pub created_label: String,
}

impl DiaryEntryView {
    fn build(entry: &DiaryEntry, now_ms: u64) -> Self {
        Self {
            id: entry.id.as_str().to_string(),
            kind: entry.kind,
            title: entry.title.clone(),
            preview: entry
                .content
                .as_deref()
                .map(|text| truncate_preview(text, DIARY_PREVIEW_LENGTH)),
            has_attachment: entry.data_url.is_some(),
            created_label: format_time_ago(entry.created_at.as_u64(), now_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafePlaceView {
    pub id: String,
    pub name: String,
    pub kind: SafePlaceKind,
    pub kind_label: String,
    pub lat: f64,
    pub lon: f64,
    pub distance_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationView {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: Option<f64>,
    pub age_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisguiseStatsView {
    pub steps: String,
    pub heart_rate_bpm: String,
    pub sleep_hours: String,
}

impl From<&DisguiseStats> for DisguiseStatsView {
    fn from(stats: &DisguiseStats) -> Self {
        Self {
            steps: format_step_count(stats.steps),
            heart_rate_bpm: format!("{} bpm", stats.heart_rate_bpm),
            sleep_hours: format!("{:.1} h", stats.sleep_hours),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateView {
    pub mode: GateMode,
    pub pin_length: usize,
    pub error: Option<UserFacingError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosView {
    pub outcome: SosOutcome,
    pub message: String,
    pub recipient_count: usize,
    pub sent_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewState {
    Disguise {
        app_name: String,
        stats: DisguiseStatsView,
    },
    Contacts {
        contacts: Vec<ContactView>,
        can_add: bool,
        remaining_slots: usize,
    },
    Diary {
        entries: Vec<DiaryEntryView>,
    },
    Map {
        center_lat: f64,
        center_lon: f64,
        zoom: f64,
        maps_api_key: Option<String>,
        places: Vec<SafePlaceView>,
        user: Option<LocationView>,
    },
    Settings {
        sos_message: String,
        locale: Locale,
        pin_set: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub state: ViewState,
    pub gate: Option<GateView>,
    pub is_unlocked: bool,
    pub is_pin_set: bool,
    pub location: Option<LocationView>,
    pub location_permission: PermissionState,
    pub last_sos: Option<SosView>,
    pub sos_in_flight: bool,
    pub storage_degraded: bool,
    pub locale: Locale,
    pub error: Option<UserFacingError>,
    pub toast: Option<ToastView>,
}

// ============================================================================
// Application
// ============================================================================

pub mod app {
    use super::*;
    use tracing::info;

    use crate::capabilities::{
        evaluate_availability, AlertPayload, AvailabilityReport, FetchOptions, GeolocationOutput,
        GeolocationResult, PermissionProbe, PositionSample, StorageOutput, StoreKey,
    };

    #[derive(Default)]
    pub struct App;

    impl App {
        fn persist_state(model: &Model, caps: &Capabilities) {
            match model.to_persisted().to_json() {
                Ok(document) => {
                    caps.storage().save(StoreKey::app_state(), document, |result| {
                        Event::PersistCompleted {
                            result: Box::new(result),
                        }
                    });
                }
                Err(error) => {
                    warn!(error = %error, "state document could not be serialized");
                    caps.telemetry().error("store_serialize_failed", &error.to_string());
                }
            }
        }

        fn start_passive_fix(model: &mut Model, caps: &Capabilities) {
            let request_id = model.next_request_id();
            model.passive_request = Some(request_id);
            caps.geolocation()
                .fetch_position(FetchOptions::passive(), move |result| {
                    Event::LocationFixReceived {
                        request_id,
                        result: Box::new(result),
                    }
                });
        }

        fn start_sos_fix(model: &mut Model, caps: &Capabilities) {
            let request_id = model.next_request_id();
            model.sos_request = Some(request_id);
            model.sos_phase = SosPhase::Locating;
            caps.geolocation()
                .fetch_position(FetchOptions::emergency(), move |result| {
                    Event::SosFixReceived {
                        request_id,
                        result: Box::new(result),
                    }
                });
        }

        fn availability_of(
            result: GeolocationResult,
        ) -> Result<AvailabilityReport, GeolocationError> {
            match result {
                Ok(GeolocationOutput::Availability(report)) => Ok(report),
                Ok(GeolocationOutput::Position(_)) => Err(GeolocationError::Unknown {
                    message: "expected an availability report".into(),
                }),
                Err(error) => Err(error),
            }
        }

        fn note_permission_from_probe(model: &mut Model, probe: PermissionProbe) {
            model.location_permission = match probe {
                PermissionProbe::Granted => PermissionState::Granted,
                // The fetch itself will raise the prompt.
                PermissionProbe::Prompt | PermissionProbe::Unsupported => {
                    PermissionState::Requesting
                }
                PermissionProbe::Denied => PermissionState::Denied,
            };
        }

        fn note_location_failure(model: &mut Model, caps: &Capabilities, error: &GeolocationError) {
            if error.is_permission_error() {
                model.location_permission = PermissionState::Denied;
            } else if error.is_environmental() {
                model.location_permission = PermissionState::Restricted;
            }
            let app_error = AppError::from(error.clone());
            caps.telemetry().error("location_failed", &app_error.to_string());
            model.set_error(app_error);
        }

        fn record_position(
            model: &mut Model,
            sample: &PositionSample,
        ) -> Result<ValidatedCoordinate, AppError> {
            let coordinate = ValidatedCoordinate::new(sample.lat, sample.lon)?;
            model.current_location = Some(PositionFix {
                coordinate,
                accuracy_m: sample.accuracy_m,
                fetched_at: Some(UnixTimeMs::now()),
            });
            let location_error_active = matches!(
                model.active_error.as_ref().map(|e| e.kind),
                Some(
                    ErrorKind::Location
                        | ErrorKind::LocationPermissionDenied
                        | ErrorKind::LocationUnsupported
                        | ErrorKind::InsecureContext
                        | ErrorKind::Timeout
                )
            );
            if location_error_active {
                model.clear_error();
            }
            Ok(coordinate)
        }

        fn dispatch_sos(model: &mut Model, caps: &Capabilities, location: &AlertLocation) {
            let message = compose_sos_alert(&model.sos_message, location);
            let recipients = model.sos_recipients();
            let outcome = location.outcome();
            let recipient_count = recipients.len();
            let count_label = recipient_count.to_string();

            caps.alert().deliver(AlertPayload {
                message: message.clone(),
                recipients,
            });
            caps.telemetry().event(
                "sos_dispatched",
                &[("outcome", outcome.as_str()), ("recipients", count_label.as_str())],
            );

            model.last_sos = Some(SosReport {
                outcome,
                message,
                recipient_count,
                sent_at: UnixTimeMs::now(),
            });
            model.sos_phase = SosPhase::Idle;
            model.sos_request = None;

            let (toast_text, toast_kind) = match outcome {
                SosOutcome::SentWithLocation => {
                    ("SOS alert sent with your location.", ToastKind::Success)
                }
                SosOutcome::SentWithStaleLocation => (
                    "SOS alert sent with your last known location.",
                    ToastKind::Warning,
                ),
                SosOutcome::SentWithoutLocation => (
                    "SOS alert sent without a location. Call for help if you can.",
                    ToastKind::Error,
                ),
            };
            model.show_toast(toast_text, toast_kind);
        }

        fn dispatch_sos_with_fallback(model: &mut Model, caps: &Capabilities) {
            let location = match model.current_location.as_ref() {
                Some(fix) => AlertLocation::LastKnown(fix.coordinate),
                None => AlertLocation::Unavailable,
            };
            Self::dispatch_sos(model, caps, &location);
        }

        fn safe_place_views(model: &Model) -> Vec<SafePlaceView> {
            match model.current_location.as_ref() {
                Some(fix) => safe_places::nearest_first(&model.safe_places, fix.coordinate)
                    .into_iter()
                    .map(|(place, distance)| Self::place_view(&place, Some(distance)))
                    .collect(),
                None => model
                    .safe_places
                    .iter()
                    .map(|place| Self::place_view(place, None))
                    .collect(),
            }
        }

        fn place_view(place: &SafePlace, distance_m: Option<f64>) -> SafePlaceView {
            SafePlaceView {
                id: place.id.clone(),
                name: place.name.clone(),
                kind: place.kind,
                kind_label: place.kind.label().to_string(),
                lat: place.coordinate.lat(),
                lon: place.coordinate.lon(),
                distance_label: distance_m.map(format_distance),
            }
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Self::Event, model: &mut Self::Model, caps: &Self::Capabilities) {
            model.update_timestamp();
            let event_name = event.name();
            caps.telemetry().counter(&format!("event.{event_name}"), 1);
            if event.is_user_initiated() {
                caps.telemetry().event("user_action", &[("event", event_name)]);
            }

            match event {
                Event::Noop => {}

                Event::Started { config } => {
                    model.config = config;
                    model.disguise_stats = DisguiseStats::sample();
                    caps.telemetry()
                        .event("app_started", &[("locale", model.locale.as_tag())]);
                    self.update(Event::RestoreRequested, model, caps);
                    self.update(Event::LocationRefreshRequested, model, caps);
                    caps.render().render();
                }

                Event::RestoreRequested => {
                    caps.storage().load(StoreKey::app_state(), |result| {
                        Event::RestoreCompleted {
                            result: Box::new(result),
                        }
                    });
                }

                Event::RestoreCompleted { result } => {
                    model.hydrated = true;
                    match *result {
                        Ok(StorageOutput::Loaded { document: None }) => {
                            info!("no stored state found, starting fresh");
                            model.store_health = StoreHealth::Healthy;
                        }
                        Ok(StorageOutput::Loaded {
                            document: Some(raw),
                        }) => match PersistedState::from_json(&raw) {
                            Ok(doc) => {
                                model.apply_persisted(doc);
                                model.store_health = StoreHealth::Healthy;
                                info!(
                                    contacts = model.contacts.len(),
                                    entries = model.diary_entries.len(),
                                    "state restored"
                                );
                            }
                            Err(error) => {
                                let app_error = AppError::from(error);
                                warn!(error = %app_error, "stored state unreadable, continuing with defaults");
                                model.store_health = StoreHealth::Degraded;
                                model.show_toast(
                                    app_error.user_facing_message(),
                                    ToastKind::Warning,
                                );
                                caps.telemetry()
                                    .error("store_restore_failed", &app_error.to_string());
                            }
                        },
                        Ok(StorageOutput::Saved | StorageOutput::Cleared) => {
                            caps.telemetry().error(
                                "store_unexpected_output",
                                "load request resolved with a write acknowledgement",
                            );
                        }
                        Err(error) => {
                            warn!(error = %error, "storage unavailable, running in memory");
                            model.store_health = StoreHealth::Unavailable;
                            caps.telemetry().error("store_unavailable", &error.to_string());
                        }
                    }
                    caps.render().render();
                }

                Event::PersistCompleted { result } => {
                    match *result {
                        Ok(StorageOutput::Saved) => {
                            model.store_health = StoreHealth::Healthy;
                            caps.telemetry().counter("store.persisted", 1);
                        }
                        Ok(StorageOutput::Loaded { .. } | StorageOutput::Cleared) => {
                            caps.telemetry().error(
                                "store_unexpected_output",
                                "save request resolved with a non-save acknowledgement",
                            );
                        }
                        Err(error) => {
                            warn!(error = %error, "failed to persist state");
                            model.store_health = match error {
                                StorageError::Unavailable { .. } => StoreHealth::Unavailable,
                                _ => StoreHealth::Degraded,
                            };
                            caps.telemetry().error("store_persist_failed", &error.to_string());
                        }
                    }
                    caps.render().render();
                }

                Event::GateOpened { mode } => {
                    if model.is_unlocked() {
                        // Nothing to gate.
                    } else if matches!(mode, GateMode::Enter) && model.pin.is_none() {
                        model.gate = None;
                        model.route = Route::Disguise;
                        caps.telemetry().counter("gate.enter_without_pin", 1);
                    } else if matches!(mode, GateMode::Set) && model.pin.is_some() {
                        // A locked session cannot replace the PIN.
                        caps.telemetry().counter("gate.set_rejected_locked", 1);
                    } else {
                        model.gate = Some(mode);
                        model.gate_error = None;
                    }
                    caps.render().render();
                }

                Event::GateClosed => {
                    let abandoned_setup =
                        matches!(model.gate, Some(GateMode::Set)) && model.pin.is_none();
                    model.gate = None;
                    model.gate_error = None;
                    if abandoned_setup {
                        model.route = Route::Disguise;
                    }
                    caps.render().render();
                }

                Event::PinSetSubmitted { pin, confirm } => {
                    if model.pin.is_some() && !model.is_unlocked() {
                        caps.telemetry().counter("gate.set_rejected_locked", 1);
                    } else {
                        match validate_new_pin(&pin, &confirm) {
                            Ok(new_pin) => {
                                model.pin = Some(new_pin);
                                model.unlock = UnlockState::Unlocked;
                                model.gate = None;
                                model.gate_error = None;
                                model.route = Route::Contacts;
                                Self::persist_state(model, caps);
                                caps.telemetry().event("pin_configured", &[]);
                            }
                            Err(error) => {
                                model.gate_error = Some(AppError::from(error));
                                caps.telemetry().counter("gate.set_rejected", 1);
                            }
                        }
                    }
                    caps.render().render();
                }

                Event::UnlockSubmitted { pin } => {
                    match model.pin.as_ref() {
                        None => {
                            // An enter gate without a stored PIN is a stale
                            // shell state. Close it and fall back to cover.
                            model.gate = None;
                            model.gate_error = None;
                            model.route = Route::Disguise;
                            caps.telemetry().counter("gate.enter_without_pin", 1);
                        }
                        Some(stored) if stored.matches(&pin) => {
                            model.unlock = UnlockState::Unlocked;
                            model.gate = None;
                            model.gate_error = None;
                            Self::persist_state(model, caps);
                            caps.telemetry().event("unlocked", &[]);
                        }
                        Some(_) => {
                            model.gate_error = Some(AppError::from(PinError::Incorrect));
                            caps.telemetry().counter("gate.unlock_rejected", 1);
                        }
                    }
                    caps.render().render();
                }

                Event::LockRequested => {
                    model.unlock = if model.pin.is_some() {
                        UnlockState::Locked
                    } else {
                        UnlockState::NoPinSet
                    };
                    model.gate = None;
                    model.gate_error = None;
                    model.route = Route::Disguise;
                    Self::persist_state(model, caps);
                    caps.telemetry().event("locked", &[]);
                    caps.render().render();
                }

                Event::PinChangeSubmitted {
                    current,
                    new_pin,
                    confirm,
                } => {
                    match validate_pin_change(model.pin.as_ref(), &current, &new_pin, &confirm) {
                        Ok(pin) => {
                            model.pin = Some(pin);
                            model.unlock = UnlockState::Unlocked;
                            Self::persist_state(model, caps);
                            model.show_toast("PIN updated.", ToastKind::Success);
                            caps.telemetry().event("pin_changed", &[]);
                        }
                        Err(error) => {
                            let app_error = AppError::from(error);
                            model.show_toast(app_error.user_facing_message(), ToastKind::Error);
                            caps.telemetry().counter("pin_change_rejected", 1);
                        }
                    }
                    caps.render().render();
                }

                Event::ContactAddRequested { name, phone } => {
                    match model.try_add_contact(&name, &phone) {
                        Ok(_) => {
                            Self::persist_state(model, caps);
                            model.show_toast("Contact added.", ToastKind::Success);
                        }
                        Err(error) => {
                            let app_error = AppError::from(error);
                            model.show_toast(app_error.user_facing_message(), ToastKind::Error);
                            caps.telemetry().counter("contact.add_rejected", 1);
                        }
                    }
                    caps.render().render();
                }

                Event::ContactUpdateRequested { id, name, phone } => {
                    match model.try_update_contact(&id, &name, &phone) {
                        Ok(true) => {
                            Self::persist_state(model, caps);
                            model.show_toast("Contact updated.", ToastKind::Success);
                        }
                        Ok(false) => {
                            caps.telemetry().counter("contact.update_missing", 1);
                        }
                        Err(error) => {
                            let app_error = AppError::from(error);
                            model.show_toast(app_error.user_facing_message(), ToastKind::Error);
                            caps.telemetry().counter("contact.update_rejected", 1);
                        }
                    }
                    caps.render().render();
                }

                Event::ContactDeleteRequested { id } => {
                    if model.remove_contact(&id) {
                        Self::persist_state(model, caps);
                        model.show_toast("Contact deleted.", ToastKind::Success);
                    } else {
                        caps.telemetry().counter("contact.delete_missing", 1);
                    }
                    caps.render().render();
                }

                Event::DiaryEntryAddRequested {
                    kind,
                    title,
                    content,
                    data_url,
                } => {
                    match model.try_add_diary_entry(
                        kind,
                        &title,
                        content.as_deref(),
                        data_url.as_deref(),
                    ) {
                        Ok(_) => {
                            Self::persist_state(model, caps);
                            model.show_toast("Entry saved.", ToastKind::Success);
                        }
                        Err(error) => {
                            let app_error = AppError::from(error);
                            model.show_toast(app_error.user_facing_message(), ToastKind::Error);
                            caps.telemetry().counter("diary.add_rejected", 1);
                        }
                    }
                    caps.render().render();
                }

                Event::DiaryEntryDeleteRequested { id } => {
                    if model.remove_diary_entry(&id) {
                        Self::persist_state(model, caps);
                    } else {
                        caps.telemetry().counter("diary.delete_missing", 1);
                    }
                    caps.render().render();
                }

                Event::SosMessageChanged { message } => {
                    model.sos_message = message;
                    Self::persist_state(model, caps);
                    model.show_toast("SOS message saved.", ToastKind::Success);
                    caps.render().render();
                }

                Event::LocaleChanged { locale } => {
                    model.locale = locale;
                    caps.render().render();
                }

                Event::RouteRequested { route } => {
                    if route.is_protected() && !model.is_unlocked() {
                        model.gate = Some(if model.pin.is_some() {
                            GateMode::Enter
                        } else {
                            GateMode::Set
                        });
                        model.gate_error = None;
                        caps.telemetry().counter("route.gated", 1);
                    } else {
                        model.route = route;
                        if matches!(route, Route::Disguise) {
                            model.disguise_stats = DisguiseStats::sample();
                        }
                    }
                    caps.render().render();
                }

                Event::DisguiseStatsRefreshed => {
                    model.disguise_stats = DisguiseStats::sample();
                    caps.render().render();
                }

                Event::LocationRefreshRequested => {
                    caps.geolocation().check_availability(|result| {
                        Event::LocationAvailabilityChecked {
                            result: Box::new(result),
                        }
                    });
                }

                Event::LocationAvailabilityChecked { result } => {
                    let evaluated = Self::availability_of(*result).and_then(|report| {
                        evaluate_availability(&report)?;
                        Ok(report)
                    });
                    match evaluated {
                        Ok(report) => {
                            Self::note_permission_from_probe(model, report.permission);
                            Self::start_passive_fix(model, caps);
                        }
                        Err(error) => Self::note_location_failure(model, caps, &error),
                    }
                    caps.render().render();
                }

                Event::LocationFixReceived { request_id, result } => {
                    if model.passive_request == Some(request_id) {
                        model.passive_request = None;
                        match *result {
                            Ok(GeolocationOutput::Position(sample)) => {
                                match Self::record_position(model, &sample) {
                                    Ok(_) => {
                                        model.location_permission = PermissionState::Granted;
                                        Self::persist_state(model, caps);
                                    }
                                    Err(app_error) => {
                                        caps.telemetry()
                                            .error("location_invalid_fix", &app_error.to_string());
                                        model.set_error(app_error);
                                    }
                                }
                            }
                            Ok(GeolocationOutput::Availability(_)) => {
                                caps.telemetry().error(
                                    "location_unexpected_output",
                                    "availability report delivered to a fix request",
                                );
                            }
                            Err(error) => Self::note_location_failure(model, caps, &error),
                        }
                        caps.render().render();
                    } else {
                        caps.telemetry().counter("location.stale_completion", 1);
                    }
                }

                Event::SosTriggered => {
                    model.sos_phase = SosPhase::CheckingAvailability;
                    caps.telemetry().event("sos_triggered", &[]);
                    caps.geolocation().check_availability(|result| {
                        Event::SosAvailabilityChecked {
                            result: Box::new(result),
                        }
                    });
                    caps.render().render();
                }

                Event::SosAvailabilityChecked { result } => {
                    let evaluated = Self::availability_of(*result).and_then(|report| {
                        evaluate_availability(&report)?;
                        Ok(report)
                    });
                    match evaluated {
                        Ok(report) => {
                            Self::note_permission_from_probe(model, report.permission);
                            Self::start_sos_fix(model, caps);
                        }
                        Err(error) => {
                            // The alert still goes out, with the blocked variant.
                            Self::note_location_failure(model, caps, &error);
                            Self::dispatch_sos(model, caps, &AlertLocation::Blocked);
                        }
                    }
                    caps.render().render();
                }

                Event::SosFixReceived { request_id, result } => {
                    if model.sos_request == Some(request_id) {
                        model.sos_request = None;
                        match *result {
                            Ok(GeolocationOutput::Position(sample)) => {
                                match Self::record_position(model, &sample) {
                                    Ok(coordinate) => {
                                        model.location_permission = PermissionState::Granted;
                                        Self::dispatch_sos(
                                            model,
                                            caps,
                                            &AlertLocation::Fresh(coordinate),
                                        );
                                        Self::persist_state(model, caps);
                                    }
                                    Err(app_error) => {
                                        caps.telemetry()
                                            .error("sos_invalid_fix", &app_error.to_string());
                                        Self::dispatch_sos_with_fallback(model, caps);
                                    }
                                }
                            }
                            Ok(GeolocationOutput::Availability(_)) => {
                                caps.telemetry().error(
                                    "location_unexpected_output",
                                    "availability report delivered to a fix request",
                                );
                                Self::dispatch_sos_with_fallback(model, caps);
                            }
                            Err(error) => {
                                Self::note_location_failure(model, caps, &error);
                                Self::dispatch_sos_with_fallback(model, caps);
                            }
                        }
                        caps.render().render();
                    } else {
                        caps.telemetry().counter("sos.stale_completion", 1);
                    }
                }

                Event::SafePlacesLoaded { geojson } => {
                    match safe_places::from_geojson(&geojson) {
                        Ok(places) if !places.is_empty() => {
                            info!(count = places.len(), "safe place catalog replaced");
                            model.safe_places = places;
                        }
                        Ok(_) => {
                            caps.telemetry().counter("safe_places.empty_catalog", 1);
                        }
                        Err(error) => {
                            warn!(error = %error, "rejecting safe place catalog");
                            caps.telemetry().error("safe_places_rejected", &error.to_string());
                        }
                    }
                    caps.render().render();
                }

                Event::ToastDismissed => {
                    model.clear_toast();
                    caps.render().render();
                }

                Event::ErrorDismissed => {
                    model.clear_error();
                    caps.render().render();
                }
            }
        }

        fn view(&self, model: &Self::Model) -> Self::ViewModel {
            let now_ms = model.view_timestamp_ms;

            let location = model.current_location.as_ref().map(|fix| LocationView {
                lat: fix.coordinate.lat(),
                lon: fix.coordinate.lon(),
                accuracy_m: fix.accuracy_m,
                age_label: fix
                    .fetched_at
                    .map(|at| format_time_ago(at.as_u64(), now_ms)),
            });

            // A locked session gets the disguise no matter what route the
            // shell asked for.
            let effective_route = if model.route.is_protected() && !model.is_unlocked() {
                Route::Disguise
            } else {
                model.route
            };

            let state = match effective_route {
                Route::Disguise => ViewState::Disguise {
                    app_name: APP_NAME.to_string(),
                    stats: DisguiseStatsView::from(&model.disguise_stats),
                },
                Route::Contacts => ViewState::Contacts {
                    contacts: model.contacts.iter().map(ContactView::from).collect(),
                    can_add: model.can_add_contact(),
                    remaining_slots: MAX_EMERGENCY_CONTACTS.saturating_sub(model.contacts.len()),
                },
                Route::Diary => ViewState::Diary {
                    entries: model
                        .diary_entries
                        .iter()
                        .map(|entry| DiaryEntryView::build(entry, now_ms))
                        .collect(),
                },
                Route::Map => {
                    let (center_lat, center_lon, zoom) = match model.current_location.as_ref() {
                        Some(fix) => (fix.coordinate.lat(), fix.coordinate.lon(), FOCUSED_MAP_ZOOM),
                        None => (DEFAULT_MAP_CENTER.lat, DEFAULT_MAP_CENTER.lon, DEFAULT_MAP_ZOOM),
                    };
                    ViewState::Map {
                        center_lat,
                        center_lon,
                        zoom,
                        maps_api_key: model.config.maps_api_key.clone(),
                        places: Self::safe_place_views(model),
                        user: location.clone(),
                    }
                }
                Route::Settings => ViewState::Settings {
                    sos_message: model.sos_message.clone(),
                    locale: model.locale,
                    pin_set: model.pin.is_some(),
                },
            };

            ViewModel {
                state,
                gate: model.gate.map(|mode| GateView {
                    mode,
                    pin_length: PIN_LENGTH,
                    error: model.gate_error.as_ref().map(UserFacingError::from),
                }),
                is_unlocked: model.is_unlocked(),
                is_pin_set: model.pin.is_some(),
                location,
                location_permission: model.location_permission,
                last_sos: model.last_sos.as_ref().map(|report| SosView {
                    outcome: report.outcome,
                    message: report.message.clone(),
                    recipient_count: report.recipient_count,
                    sent_label: format_time_ago(report.sent_at.as_u64(), now_ms),
                }),
                sos_in_flight: !model.sos_phase.is_idle(),
                storage_degraded: model.store_health.is_degraded(),
                locale: model.locale,
                error: model.active_error.as_ref().map(UserFacingError::from),
                toast: model
                    .active_toast
                    .as_ref()
                    .filter(|toast| !toast.is_expired(now_ms))
                    .map(ToastView::from),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
