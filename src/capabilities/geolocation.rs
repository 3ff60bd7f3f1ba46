//! Device positioning via the shell.
//!
//! Positioning happens in two steps. First the core asks the shell to probe
//! the environment (`CheckAvailability`) and runs the resulting report
//! through an ordered ladder of preconditions. Only when every rung passes
//! does it issue a `FetchPosition` request. The SOS flow relies on the
//! ladder's failure reason to choose its fallback message.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use url::Url;

/// Fetch profile for background position refreshes. Generous timeout and a
/// wide cache window keep the battery cost down.
pub const PASSIVE_TIMEOUT_MS: u64 = 15_000;
pub const PASSIVE_MAXIMUM_AGE_MS: u64 = 300_000;

/// Fetch profile for SOS dispatch. The alert must go out quickly, with or
/// without coordinates.
pub const EMERGENCY_TIMEOUT_MS: u64 = 10_000;
pub const EMERGENCY_MAXIMUM_AGE_MS: u64 = 60_000;

/// W3C `GeolocationPositionError` codes as reported by web shells.
pub const POSITION_ERROR_PERMISSION_DENIED: u16 = 1;
pub const POSITION_ERROR_POSITION_UNAVAILABLE: u16 = 2;
pub const POSITION_ERROR_TIMEOUT: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    pub timeout_ms: u64,
    pub maximum_age_ms: u64,
    pub high_accuracy: bool,
}

impl FetchOptions {
    #[must_use]
    pub const fn passive() -> Self {
        Self {
            timeout_ms: PASSIVE_TIMEOUT_MS,
            maximum_age_ms: PASSIVE_MAXIMUM_AGE_MS,
            high_accuracy: true,
        }
    }

    #[must_use]
    pub const fn emergency() -> Self {
        Self {
            timeout_ms: EMERGENCY_TIMEOUT_MS,
            maximum_age_ms: EMERGENCY_MAXIMUM_AGE_MS,
            high_accuracy: true,
        }
    }
}

/// Shell's answer to the permission probe, mirroring the states of the web
/// Permissions API. `Unsupported` means the probe itself is unavailable,
/// which is common on older mobile browsers and is not a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionProbe {
    Granted,
    Prompt,
    Denied,
    Unsupported,
}

/// Snapshot of the positioning environment gathered by the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub secure_context: bool,
    pub origin: String,
    pub geolocation_supported: bool,
    pub permission: PermissionProbe,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeolocationOutput {
    Availability(AvailabilityReport),
    Position(PositionSample),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum GeolocationError {
    #[error("geolocation requires a secure context")]
    InsecureContext,
    #[error("geolocation is not supported on this platform")]
    Unsupported,
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("location request timed out")]
    Timeout,
    #[error("unclassified geolocation failure: {message}")]
    Unknown { message: String },
}

impl GeolocationError {
    /// Classifies a raw W3C position error code.
    #[must_use]
    pub fn from_position_code(code: u16, message: Option<String>) -> Self {
        match code {
            POSITION_ERROR_PERMISSION_DENIED => Self::PermissionDenied,
            POSITION_ERROR_POSITION_UNAVAILABLE => Self::PositionUnavailable,
            POSITION_ERROR_TIMEOUT => Self::Timeout,
            other => Self::Unknown {
                message: message.unwrap_or_else(|| format!("position error code {other}")),
            },
        }
    }

    #[must_use]
    pub const fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied)
    }

    /// Environment errors. No fetch on this platform will ever succeed.
    #[must_use]
    pub const fn is_environmental(&self) -> bool {
        matches!(self, Self::InsecureContext | Self::Unsupported)
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PositionUnavailable | Self::Timeout | Self::Unknown { .. }
        )
    }
}

pub type GeolocationResult = Result<GeolocationOutput, GeolocationError>;

/// Runs the availability report through the precondition ladder.
///
/// Rungs are evaluated strictly in order: secure context, platform support,
/// then the permission probe. The first failing rung wins.
pub fn evaluate_availability(report: &AvailabilityReport) -> Result<(), GeolocationError> {
    check_secure_context(report)?;
    check_platform_support(report)?;
    check_permission_probe(report)
}

fn check_secure_context(report: &AvailabilityReport) -> Result<(), GeolocationError> {
    if report.secure_context {
        return Ok(());
    }

    // Browsers exempt loopback origins from the secure context requirement,
    // and some shells report `secure_context = false` for them anyway.
    match Url::parse(&report.origin) {
        Ok(url) => {
            let https = url.scheme() == "https";
            let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1"));
            if https || loopback {
                Ok(())
            } else {
                Err(GeolocationError::InsecureContext)
            }
        }
        Err(_) => Err(GeolocationError::InsecureContext),
    }
}

fn check_platform_support(report: &AvailabilityReport) -> Result<(), GeolocationError> {
    if report.geolocation_supported {
        Ok(())
    } else {
        Err(GeolocationError::Unsupported)
    }
}

fn check_permission_probe(report: &AvailabilityReport) -> Result<(), GeolocationError> {
    match report.permission {
        PermissionProbe::Denied => Err(GeolocationError::PermissionDenied),
        // `Prompt` proceeds: the fetch itself will raise the prompt. An
        // unsupported probe also proceeds rather than blocking platforms
        // that cannot answer the question.
        PermissionProbe::Granted | PermissionProbe::Prompt | PermissionProbe::Unsupported => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeolocationOperation {
    CheckAvailability,
    FetchPosition { options: FetchOptions },
}

impl Operation for GeolocationOperation {
    type Output = GeolocationResult;
}

pub struct Geolocation<E> {
    context: CapabilityContext<GeolocationOperation, E>,
}

impl<E> Geolocation<E>
where
    E: Send + 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<GeolocationOperation, E>) -> Self {
        Self { context }
    }

    /// Asks the shell to probe the positioning environment.
    pub fn check_availability<F>(&self, make_event: F)
    where
        F: FnOnce(GeolocationResult) -> E + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(GeolocationOperation::CheckAvailability)
                .await;
            context.update_app(make_event(result));
        });
    }

    /// Requests a position fix with the given profile.
    pub fn fetch_position<F>(&self, options: FetchOptions, make_event: F)
    where
        F: FnOnce(GeolocationResult) -> E + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(GeolocationOperation::FetchPosition { options })
                .await;
            context.update_app(make_event(result));
        });
    }
}

impl<E> Capability<E> for Geolocation<E> {
    type Operation = GeolocationOperation;
    type MappedSelf<MappedEv> = Geolocation<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> E + Send + Sync + 'static,
        E: 'static,
        NewEv: 'static + Send,
    {
        Geolocation::new(self.context.map_event(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(
        secure: bool,
        origin: &str,
        supported: bool,
        permission: PermissionProbe,
    ) -> AvailabilityReport {
        AvailabilityReport {
            secure_context: secure,
            origin: origin.into(),
            geolocation_supported: supported,
            permission,
        }
    }

    #[test]
    fn test_fully_available_environment_passes() {
        let r = report(true, "https://amani.example", true, PermissionProbe::Granted);
        assert_eq!(evaluate_availability(&r), Ok(()));
    }

    #[test]
    fn test_prompt_state_proceeds_to_fetch() {
        let r = report(true, "https://amani.example", true, PermissionProbe::Prompt);
        assert_eq!(evaluate_availability(&r), Ok(()));
    }

    #[test]
    fn test_unsupported_probe_is_not_a_denial() {
        let r = report(
            true,
            "https://amani.example",
            true,
            PermissionProbe::Unsupported,
        );
        assert_eq!(evaluate_availability(&r), Ok(()));
    }

    #[test]
    fn test_denied_probe_fails_the_ladder() {
        let r = report(true, "https://amani.example", true, PermissionProbe::Denied);
        assert_eq!(
            evaluate_availability(&r),
            Err(GeolocationError::PermissionDenied)
        );
    }

    #[test]
    fn test_insecure_http_origin_fails_first() {
        // Everything else is broken too, but the ladder reports the most
        // fundamental rung.
        let r = report(
            false,
            "http://amani.example",
            false,
            PermissionProbe::Denied,
        );
        assert_eq!(
            evaluate_availability(&r),
            Err(GeolocationError::InsecureContext)
        );
    }

    #[test]
    fn test_unsupported_platform_reported_before_permission() {
        let r = report(true, "https://amani.example", false, PermissionProbe::Denied);
        assert_eq!(evaluate_availability(&r), Err(GeolocationError::Unsupported));
    }

    #[test]
    fn test_localhost_exempt_from_secure_context() {
        let r = report(
            false,
            "http://localhost:9002",
            true,
            PermissionProbe::Granted,
        );
        assert_eq!(evaluate_availability(&r), Ok(()));
    }

    #[test]
    fn test_loopback_ip_exempt_from_secure_context() {
        let r = report(
            false,
            "http://127.0.0.1:9002",
            true,
            PermissionProbe::Granted,
        );
        assert_eq!(evaluate_availability(&r), Ok(()));
    }

    #[test]
    fn test_https_origin_trusted_despite_flag() {
        let r = report(
            false,
            "https://amani.example",
            true,
            PermissionProbe::Granted,
        );
        assert_eq!(evaluate_availability(&r), Ok(()));
    }

    #[test]
    fn test_garbage_origin_treated_as_insecure() {
        let r = report(false, "not an origin", true, PermissionProbe::Granted);
        assert_eq!(
            evaluate_availability(&r),
            Err(GeolocationError::InsecureContext)
        );
    }

    #[test]
    fn test_position_code_classification() {
        assert_eq!(
            GeolocationError::from_position_code(1, None),
            GeolocationError::PermissionDenied
        );
        assert_eq!(
            GeolocationError::from_position_code(2, None),
            GeolocationError::PositionUnavailable
        );
        assert_eq!(
            GeolocationError::from_position_code(3, None),
            GeolocationError::Timeout
        );
        assert_eq!(
            GeolocationError::from_position_code(7, Some("weird".into())),
            GeolocationError::Unknown {
                message: "weird".into()
            }
        );
        assert_eq!(
            GeolocationError::from_position_code(7, None),
            GeolocationError::Unknown {
                message: "position error code 7".into()
            }
        );
    }

    #[test]
    fn test_fetch_profiles() {
        let passive = FetchOptions::passive();
        assert_eq!(passive.timeout_ms, 15_000);
        assert_eq!(passive.maximum_age_ms, 300_000);
        assert!(passive.high_accuracy);

        let emergency = FetchOptions::emergency();
        assert_eq!(emergency.timeout_ms, 10_000);
        assert_eq!(emergency.maximum_age_ms, 60_000);
        assert!(emergency.high_accuracy);
    }

    #[test]
    fn test_error_predicates() {
        assert!(GeolocationError::PermissionDenied.is_permission_error());
        assert!(!GeolocationError::Timeout.is_permission_error());

        assert!(GeolocationError::InsecureContext.is_environmental());
        assert!(GeolocationError::Unsupported.is_environmental());
        assert!(!GeolocationError::PermissionDenied.is_environmental());

        assert!(GeolocationError::Timeout.is_retryable());
        assert!(GeolocationError::PositionUnavailable.is_retryable());
        assert!(!GeolocationError::PermissionDenied.is_retryable());
        assert!(!GeolocationError::InsecureContext.is_retryable());
    }
}
