use serde::{Deserialize, Serialize};

use crate::license::LicenseStatus;

/// Human-readable time left on a license.
///
/// Months and years round up, so 365 days reads as "13 months left".
pub fn describe_days_remaining(days: i64) -> String {
    match days {
        d if d <= 0 => "Expired".to_string(),
        1 => "1 day left".to_string(),
        d if d <= 30 => format!("{} days left", d),
        d if d <= 365 => format!("{} months left", (d + 29) / 30),
        d => format!("{} years left", (d + 364) / 365),
    }
}

/// How urgently a license needs attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTone {
    Expired,
    Warning,
    Attention,
    Healthy,
}

pub fn status_tone(status: Option<LicenseStatus>, days_remaining: i64) -> StatusTone {
    if status == Some(LicenseStatus::Expired) || days_remaining <= 0 {
        StatusTone::Expired
    } else if status == Some(LicenseStatus::Trial) || days_remaining <= 7 {
        StatusTone::Warning
    } else if days_remaining <= 30 {
        StatusTone::Attention
    } else {
        StatusTone::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_days_remaining() {
        assert_eq!(describe_days_remaining(-4), "Expired");
        assert_eq!(describe_days_remaining(0), "Expired");
        assert_eq!(describe_days_remaining(1), "1 day left");
        assert_eq!(describe_days_remaining(2), "2 days left");
        assert_eq!(describe_days_remaining(30), "30 days left");
        assert_eq!(describe_days_remaining(31), "2 months left");
        // ceil(365 / 30), not a year
        assert_eq!(describe_days_remaining(365), "13 months left");
        assert_eq!(describe_days_remaining(366), "2 years left");
    }

    #[test]
    fn test_status_tone() {
        assert_eq!(status_tone(Some(LicenseStatus::Active), 0), StatusTone::Expired);
        assert_eq!(status_tone(Some(LicenseStatus::Expired), 90), StatusTone::Expired);
        assert_eq!(status_tone(Some(LicenseStatus::Trial), 25), StatusTone::Warning);
        assert_eq!(status_tone(Some(LicenseStatus::Active), 5), StatusTone::Warning);
        assert_eq!(status_tone(Some(LicenseStatus::Active), 20), StatusTone::Attention);
        assert_eq!(status_tone(Some(LicenseStatus::Active), 200), StatusTone::Healthy);
        assert_eq!(status_tone(None, 0), StatusTone::Expired);
    }
}
