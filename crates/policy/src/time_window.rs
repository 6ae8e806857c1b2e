//! Permission validity in time: `validFrom`/`expiresAt` bounds plus the
//! optional hour-of-day window in the permission's own timezone.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use prg_domain::error::{ErrorCode, GatewayError};
use prg_domain::permission::{ResourcePermission, TimeWindow};

/// Check `validFrom ≤ now ≤ expiresAt` and the time window, in that order.
pub fn check_permission_validity(
    permission: &ResourcePermission,
    now: DateTime<Utc>,
) -> Result<(), GatewayError> {
    if let Some(valid_from) = permission.valid_from {
        if now < valid_from {
            return Err(GatewayError::new(
                ErrorCode::ErrPermissionDenied,
                format!("permission not valid before {valid_from}"),
            ));
        }
    }
    if let Some(expires_at) = permission.expires_at {
        if now > expires_at {
            return Err(GatewayError::new(
                ErrorCode::ErrPermissionExpired,
                format!("permission expired at {expires_at}"),
            ));
        }
    }
    if let Some(window) = &permission.time_window {
        check_time_window(window, now)?;
    }
    Ok(())
}

fn check_time_window(window: &TimeWindow, now: DateTime<Utc>) -> Result<(), GatewayError> {
    let tz: Tz = window.timezone.parse().map_err(|_| {
        // An unparseable timezone fails closed rather than granting 24/7.
        GatewayError::new(
            ErrorCode::ErrPermissionDenied,
            format!("permission has unknown timezone '{}'", window.timezone),
        )
    })?;
    let local = tz.from_utc_datetime(&now.naive_utc());
    let hour = local.hour() as u8;

    let in_hours = if window.start_hour <= window.end_hour {
        hour >= window.start_hour && hour < window.end_hour
    } else {
        // Overnight wrap, e.g. 22–6.
        hour >= window.start_hour || hour < window.end_hour
    };
    if !in_hours {
        return Err(GatewayError::new(
            ErrorCode::ErrPermissionDenied,
            format!(
                "outside allowed hours {}-{} ({})",
                window.start_hour, window.end_hour, window.timezone
            ),
        ));
    }

    if !window.allowed_days.is_empty() {
        // chrono: Sunday = 0 via num_days_from_sunday.
        let weekday = local.weekday().num_days_from_sunday() as u8;
        if !window.allowed_days.contains(&weekday) {
            return Err(GatewayError::new(
                ErrorCode::ErrPermissionDenied,
                "outside allowed weekdays",
            ));
        }
    }

    Ok(())
}
