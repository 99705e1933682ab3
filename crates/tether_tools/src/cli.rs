#![forbid(unsafe_code)]

use tether_engines::http_client::HttpClient;
use tether_kernel_contracts::registration::ActivationKey;
use tether_os::clock::Clock;
use tether_os::health::HealthReportOutcome;
use tether_os::probe::InstallationProbe;
use tether_os::registration::RegistrationOutcome;
use tether_os::triggers::{TetherStateStore, TimerScheduling, TriggerSurface};

pub const USAGE: &str =
    "usage: tether <install|admin-enter|update-check|report|tick|status|deactivate|activate <request_id>>";

/// Runs one trigger and renders a single-line summary. `activation_key` is only read by `activate`.
pub fn execute_command<S, H, P, K>(
    surface: &mut TriggerSurface<S, H, P, K>,
    subcommand: &str,
    request_id: Option<&str>,
    activation_key: Option<&str>,
) -> Result<String, String>
where
    S: TetherStateStore,
    H: HttpClient,
    P: InstallationProbe,
    K: Clock,
{
    match subcommand {
        "install" => {
            let report = surface.on_install();
            let timer = match report.daily_timer {
                TimerScheduling::Created(r) | TimerScheduling::AlreadyScheduled(r) => {
                    format!("daily_timer_next_run_at={}", r.next_run_at)
                }
                TimerScheduling::Failed(err) => format!("daily_timer_error={err}"),
            };
            Ok(format!(
                "{} {timer}",
                describe_registration(surface, &report.registration)
            ))
        }
        "admin-enter" => {
            let outcome = surface.on_admin_context_enter();
            Ok(describe_registration(surface, &outcome))
        }
        "activate" => {
            let request_id = request_id.ok_or_else(|| "usage: tether activate <request_id>".to_string())?;
            let raw = activation_key.ok_or_else(|| "missing activation key input".to_string())?;
            let key = ActivationKey::sanitize(raw)
                .ok_or_else(|| "activation key must not be empty".to_string())?;
            let outcome = surface.on_activation_submitted(Some(request_id), key);
            Ok(describe_registration(surface, &outcome))
        }
        "update-check" => match surface.on_update_check() {
            Some(offer) => Ok(format!(
                "UPDATE_AVAILABLE new_version={} info_url={} download_url={}",
                offer.new_version,
                offer.info_url.as_deref().unwrap_or("-"),
                offer.download_url.as_deref().unwrap_or("-")
            )),
            None => Ok("NO_UPDATE".to_string()),
        },
        "report" => match surface.on_daily_timer() {
            HealthReportOutcome::Delivered { status } => Ok(format!("DELIVERED http_status={status}")),
            HealthReportOutcome::Failed(err) => Err(format!("health report failed: {err}")),
        },
        "tick" => {
            let now = surface.now();
            match surface.run_due_events(now) {
                None => Ok("NOTHING_DUE".to_string()),
                Some(HealthReportOutcome::Delivered { status }) => {
                    Ok(format!("REPORT_DELIVERED http_status={status}"))
                }
                Some(HealthReportOutcome::Failed(err)) => Ok(format!("REPORT_FAILED {err}")),
            }
        }
        "status" => {
            let state = surface
                .registration_state()
                .map_err(|e| format!("failed to read registration state: {e}"))?;
            let timer = surface
                .daily_timer()
                .map(|r| r.next_run_at.to_string())
                .unwrap_or_else(|| "-".to_string());
            Ok(format!(
                "status={} feature_access={} request_id={} daily_timer_next_run_at={timer}",
                state.status,
                if surface.feature_access() { "YES" } else { "NO" },
                state.request_id.as_deref().unwrap_or("-"),
            ))
        }
        "deactivate" => {
            surface
                .on_deactivate()
                .map_err(|e| format!("failed to clear daily timer: {e}"))?;
            Ok("OK".to_string())
        }
        _ => Err(format!("unknown subcommand: {subcommand}. {USAGE}")),
    }
}

fn describe_registration<S, H, P, K>(
    surface: &TriggerSurface<S, H, P, K>,
    outcome: &RegistrationOutcome,
) -> String
where
    S: TetherStateStore,
    H: HttpClient,
    P: InstallationProbe,
    K: Clock,
{
    let status = surface
        .registration_state()
        .map(|s| s.status.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    match outcome {
        RegistrationOutcome::Applied(_) => format!("APPLIED status={status}"),
        RegistrationOutcome::SkippedActivated => format!("SKIPPED_ACTIVATED status={status}"),
        RegistrationOutcome::SkippedThrottled => format!("SKIPPED_THROTTLED status={status}"),
        RegistrationOutcome::Failed(err) => format!("FAILED status={status} reason={err}"),
    }
}
