//! Controller-output throttler. Polls the output slot at ~100 Hz, sends
//! to the active driver only on change (with a periodic forced refresh so
//! a host LED driver cannot keep preempting our state), and folds in the
//! lightbar override from the external IPC file.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::config::Config;
use crate::drivers::DriverSlot;
use crate::session::{PowerHandle, PowerState};
use crate::state::{Capability, OutputSnapshot, Shared};

/// Throttler tick (~100 Hz).
const TICK: Duration = Duration::from_millis(10);
/// Forced refresh interval.
const REFRESH: Duration = Duration::from_millis(100);
/// IPC file re-read interval.
const IPC_INTERVAL: Duration = Duration::from_millis(500);

/// Schema of the lightbar IPC file: one JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LightbarOverride {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default)]
    pub player_leds: u8,
    #[serde(default = "default_brightness")]
    pub player_led_brightness: f32,
}

fn default_brightness() -> f32 {
    1.0
}

pub fn parse_override(content: &str) -> Option<LightbarOverride> {
    serde_json::from_str(content).ok()
}

/// Fold an override into the emulator-produced output state.
pub fn merge(base: OutputSnapshot, lightbar: Option<&LightbarOverride>) -> OutputSnapshot {
    let Some(lightbar) = lightbar else {
        return base;
    };
    OutputSnapshot {
        lightbar_red: lightbar.r,
        lightbar_green: lightbar.g,
        lightbar_blue: lightbar.b,
        player_leds: if lightbar.player_leds != 0 {
            lightbar.player_leds
        } else {
            base.player_leds
        },
        brightness: lightbar.player_led_brightness.clamp(0.0, 1.0),
        ..base
    }
}

pub async fn run_output_throttler(
    shared: Arc<Shared>,
    slot: Arc<DriverSlot>,
    power: PowerHandle,
    config: Config,
) {
    let result = tokio::task::spawn_blocking(move || {
        throttler_loop(shared, slot, power, config);
    })
    .await;
    if let Err(e) = result {
        log::error!("Output throttler task failed: {e}");
    }
}

fn throttler_loop(shared: Arc<Shared>, slot: Arc<DriverSlot>, power: PowerHandle, config: Config) {
    let mut last_sent: Option<OutputSnapshot> = None;
    let mut last_refresh = Instant::now();
    let mut last_ipc_read = Instant::now() - IPC_INTERVAL;
    let mut lightbar: Option<LightbarOverride> = None;

    while shared.flags.running() {
        std::thread::sleep(TICK);

        let standby = *power.lock().unwrap() == PowerState::Standby;
        if !standby && last_ipc_read.elapsed() >= IPC_INTERVAL {
            lightbar = read_ipc_file(&config.lightbar_ipc_path);
            last_ipc_read = Instant::now();
        }

        let desired = merge(shared.output.get(), lightbar.as_ref());
        let changed = last_sent != Some(desired);
        if !changed && last_refresh.elapsed() < REFRESH {
            continue;
        }

        let Some(driver) = slot.get() else {
            last_sent = None;
            continue;
        };
        let wants = Capability::RUMBLE | Capability::LIGHTBAR | Capability::PLAYER_LEDS;
        if !driver.metadata().capabilities.intersects(wants) {
            continue;
        }

        match driver.emit_output(&desired) {
            Ok(()) => {
                last_sent = Some(desired);
                last_refresh = Instant::now();
            }
            Err(e) => {
                log::debug!("Output emit failed: {e}");
            }
        }
    }
}

fn read_ipc_file(path: &Path) -> Option<LightbarOverride> {
    let content = std::fs::read_to_string(path).ok()?;
    let parsed = parse_override(&content);
    if parsed.is_none() {
        log::debug!("Malformed lightbar IPC file at {}", path.display());
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ipc_line() {
        let parsed = parse_override(
            r#"{"r": 255, "g": 0, "b": 64, "player_leds": 3, "player_led_brightness": 0.5}"#,
        )
        .unwrap();
        assert_eq!(parsed.r, 255);
        assert_eq!(parsed.b, 64);
        assert_eq!(parsed.player_leds, 3);
        assert!((parsed.player_led_brightness - 0.5).abs() < f32::EPSILON);

        // Optional fields default.
        let parsed = parse_override(r#"{"r": 1, "g": 2, "b": 3}"#).unwrap();
        assert_eq!(parsed.player_leds, 0);
        assert!((parsed.player_led_brightness - 1.0).abs() < f32::EPSILON);

        assert!(parse_override("not json").is_none());
    }

    #[test]
    fn merge_prefers_override_lightbar() {
        let base = OutputSnapshot {
            rumble_left: 100,
            player_leds: 0x01,
            lightbar_red: 10,
            ..OutputSnapshot::default()
        };
        let lightbar = LightbarOverride {
            r: 200,
            g: 50,
            b: 25,
            player_leds: 0,
            player_led_brightness: 2.0,
        };

        let merged = merge(base, Some(&lightbar));
        // Rumble passes through, lightbar comes from the override.
        assert_eq!(merged.rumble_left, 100);
        assert_eq!(merged.lightbar_red, 200);
        assert_eq!(merged.lightbar_green, 50);
        // A zero override mask keeps the console's player assignment.
        assert_eq!(merged.player_leds, 0x01);
        // Brightness clamps into range.
        assert!((merged.brightness - 1.0).abs() < f32::EPSILON);

        assert_eq!(merge(base, None), base);
    }
}
