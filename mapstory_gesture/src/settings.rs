// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Gesture thresholds and user preferences.
//!
//! [`GestureConfig`] holds fixed thresholds chosen by the host at construction.
//! [`GestureSettings`] holds the toggles users (or the application) flip at
//! runtime. They live in a [`SettingsStore`] that the preference layer feeds
//! through [`SettingsStore::on_preference_changed`]; the classifier takes one
//! snapshot per gesture, so a change never lands mid-gesture.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Preference key: `Bool`, whether two-finger rotation is allowed.
pub const KEY_ORIENTATION_ENABLED: &str = "orientation_enabled";
/// Preference key: `Text`, one of the [`TiltMode`] names.
pub const KEY_TILT_MODE: &str = "tilt_mode";
/// Preference key: `Bool`, the user's tilt toggle.
pub const KEY_TILT_ENABLED: &str = "tilt_enabled";
/// Preference key: `Bool`, free-form 3D camera mode.
pub const KEY_FREE_FORM_3D: &str = "free_form_3d";
/// Preference key: `Number`, display density multiplier for pixel thresholds.
pub const KEY_DENSITY: &str = "density";

/// Thresholds and timeouts for gesture classification.
///
/// Pixel distances are in density-independent pixels and are scaled by
/// [`GestureSettings::density`] at the start of each gesture.
#[derive(Clone, Debug, PartialEq)]
pub struct GestureConfig {
    /// Movement before a press becomes a scroll or drag (default: 10px).
    pub touch_slop: f64,
    /// Window for the second tap of a double tap (default: 300ms).
    pub double_tap_timeout: Duration,
    /// Maximum distance between the taps of a double tap (default: 40px).
    pub double_tap_slop: f64,
    /// Stationary press time before a long press (default: 500ms).
    pub long_press_timeout: Duration,
    /// Delay between a long press and drag tracking (default: 150ms).
    pub drag_promotion_delay: Duration,
    /// Most candidates offered for disambiguation (default: 20).
    pub max_deconfliction_candidates: usize,
    /// Scrolling is suppressed this long after a multi-touch gesture (default: 250ms).
    pub scale_cooldown: Duration,
    /// Touch tolerance radius for hit tests (default: 12px).
    pub touch_radius: f64,
    /// Hit-test result bound (default: 64).
    pub hit_limit: usize,
    /// Zoom exponent per pixel of vertical double-tap drag (default: 0.005).
    pub zoom_per_pixel: f64,
    /// Tilt per pixel of parallel two-finger vertical motion (default: 0.25°).
    pub tilt_per_pixel: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            touch_slop: 10.0,
            double_tap_timeout: Duration::from_millis(300),
            double_tap_slop: 40.0,
            long_press_timeout: Duration::from_millis(500),
            drag_promotion_delay: Duration::from_millis(150),
            max_deconfliction_candidates: 20,
            scale_cooldown: Duration::from_millis(250),
            touch_radius: 12.0,
            hit_limit: 64,
            zoom_per_pixel: 0.005,
            tilt_per_pixel: 0.25,
        }
    }
}

/// Tilt enablement.
///
/// Only [`TiltMode::Enabled`] lets two-finger motion tilt the camera (free-form
/// 3D aside). The user's toggle moves between `Enabled` and
/// `ManuallyDisabled`; it cannot lift a programmatic or full disable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TiltMode {
    /// Tilt allowed.
    #[default]
    Enabled,
    /// The user turned tilt off.
    ManuallyDisabled,
    /// The application turned tilt off (e.g. a 2D-only tool is active).
    ProgrammaticallyDisabled,
    /// Tilt unavailable on this surface.
    FullyDisabled,
}

impl TiltMode {
    /// Preference name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::ManuallyDisabled => "manually_disabled",
            Self::ProgrammaticallyDisabled => "programmatically_disabled",
            Self::FullyDisabled => "fully_disabled",
        }
    }

    /// Apply the user's tilt toggle.
    pub fn with_user_toggle(self, enabled: bool) -> Self {
        match self {
            Self::Enabled | Self::ManuallyDisabled if enabled => Self::Enabled,
            Self::Enabled | Self::ManuallyDisabled => Self::ManuallyDisabled,
            locked => locked,
        }
    }
}

impl fmt::Display for TiltMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TiltMode {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Enabled,
            Self::ManuallyDisabled,
            Self::ProgrammaticallyDisabled,
            Self::FullyDisabled,
        ]
        .into_iter()
        .find(|mode| mode.name().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| SettingsError::InvalidValue {
            key: KEY_TILT_MODE.to_owned(),
            value: s.to_owned(),
        })
    }
}

/// Runtime gesture toggles.
#[derive(Clone, Debug, PartialEq)]
pub struct GestureSettings {
    /// Two-finger rotation allowed.
    pub orientation_enabled: bool,
    /// Tilt enablement.
    pub tilt: TiltMode,
    /// Free-form 3D mode: enables rotation and tilt regardless of the above.
    pub free_form_3d: bool,
    /// Display density multiplier applied to pixel thresholds.
    pub density: f64,
}

impl Default for GestureSettings {
    fn default() -> Self {
        Self {
            orientation_enabled: true,
            tilt: TiltMode::Enabled,
            free_form_3d: false,
            density: 1.0,
        }
    }
}

impl GestureSettings {
    /// Whether two-finger rotation is reported.
    pub fn rotation_allowed(&self) -> bool {
        self.free_form_3d || self.orientation_enabled
    }

    /// Whether two-finger tilt is reported.
    pub fn tilt_allowed(&self) -> bool {
        self.free_form_3d || self.tilt == TiltMode::Enabled
    }
}

/// A value delivered by the preference layer.
#[derive(Clone, Debug, PartialEq)]
pub enum PreferenceValue {
    /// A toggle.
    Bool(bool),
    /// A number.
    Number(f64),
    /// A string.
    Text(String),
}

impl PreferenceValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
        }
    }
}

/// Errors from applying a preference change.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SettingsError {
    /// No gesture setting has this key.
    #[error("unknown gesture preference `{0}`")]
    UnknownKey(String),
    /// The value has the wrong type for the key.
    #[error("preference `{key}` expects a {expected} value, got {got}")]
    TypeMismatch {
        /// Preference key.
        key: String,
        /// Expected value type.
        expected: &'static str,
        /// Delivered value type.
        got: &'static str,
    },
    /// The value has the right type but is out of range.
    #[error("invalid value `{value}` for preference `{key}`")]
    InvalidValue {
        /// Preference key.
        key: String,
        /// Rendered value.
        value: String,
    },
}

/// Read-optimized holder of the current [`GestureSettings`].
pub struct SettingsStore {
    current: ArcSwap<GestureSettings>,
}

impl fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsStore")
            .field("current", &*self.current.load())
            .finish()
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(GestureSettings::default())
    }
}

impl SettingsStore {
    /// A store starting at `initial`.
    pub fn new(initial: GestureSettings) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// The current settings.
    pub fn snapshot(&self) -> Arc<GestureSettings> {
        self.current.load_full()
    }

    /// Replace the settings wholesale.
    pub fn store(&self, settings: GestureSettings) {
        self.current.store(Arc::new(settings));
    }

    /// Apply `edit` to a copy of the current settings and publish it.
    pub fn update(&self, edit: impl Fn(&mut GestureSettings)) {
        self.current.rcu(|current| {
            let mut next = GestureSettings::clone(current);
            edit(&mut next);
            next
        });
    }

    /// Turn programmatic tilt suppression on or off.
    ///
    /// Lifting it restores [`TiltMode::Enabled`]; a full disable is left alone.
    pub fn set_programmatic_tilt_disabled(&self, disabled: bool) {
        self.update(|s| {
            s.tilt = match (s.tilt, disabled) {
                (TiltMode::FullyDisabled, _) => TiltMode::FullyDisabled,
                (_, true) => TiltMode::ProgrammaticallyDisabled,
                (TiltMode::ProgrammaticallyDisabled, false) => TiltMode::Enabled,
                (mode, false) => mode,
            };
        });
    }

    /// Key-change callback for the preference layer.
    ///
    /// Unknown keys are logged and reported; the settings are unchanged on
    /// any error.
    pub fn on_preference_changed(
        &self,
        key: &str,
        value: PreferenceValue,
    ) -> Result<(), SettingsError> {
        let mismatch = |expected: &'static str| SettingsError::TypeMismatch {
            key: key.to_owned(),
            expected,
            got: value.kind(),
        };
        match key {
            KEY_ORIENTATION_ENABLED => {
                let PreferenceValue::Bool(on) = value else {
                    return Err(mismatch("bool"));
                };
                self.update(|s| s.orientation_enabled = on);
            }
            KEY_TILT_ENABLED => {
                let PreferenceValue::Bool(on) = value else {
                    return Err(mismatch("bool"));
                };
                self.update(|s| s.tilt = s.tilt.with_user_toggle(on));
            }
            KEY_TILT_MODE => {
                let PreferenceValue::Text(name) = &value else {
                    return Err(mismatch("text"));
                };
                let mode: TiltMode = name.parse()?;
                self.update(|s| s.tilt = mode);
            }
            KEY_FREE_FORM_3D => {
                let PreferenceValue::Bool(on) = value else {
                    return Err(mismatch("bool"));
                };
                self.update(|s| s.free_form_3d = on);
            }
            KEY_DENSITY => {
                let PreferenceValue::Number(density) = value else {
                    return Err(mismatch("number"));
                };
                if !(density.is_finite() && density > 0.0) {
                    return Err(SettingsError::InvalidValue {
                        key: key.to_owned(),
                        value: density.to_string(),
                    });
                }
                self.update(|s| s.density = density);
            }
            _ => {
                tracing::warn!(key, "ignoring unknown gesture preference");
                return Err(SettingsError::UnknownKey(key.to_owned()));
            }
        }
        tracing::debug!(key, "gesture preference applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_changes_update_the_snapshot() {
        let store = SettingsStore::default();
        let before = store.snapshot();
        store
            .on_preference_changed(KEY_ORIENTATION_ENABLED, PreferenceValue::Bool(false))
            .expect("known key");
        store
            .on_preference_changed(KEY_DENSITY, PreferenceValue::Number(2.0))
            .expect("known key");
        let after = store.snapshot();
        assert!(before.orientation_enabled, "old snapshot is untouched");
        assert!(!after.orientation_enabled);
        assert_eq!(after.density, 2.0);
    }

    #[test]
    fn bad_values_leave_settings_alone() {
        let store = SettingsStore::default();
        assert_eq!(
            store.on_preference_changed("nope", PreferenceValue::Bool(true)),
            Err(SettingsError::UnknownKey("nope".to_owned()))
        );
        assert!(matches!(
            store.on_preference_changed(KEY_FREE_FORM_3D, PreferenceValue::Number(1.0)),
            Err(SettingsError::TypeMismatch { expected: "bool", .. })
        ));
        assert!(
            store
                .on_preference_changed(KEY_DENSITY, PreferenceValue::Number(-1.0))
                .is_err()
        );
        assert!(
            store
                .on_preference_changed(KEY_TILT_MODE, PreferenceValue::Text("sideways".into()))
                .is_err()
        );
        assert_eq!(*store.snapshot(), GestureSettings::default());
    }

    #[test]
    fn user_toggle_cannot_lift_a_lock() {
        let store = SettingsStore::default();
        store
            .on_preference_changed(KEY_TILT_ENABLED, PreferenceValue::Bool(false))
            .expect("known key");
        assert_eq!(store.snapshot().tilt, TiltMode::ManuallyDisabled);

        store.set_programmatic_tilt_disabled(true);
        store
            .on_preference_changed(KEY_TILT_ENABLED, PreferenceValue::Bool(true))
            .expect("known key");
        assert_eq!(store.snapshot().tilt, TiltMode::ProgrammaticallyDisabled);

        store.set_programmatic_tilt_disabled(false);
        assert_eq!(store.snapshot().tilt, TiltMode::Enabled);

        store
            .on_preference_changed(
                KEY_TILT_MODE,
                PreferenceValue::Text("Fully_Disabled".into()),
            )
            .expect("known key");
        store.set_programmatic_tilt_disabled(false);
        assert_eq!(store.snapshot().tilt, TiltMode::FullyDisabled);
    }

    #[test]
    fn free_form_overrides_rotation_and_tilt() {
        let settings = GestureSettings {
            orientation_enabled: false,
            tilt: TiltMode::FullyDisabled,
            free_form_3d: true,
            density: 1.0,
        };
        assert!(settings.rotation_allowed());
        assert!(settings.tilt_allowed());
        let locked = GestureSettings {
            free_form_3d: false,
            ..settings
        };
        assert!(!locked.rotation_allowed());
        assert!(!locked.tilt_allowed());
    }
}
