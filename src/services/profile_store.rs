//! Profile store rules
//!
//! Validation of a submitted configuration and classification of the change it
//! represents compared to the running one. Pure functions, no I/O.

use crate::hotspot::{Configuration, ProfileId, is_settable_flag};
use log::debug;
use serde::Serialize;
use serde_json::Value;
use serde_valid::Validate;
use std::collections::HashSet;

/// A rule violation attached to a form field, e.g. `profiles[1].passphrase`
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
    /// Non-fatal findings, e.g. an enabled hotspot without any profile
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_error_for(&self, field: &str) -> bool {
        self.errors.iter().any(|error| error.field == field)
    }

    fn reject(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum Disruption {
    EnabledToggled,
    DeviceChanged { from: String, to: String },
    ChannelChanged { from: i64, to: i64 },
    ProfileRemoved { id: ProfileId },
    ProfileModified { id: ProfileId },
    ProfilesReordered,
}

/// Classification of a configuration change
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChangeSet {
    NoOp,
    /// Profiles appended, everything else untouched
    Additive { added: Vec<ProfileId> },
    /// The radio or a running profile changes
    Disruptive { reasons: Vec<Disruption> },
}

impl ChangeSet {
    pub fn is_disruptive(&self) -> bool {
        matches!(self, ChangeSet::Disruptive { .. })
    }
}

/// Validation and diff rules for hotspot configurations
#[derive(Clone, Debug)]
pub struct ProfileStore {
    max_profiles: usize,
}

impl ProfileStore {
    pub const MAX_SSID_BYTES: usize = 32;
    pub const MIN_PASSPHRASE_LEN: usize = 8;
    pub const MAX_DEVICE_NAME_LEN: usize = 15;

    /// # Arguments
    /// * `max_profiles` - Number of profiles the host can serve, one per served network
    pub fn new(max_profiles: usize) -> Self {
        Self { max_profiles }
    }

    pub fn max_profiles(&self) -> usize {
        self.max_profiles
    }

    /// Validate a configuration
    ///
    /// Every violated rule is reported, so the form can highlight all
    /// offending fields at once.
    pub fn validate(&self, config: &Configuration) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Err(errors) = config.validate() {
            match serde_json::from_str::<Value>(&errors.to_string()) {
                Ok(errors) => collect_field_errors(&errors, "", &mut report),
                Err(e) => {
                    debug!("unstructured validation errors: {e}");
                    report.reject("configuration", errors.to_string());
                }
            }
        }

        self.validate_radio(config, &mut report);
        self.validate_profiles(config, &mut report);

        if config.is_inert() {
            report
                .warnings
                .push("hotspot is enabled but has no profile to broadcast".to_string());
        }

        report.errors.sort_by(|a, b| a.field.cmp(&b.field));
        report
    }

    fn validate_radio(&self, config: &Configuration, report: &mut ValidationReport) {
        let device = &config.radio.device;

        if device.trim().is_empty() {
            if config.radio.enabled {
                report.reject("radio.device", "a device is required while the hotspot is enabled");
            }
            return;
        }

        if device.len() > Self::MAX_DEVICE_NAME_LEN
            || device
                .chars()
                .any(|c| c == '/' || c.is_whitespace() || c.is_control())
        {
            report.reject("radio.device", format!("'{device}' is not a valid interface name"));
            return;
        }

        // every further profile gets its own interface named after the device
        if let Some(last) = config.profiles.len().checked_sub(1) {
            let interface = config.interface_name(last);
            if interface.len() > Self::MAX_DEVICE_NAME_LEN {
                report.reject(
                    "radio.device",
                    format!(
                        "'{device}' is too long to serve {} profiles, '{interface}' exceeds {} characters",
                        config.profiles.len(),
                        Self::MAX_DEVICE_NAME_LEN
                    ),
                );
            }
        }
    }

    fn validate_profiles(&self, config: &Configuration, report: &mut ValidationReport) {
        if config.profiles.len() > self.max_profiles {
            report.reject(
                "profiles",
                format!("at most {} profiles can be served", self.max_profiles),
            );
        }

        let mut ids = HashSet::new();
        let mut ssids = HashSet::new();

        for (index, profile) in config.profiles.iter().enumerate() {
            let field = |name: &str| format!("profiles[{index}].{name}");

            if profile.id.as_str().is_empty() {
                report.reject(field("id"), "must not be empty");
            } else if !ids.insert(&profile.id) {
                report.reject(field("id"), format!("duplicate profile id '{}'", profile.id));
            }

            if profile.ssid.len() > Self::MAX_SSID_BYTES {
                report.reject(
                    field("ssid"),
                    format!("must not exceed {} bytes", Self::MAX_SSID_BYTES),
                );
            }
            if profile.ssid.chars().any(char::is_control) {
                report.reject(field("ssid"), "must not contain control characters");
            }
            if !profile.ssid.is_empty() && !ssids.insert(profile.ssid.as_str()) {
                report.reject(field("ssid"), format!("duplicate ssid '{}'", profile.ssid));
            }

            if !profile.is_open() {
                if profile.passphrase.chars().count() < Self::MIN_PASSPHRASE_LEN {
                    report.reject(
                        field("passphrase"),
                        format!(
                            "must have at least {} characters",
                            Self::MIN_PASSPHRASE_LEN
                        ),
                    );
                }
                if !profile
                    .passphrase
                    .chars()
                    .all(|c| c.is_ascii_graphic() || c == ' ')
                {
                    report.reject(field("passphrase"), "must only contain printable ascii");
                }
            }

            for flag in profile.flags.keys().filter(|flag| !is_settable_flag(flag)) {
                report.reject(field("flags"), format!("'{flag}' cannot be set as a flag"));
            }
        }
    }

    /// Classify the change from `old` to `new`
    pub fn diff(old: &Configuration, new: &Configuration) -> ChangeSet {
        if old == new {
            return ChangeSet::NoOp;
        }

        let mut reasons = vec![];

        if old.radio.enabled != new.radio.enabled {
            reasons.push(Disruption::EnabledToggled);
        }
        if old.radio.device != new.radio.device {
            reasons.push(Disruption::DeviceChanged {
                from: old.radio.device.clone(),
                to: new.radio.device.clone(),
            });
        }
        if old.radio.channel != new.radio.channel {
            reasons.push(Disruption::ChannelChanged {
                from: old.radio.channel,
                to: new.radio.channel,
            });
        }

        let mut removed = false;
        for profile in &old.profiles {
            match new.profile(&profile.id) {
                None => {
                    removed = true;
                    reasons.push(Disruption::ProfileRemoved {
                        id: profile.id.clone(),
                    });
                }
                Some(updated) if updated != profile => reasons.push(Disruption::ProfileModified {
                    id: profile.id.clone(),
                }),
                Some(_) => {}
            }
        }

        // surviving profiles keep their interface only if they stay in front
        if !removed
            && !old
                .profiles
                .iter()
                .zip(&new.profiles)
                .all(|(old, new)| old.id == new.id)
        {
            reasons.push(Disruption::ProfilesReordered);
        }

        if !reasons.is_empty() {
            return ChangeSet::Disruptive { reasons };
        }

        ChangeSet::Additive {
            added: new
                .profiles
                .iter()
                .filter(|profile| old.profile(&profile.id).is_none())
                .map(|profile| profile.id.clone())
                .collect(),
        }
    }
}

/// Flatten the structured error tree produced by `serde_valid`
fn collect_field_errors(errors: &Value, path: &str, report: &mut ValidationReport) {
    let field = if path.is_empty() { "configuration" } else { path };

    match errors {
        Value::Array(messages) => messages.iter().for_each(|message| {
            report.reject(field, message_text(message));
        }),
        Value::Object(map) => {
            if let Some(Value::Array(messages)) = map.get("errors") {
                for message in messages {
                    report.reject(field, message_text(message));
                }
            }
            if let Some(Value::Object(properties)) = map.get("properties") {
                for (name, nested) in properties {
                    let nested_path = if path.is_empty() {
                        name.clone()
                    } else {
                        format!("{path}.{name}")
                    };
                    collect_field_errors(nested, &nested_path, report);
                }
            }
            if let Some(Value::Object(items)) = map.get("items") {
                for (index, nested) in items {
                    collect_field_errors(nested, &format!("{path}[{index}]"), report);
                }
            }
        }
        _ => {}
    }
}

fn message_text(message: &Value) -> String {
    match message {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
