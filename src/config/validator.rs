//! Manifest validation.
//!
//! This module checks a manifest for invalid or inconsistent values before
//! anything is planned, collecting every problem in one pass.

use crate::error::{ConfigError, FlyrecError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{AppSpec, IpSpec, Manifest, MachineSpec, ProviderConfig};

/// CPU kinds accepted by the Machines API.
const CPU_KINDS: &[&str] = &["shared", "performance"];

/// Largest CPU count of a single machine.
const MAX_CPUS: i64 = 16;

/// Smallest memory size of a machine, in MB.
const MIN_MEMORY_MB: i64 = 256;

/// Validator for manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest and returns every finding.
    #[must_use]
    pub fn check(&self, manifest: &Manifest) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_provider(&manifest.provider, &mut result);
        if manifest.state.path.as_deref().is_some_and(str::is_empty) {
            result.errors.push(ValidationError {
                field: String::from("state.path"),
                message: String::from("State path cannot be empty"),
            });
        }

        let mut seen = HashSet::new();
        Self::validate_apps(&manifest.apps, &mut seen, &mut result);
        Self::validate_machines(manifest, &mut seen, &mut result);
        Self::validate_ips(manifest, &mut seen, &mut result);

        if manifest.resource_count() == 0 {
            result
                .warnings
                .push(String::from("No resources declared in manifest"));
        }

        result
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let result = self.check(manifest);

        if let Some(first_error) = result.errors.first() {
            return Err(FlyrecError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )));
        }

        debug!(warnings = result.warnings.len(), "Manifest validation passed");
        Ok(result)
    }

    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        for (field, endpoint) in [
            ("provider.graphql_endpoint", &provider.graphql_endpoint),
            ("provider.machines_endpoint", &provider.machines_endpoint),
        ] {
            if let Some(url) = endpoint
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                result.errors.push(ValidationError {
                    field: String::from(field),
                    message: format!("Endpoint '{url}' must be an http(s) URL"),
                });
            }
        }

        if provider.request_timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("provider.request_timeout_secs"),
                message: String::from("Request timeout must be at least 1 second"),
            });
        }

        if provider.teardown.max_attempts == 0 {
            result.errors.push(ValidationError {
                field: String::from("provider.teardown.max_attempts"),
                message: String::from("Teardown needs at least one attempt"),
            });
        }
    }

    fn validate_apps(apps: &[AppSpec], seen: &mut HashSet<String>, result: &mut ValidationResult) {
        for (i, app) in apps.iter().enumerate() {
            let prefix = format!("apps[{i}]");

            check_name(&app.name, &app.address(), &prefix, seen, result);

            if let Some(region) = &app.preferred_region
                && !is_region_code(region)
            {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.preferred_region"),
                    message: format!("Invalid region code '{region}'"),
                });
            }

            let mut regions = HashSet::new();
            for (j, region) in app.regions.iter().enumerate() {
                if !is_region_code(region) {
                    result.errors.push(ValidationError {
                        field: format!("{prefix}.regions[{j}]"),
                        message: format!("Invalid region code '{region}'"),
                    });
                }
                if !regions.insert(region) {
                    result
                        .warnings
                        .push(format!("{prefix}.regions[{j}]: Region '{region}' listed twice"));
                }
            }
        }
    }

    fn validate_machines(
        manifest: &Manifest,
        seen: &mut HashSet<String>,
        result: &mut ValidationResult,
    ) {
        for (i, machine) in manifest.machines.iter().enumerate() {
            let prefix = format!("machines[{i}]");

            check_name(&machine.name, &machine.address(), &prefix, seen, result);
            check_app_ref(manifest, &machine.app, &prefix, result);
            Self::validate_sizing(machine, &prefix, result);

            if machine.image.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.image"),
                    message: String::from("Container image cannot be empty"),
                });
            } else if machine.image.ends_with(":latest") {
                result.warnings.push(format!(
                    "{prefix}.image: Using ':latest' tag makes replacements unpredictable"
                ));
            }

            if let Some(region) = &machine.region
                && !is_region_code(region)
            {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.region"),
                    message: format!("Invalid region code '{region}'"),
                });
            }
        }
    }

    fn validate_sizing(machine: &MachineSpec, prefix: &str, result: &mut ValidationResult) {
        if let Some(cpus) = machine.cpus
            && !(1..=MAX_CPUS).contains(&cpus)
        {
            result.errors.push(ValidationError {
                field: format!("{prefix}.cpus"),
                message: format!("CPU count must be between 1 and {MAX_CPUS}, got {cpus}"),
            });
        }

        if let Some(memory) = machine.memory_mb {
            if memory < MIN_MEMORY_MB {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.memory_mb"),
                    message: format!("Memory must be at least {MIN_MEMORY_MB} MB, got {memory}"),
                });
            } else if memory % MIN_MEMORY_MB != 0 {
                result.warnings.push(format!(
                    "{prefix}.memory_mb: {memory} MB is not a multiple of {MIN_MEMORY_MB} and may be rounded"
                ));
            }
        }

        if let Some(kind) = &machine.cpu_kind
            && !CPU_KINDS.contains(&kind.as_str())
        {
            result.errors.push(ValidationError {
                field: format!("{prefix}.cpu_kind"),
                message: format!("Unknown CPU kind '{kind}'. Expected: shared or performance"),
            });
        }
    }

    fn validate_ips(manifest: &Manifest, seen: &mut HashSet<String>, result: &mut ValidationResult) {
        for (i, ip) in manifest.ips.iter().enumerate() {
            let prefix = format!("ips[{i}]");

            check_name(&ip.name, &ip.address(), &prefix, seen, result);
            check_app_ref(manifest, &ip.app, &prefix, result);
            check_ip_region(ip, &prefix, result);
        }
    }
}

fn check_name(
    name: &str,
    address: &str,
    prefix: &str,
    seen: &mut HashSet<String>,
    result: &mut ValidationResult,
) {
    if name.is_empty() {
        result.errors.push(ValidationError {
            field: format!("{prefix}.name"),
            message: String::from("Name cannot be empty"),
        });
        return;
    }

    if !is_valid_name(name) {
        result.errors.push(ValidationError {
            field: format!("{prefix}.name"),
            message: format!(
                "Name '{name}' is invalid. Must be lowercase alphanumeric with hyphens."
            ),
        });
    }

    if !seen.insert(address.to_string()) {
        result.errors.push(ValidationError {
            field: format!("{prefix}.name"),
            message: format!("Duplicate resource address: {address}"),
        });
    }
}

fn check_app_ref(manifest: &Manifest, app: &str, prefix: &str, result: &mut ValidationResult) {
    if app.is_empty() {
        result.errors.push(ValidationError {
            field: format!("{prefix}.app"),
            message: String::from("App reference cannot be empty"),
        });
    } else if !manifest.declares_app(app) {
        result.warnings.push(format!(
            "{prefix}.app: App '{app}' is not declared in this manifest; it must already exist"
        ));
    }
}

fn check_ip_region(ip: &IpSpec, prefix: &str, result: &mut ValidationResult) {
    if let Some(region) = &ip.region
        && region != "global"
        && !is_region_code(region)
    {
        result.errors.push(ValidationError {
            field: format!("{prefix}.region"),
            message: format!("Invalid region code '{region}'"),
        });
    }
}

/// Region codes are three lowercase ASCII letters (`ord`, `ams`).
fn is_region_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_lowercase())
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
