//! Configuration module for flyrec.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `flyrec.yaml`
//! - Resolving the Fly API token
//! - Validation of declared resources
//! - Computing declaration hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    AppSpec, IpSpec, MachineSpec, Manifest, ProviderConfig, StateConfig, TeardownConfig,
    DEFAULT_STATE_PATH,
};
pub use parser::{apply_overrides, find_config_file, token_from_fly_config, ConfigParser, TOKEN_ENV_VAR};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
