// src/constants.rs

/// The name of the main entry point. It is also the dotted path of the root command.
pub const APP_NAME: &str = "clk";

/// The directory that marks a project (local profile) root.
pub const LOCAL_PROFILE_DIR: &str = ".clk";

/// The settings document of a directory profile.
pub const SETTINGS_FILENAME: &str = "settings.json";

/// The file holding the migration version of a directory profile.
pub const VERSION_FILENAME: &str = "version.txt";

/// Suffix of the copy taken before a migration touches a settings file.
pub const BACKUP_SUFFIX: &str = "backup";

/// Directory, inside a root profile, that holds its extensions.
pub const EXTENSIONS_DIR: &str = "extensions";

/// Directory, inside a profile, scanned for external executables.
pub const EXECUTABLES_DIR: &str = "bin";

/// Directory, inside a profile, scanned for declarative custom command definitions.
pub const CUSTOM_COMMANDS_DIR: &str = "commands";

/// Directory, inside the global profile, that holds on-disk caches.
pub const CACHE_DIR: &str = "cache";

/// Reserved settings key for profile-local metadata. Never merged.
pub const SELF_KEY: &str = "_self";

/// Flow dependency entry meaning "discard everything up to here".
pub const FLOW_STOP_MARKER: &str = "[stop]";

/// Flow dependency entry standing for the declared dependencies of the command being configured.
pub const FLOW_SELF_PLACEHOLDER: &str = "[self]";

/// Leaf prefix forcing lookup in the core (built-in) resolver only.
pub const CORE_ONLY_PREFIX: char = '_';

/// Flag accepted by every command to ignore remembered parameters from explicit profiles.
pub const NO_PARAMETERS_FLAG: &str = "--no-parameters";

/// Upper bound on root re-parses while looking for a stable injected prefix.
pub const MAX_ROOT_PARSE_PASSES: usize = 8;

/// Upper bound on nested invocation depth (alias inside alias inside flow...).
pub const MAX_NESTING_DEPTH: usize = 64;

/// Environment variables read by the engine.
pub const ENV_CONFIG_DIR: &str = "CLK_CONFIG_DIR";
pub const ENV_WORKSPACE: &str = "CLK_WORKSPACE";
pub const ENV_PROJECT: &str = "CLK_PROJECT";
pub const ENV_LOG: &str = "CLK_LOG";
pub const ENV_PARAMETER_PREFIX: &str = "CLK_P_";
pub const ENV_EXTENSION_PREFIX: &str = "CLK_E_";

/// Environment variables exported to external commands.
pub const ENV_DRY_RUN: &str = "CLK_DRY_RUN";
pub const ENV_COMMAND_PATH: &str = "CLK_COMMAND_PATH";
pub const ENV_VALUE_PREFIX: &str = "CLK___";

/// The name of the compressed external metadata cache file (inside the cache directory).
pub const EXTERNAL_CACHE_FILENAME: &str = "external.cache.bin";
