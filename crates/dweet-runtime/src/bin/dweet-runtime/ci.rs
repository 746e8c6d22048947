//! Exit codes shared by every command.

use dweet_runtime::RuntimeError;

/// Exit code: invalid project/configuration input.
pub const EXIT_INVALID_CONFIG: i32 = 10;
/// Exit code: a settings edit was rejected.
pub const EXIT_VALIDATION: i32 = 11;
/// Exit code: replay file missing or unreadable.
pub const EXIT_REPLAY_FILE: i32 = 12;
/// Exit code: broker client failure.
pub const EXIT_BROKER: i32 = 13;
/// Exit code: catalog could not be written.
pub const EXIT_PERSIST: i32 = 14;
/// Exit code: unexpected/internal failure.
pub const EXIT_INTERNAL: i32 = 20;

#[must_use]
pub fn classify_runtime_error(err: &RuntimeError) -> i32 {
    match err {
        RuntimeError::InvalidConfig(_) => EXIT_INVALID_CONFIG,
        RuntimeError::Validation(_) => EXIT_VALIDATION,
        RuntimeError::ReplayFile(_) => EXIT_REPLAY_FILE,
        RuntimeError::Broker(_) => EXIT_BROKER,
        RuntimeError::Persist(_) => EXIT_PERSIST,
    }
}

/// Map errors without a typed cause to exit codes by message.
#[must_use]
pub fn classify_message(message: &str) -> i32 {
    let msg = message.to_ascii_lowercase();
    if msg.contains("invalid config")
        || msg.contains("missing runtime.toml")
        || msg.contains("project folder not found")
    {
        return EXIT_INVALID_CONFIG;
    }
    if msg.contains("validation failed") {
        return EXIT_VALIDATION;
    }
    if msg.contains("replay file") {
        return EXIT_REPLAY_FILE;
    }
    EXIT_INTERNAL
}

/// Classify an error with command context.
#[must_use]
pub fn classify_error(err: &anyhow::Error, command: Option<&str>) -> i32 {
    let classified = err
        .downcast_ref::<RuntimeError>()
        .map_or_else(|| classify_message(&format!("{err:#}")), classify_runtime_error);
    if classified != EXIT_INTERNAL {
        return classified;
    }
    match command {
        Some("validate") => EXIT_INVALID_CONFIG,
        Some("edit") => EXIT_VALIDATION,
        _ => EXIT_INTERNAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_map_to_their_codes() {
        let err = anyhow::Error::from(RuntimeError::validation("min 'abc' is not a finite number"));
        assert_eq!(classify_error(&err, None), EXIT_VALIDATION);
        let err = anyhow::Error::from(RuntimeError::ReplayFile("demo.csv: not found".into()));
        assert_eq!(classify_error(&err, Some("replay")), EXIT_REPLAY_FILE);
    }

    #[test]
    fn context_keeps_the_typed_cause() {
        let err = anyhow::Error::from(RuntimeError::InvalidConfig("runtime.toml: bad".into()))
            .context("load project");
        assert_eq!(classify_error(&err, None), EXIT_INVALID_CONFIG);
    }

    #[test]
    fn untyped_errors_fall_back_to_message_and_command() {
        assert_eq!(
            classify_message("missing runtime.toml at /tmp/p/runtime.toml"),
            EXIT_INVALID_CONFIG
        );
        let err = anyhow::anyhow!("unexpected panic");
        assert_eq!(classify_error(&err, None), EXIT_INTERNAL);
        assert_eq!(classify_error(&err, Some("validate")), EXIT_INVALID_CONFIG);
    }
}
