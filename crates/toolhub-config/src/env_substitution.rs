use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::env;
use toolhub_core::{Result, ToolhubError};

// ${VAR} and ${VAR:-default}
static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex pattern")
});

/// Substitute environment variables in a single string.
///
/// Unset variables fall back to their `:-` default; an unset variable
/// without a default is reported as a configuration error.
pub fn substitute_str(input: &str) -> Result<String> {
    let mut missing_vars = Vec::new();

    let result = ENV_VAR_REGEX.replace_all(input, |cap: &Captures<'_>| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing_vars.push(var_name.to_string());
                    String::new()
                }
            },
        }
    });

    if !missing_vars.is_empty() {
        return Err(ToolhubError::ConfigError(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_str() {
        env::set_var("TOOLHUB_TEST_VAR", "test_value");

        assert_eq!(
            substitute_str("${TOOLHUB_TEST_VAR}/some/path").unwrap(),
            "test_value/some/path"
        );
        assert_eq!(
            substitute_str("${TOOLHUB_NON_EXISTENT:-default_value}").unwrap(),
            "default_value"
        );
        assert_eq!(
            substitute_str("--root=${TOOLHUB_TEST_VAR}:${TOOLHUB_NON_EXISTENT:-}").unwrap(),
            "--root=test_value:"
        );

        env::remove_var("TOOLHUB_TEST_VAR");
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let err = substitute_str("${TOOLHUB_DEFINITELY_UNSET_VAR}/x").unwrap_err();
        assert!(err.to_string().contains("TOOLHUB_DEFINITELY_UNSET_VAR"));
    }

    #[test]
    fn test_plain_strings_pass_through() {
        assert_eq!(substitute_str("--stdio").unwrap(), "--stdio");
        assert_eq!(substitute_str("$HOME").unwrap(), "$HOME");
    }
}
