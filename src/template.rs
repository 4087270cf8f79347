//! Command templates.
//!
//! Service commands may reference variables as `{{.name}}`. Names are matched
//! case-insensitively, so `{{.Port}}` and `{{.port}}` refer to the same binding.

use std::collections::HashSet;
use std::sync::OnceLock;

use anyhow::{bail, Result};
use regex::Regex;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Returns the unique, lowercased variable names referenced by `command`, in order
/// of first appearance.
///
/// Fails when the command contains a `{{` or `}}` that is not part of a valid
/// placeholder.
pub fn extract_variables(command: &str) -> Result<Vec<String>> {
    let regex = placeholder_regex();
    let remainder = regex.replace_all(command, "");
    if remainder.contains("{{") || remainder.contains("}}") {
        bail!("malformed template in command: {}", command);
    }
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for captures in regex.captures_iter(command) {
        let name = captures[1].to_lowercase();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Replaces every placeholder in `command` with the value returned by `lookup`.
///
/// `lookup` receives the lowercased variable name. A placeholder without a value
/// is an error.
pub fn interpolate<'a, F>(command: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<&'a str>,
{
    extract_variables(command)?;
    let regex = placeholder_regex();
    let mut out = String::with_capacity(command.len());
    let mut last = 0;
    for captures in regex.captures_iter(command) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let name = captures[1].to_lowercase();
        let Some(value) = lookup(&name) else {
            bail!("no value bound for variable {} in command: {}", name, command);
        };
        out.push_str(&command[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&command[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_variable() {
        let vars = extract_variables("curl something.com:{{.port}}").unwrap();
        assert_eq!(vars, vec!["port"]);
    }

    #[test]
    fn extraction_lowercases_and_deduplicates() {
        let vars = extract_variables("run {{.Port}} --again {{ .port }} --host {{.host}}").unwrap();
        assert_eq!(vars, vec!["port", "host"]);
    }

    #[test]
    fn plain_command_has_no_variables() {
        assert!(extract_variables("ping google.com").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_placeholders() {
        assert!(extract_variables("something {{.port").is_err());
        assert!(extract_variables("something {trop}}").is_err());
        assert!(extract_variables("something {{port}}").is_err());
    }

    #[test]
    fn interpolates_bound_values() {
        let out = interpolate("echo {{.port}} {{.Host}}", |name| match name {
            "port" => Some("8080"),
            "host" => Some("localhost"),
            _ => None,
        })
        .unwrap();
        assert_eq!(out, "echo 8080 localhost");
    }

    #[test]
    fn interpolation_fails_on_unbound_variable() {
        let err = interpolate("echo {{.port}}", |_| None).unwrap_err();
        assert!(err.to_string().contains("port"));
    }
}
