//! Heuristic diagnostics over shell output.
//!
//! The scanner is a pure pattern matcher: every chunk of terminal output is
//! checked against a table of known failure signatures, and each signature
//! that matches produces one actionable [`Suggestion`]. Detection favors
//! recall over precision - a false positive is a dismissible hint, a missed
//! detection is silent failure - so extraction failures fall back to a
//! generic label instead of suppressing the suggestion.

use std::time::Duration;

use regex::Regex;

/// A structured, dismissible remediation hint derived from output text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    /// Short headline for the detected problem.
    pub error_title: String,
    /// Human-readable description of the likely fix.
    pub fix_description: String,
    /// One-shot command the user can run to remediate or verify.
    pub remediation_command: String,
}

impl Suggestion {
    /// How long a frontend should keep a suggestion visible before
    /// auto-dismissing it. At most one suggestion is shown at a time; a
    /// newer one replaces the current one.
    pub const DISPLAY_TTL: Duration = Duration::from_secs(10);
}

/// One entry in the detector table.
///
/// A detector fires when any of its trigger substrings appears in the chunk.
/// Capture patterns are tried in order and the first group-1 match (trimmed)
/// is handed to the render function; `None` means extraction failed and the
/// renderer should use its fallback label.
struct Detector {
    name: &'static str,
    triggers: &'static [&'static str],
    captures: Vec<Regex>,
    render: fn(Option<&str>, &str) -> Suggestion,
}

/// Pattern matcher over terminal output chunks.
///
/// Detectors are independent and order-insensitive: all of them are checked
/// on every chunk and more than one may fire on the same text. Scanning is
/// stateless, so the same input always yields the same suggestions.
pub struct DiagnosticScanner {
    detectors: Vec<Detector>,
}

impl DiagnosticScanner {
    pub fn new() -> Self {
        Self {
            detectors: vec![
                Detector {
                    name: "command-not-recognized",
                    triggers: &["is not recognized", "command not found"],
                    captures: Vec::new(),
                    render: render_command_not_found,
                },
                Detector {
                    name: "missing-python-module",
                    triggers: &["ModuleNotFoundError: No module named"],
                    captures: vec![Regex::new(r#"named ['"](.*)['"]"#).unwrap()],
                    render: render_missing_module,
                },
                Detector {
                    name: "java-class-not-found",
                    triggers: &["ClassNotFoundException", "Could not find or load main class"],
                    captures: vec![
                        Regex::new(r"load main class (.*)").unwrap(),
                        Regex::new(r"Exception: (.*)").unwrap(),
                    ],
                    render: render_missing_class,
                },
            ],
        }
    }

    /// Scan one chunk of output and return every suggestion that fires.
    pub fn scan(&self, text: &str) -> Vec<Suggestion> {
        self.detectors
            .iter()
            .filter(|d| d.triggers.iter().any(|t| text.contains(t)))
            .map(|d| {
                let captured = d
                    .captures
                    .iter()
                    .find_map(|re| re.captures(text))
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim());
                tracing::debug!(detector = d.name, ?captured, "diagnostic fired");
                (d.render)(captured, text)
            })
            .collect()
    }
}

impl Default for DiagnosticScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn render_command_not_found(_captured: Option<&str>, text: &str) -> Suggestion {
    let lower = text.to_lowercase();
    if lower.contains("javac") || lower.contains("java") {
        Suggestion {
            error_title: "Java Compiler (JDK) Not Found".to_string(),
            fix_description:
                "It seems Java isn't in your PATH. Do you want to check if any Java version is installed?"
                    .to_string(),
            remediation_command: "java -version".to_string(),
        }
    } else {
        Suggestion {
            error_title: "Command Not Found".to_string(),
            fix_description:
                "I see that command isn't working. Should I check if Python is installed or try an alternative command?"
                    .to_string(),
            remediation_command: "py --version".to_string(),
        }
    }
}

fn render_missing_module(captured: Option<&str>, _text: &str) -> Suggestion {
    let name = captured.unwrap_or("required module");
    Suggestion {
        error_title: format!("Missing Module: {name}"),
        fix_description: format!("It looks like you're missing '{name}'. Want me to install it for you?"),
        remediation_command: format!("pip install {name}"),
    }
}

fn render_missing_class(captured: Option<&str>, _text: &str) -> Suggestion {
    let name = captured.unwrap_or("the class");
    Suggestion {
        error_title: "Java Runtime Error".to_string(),
        fix_description: format!(
            "Java can't find '{name}'. Did you remember to compile it first with 'javac'?"
        ),
        remediation_command: format!("javac {name}.java"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_missing_javac() {
        let scanner = DiagnosticScanner::new();
        let chunk = "'javac' is not recognized as an internal or external command";

        let suggestions = scanner.scan(chunk);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].error_title, "Java Compiler (JDK) Not Found");
        assert_eq!(suggestions[0].remediation_command, "java -version");
    }

    #[test]
    fn detects_generic_unknown_command() {
        let scanner = DiagnosticScanner::new();
        let suggestions = scanner.scan("bash: gradle: command not found");

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].error_title, "Command Not Found");
        assert_eq!(suggestions[0].remediation_command, "py --version");
    }

    #[test]
    fn detects_missing_python_module() {
        let scanner = DiagnosticScanner::new();
        let suggestions = scanner.scan("ModuleNotFoundError: No module named 'numpy'");

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].error_title, "Missing Module: numpy");
        assert_eq!(suggestions[0].remediation_command, "pip install numpy");
    }

    #[test]
    fn missing_module_falls_back_when_unparsable() {
        let scanner = DiagnosticScanner::new();
        let suggestions = scanner.scan("ModuleNotFoundError: No module named something");

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].error_title, "Missing Module: required module");
        assert_eq!(suggestions[0].remediation_command, "pip install required module");
    }

    #[test]
    fn detects_unloadable_main_class() {
        let scanner = DiagnosticScanner::new();
        let suggestions = scanner.scan("Error: Could not find or load main class Main");

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].error_title, "Java Runtime Error");
        assert_eq!(suggestions[0].remediation_command, "javac Main.java");
    }

    #[test]
    fn extracts_class_name_from_exception() {
        let scanner = DiagnosticScanner::new();
        let suggestions =
            scanner.scan("java.lang.ClassNotFoundException: com.example.App\n\tat java.base");

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].remediation_command, "javac com.example.App.java");
    }

    #[test]
    fn class_name_is_trimmed() {
        let scanner = DiagnosticScanner::new();
        let suggestions = scanner.scan("Error: Could not find or load main class Main\r");

        assert_eq!(suggestions[0].remediation_command, "javac Main.java");
    }

    #[test]
    fn multiple_detectors_fire_on_one_chunk() {
        let scanner = DiagnosticScanner::new();
        let chunk = "'python' is not recognized\nModuleNotFoundError: No module named 'flask'";

        let suggestions = scanner.scan(chunk);
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions.iter().any(|s| s.error_title == "Command Not Found"));
        assert!(suggestions.iter().any(|s| s.error_title == "Missing Module: flask"));
    }

    #[test]
    fn scanning_is_deterministic() {
        let scanner = DiagnosticScanner::new();
        let chunk = "ModuleNotFoundError: No module named 'requests'";

        assert_eq!(scanner.scan(chunk), scanner.scan(chunk));
    }

    #[test]
    fn benign_output_fires_nothing() {
        let scanner = DiagnosticScanner::new();
        assert!(scanner.scan("Compiling galaxy v0.1.0\nFinished dev profile").is_empty());
    }
}
