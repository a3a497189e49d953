//! Static, process-wide table of language tag -> toolchain invocation.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Everything the Grader needs to know to compile (optionally) and run a submission in a given
/// language. Paths in `compile_command`/`run_command` are relative to the sandbox's `/app` cwd.
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Filename the submitted source is written to inside the workspace.
    pub source_filename: &'static str,
    /// Argv of the compile step, or `None` for an interpreted language.
    pub compile_command: Option<&'static [&'static str]>,
    /// Argv used to run the compiled binary or the interpreter.
    pub run_command: &'static [&'static str],
}

impl LanguageConfig {
    pub fn is_compiled(&self) -> bool {
        self.compile_command.is_some()
    }
}

static REGISTRY: LazyLock<HashMap<&'static str, LanguageConfig>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    m.insert(
        "python",
        LanguageConfig {
            source_filename: "solution.py",
            compile_command: None,
            run_command: &["python3", "solution.py"],
        },
    );

    m.insert(
        "cpp",
        LanguageConfig {
            source_filename: "solution.cpp",
            compile_command: Some(&[
                "g++", "-O2", "-std=c++20", "-o", "solution", "solution.cpp",
            ]),
            run_command: &["./solution"],
        },
    );

    m.insert(
        "c",
        LanguageConfig {
            source_filename: "solution.c",
            compile_command: Some(&[
                "gcc", "-O2", "-std=c17", "-o", "solution", "solution.c", "-lm",
            ]),
            run_command: &["./solution"],
        },
    );

    m.insert(
        "go",
        LanguageConfig {
            source_filename: "solution.go",
            compile_command: Some(&["go", "build", "-o", "solution", "solution.go"]),
            run_command: &["./solution"],
        },
    );

    m.insert(
        "rust",
        LanguageConfig {
            source_filename: "solution.rs",
            compile_command: Some(&["rustc", "-O", "-o", "solution", "solution.rs"]),
            run_command: &["./solution"],
        },
    );

    m.insert(
        "zig",
        LanguageConfig {
            source_filename: "solution.zig",
            compile_command: Some(&[
                "zig",
                "build-exe",
                "-O",
                "ReleaseFast",
                "-femit-bin=solution",
                "solution.zig",
            ]),
            run_command: &["./solution"],
        },
    );

    m
});

/// Looks up a language by its job-supplied tag. O(1), never mutates the registry.
pub fn lookup(tag: &str) -> Option<&'static LanguageConfig> {
    REGISTRY.get(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_languages_resolve() {
        for lang in ["python", "cpp", "c", "go", "rust", "zig"] {
            assert!(lookup(lang).is_some(), "{lang} should be registered");
        }
    }

    #[test]
    fn unknown_language_is_none() {
        assert!(lookup("brainfuck").is_none());
    }

    #[test]
    fn python_is_interpreted_others_compiled() {
        assert!(!lookup("python").unwrap().is_compiled());
        assert!(lookup("cpp").unwrap().is_compiled());
    }
}
