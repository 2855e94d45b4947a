//! Supported languages and the runtime each one is judged in.

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{config::LanguageOverride, judge::JudgeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::JavaScript,
        Language::Java,
        Language::Cpp,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
        }
    }

    /// The built-in runtime of this language.
    pub fn default_spec(self) -> LanguageSpec {
        let sh = |script: &str| vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()];
        let (image, command, extension, file_stem) = match self {
            Language::Python => (
                "python:3.9-alpine",
                vec!["python".to_owned(), "solution.py".to_owned()],
                "py",
                "solution",
            ),
            Language::JavaScript => (
                "node:16-alpine",
                vec!["node".to_owned(), "solution.js".to_owned()],
                "js",
                "solution",
            ),
            // javac insists on the file being named after the public class
            Language::Java => (
                "eclipse-temurin:17-jdk-alpine",
                sh("javac -d /tmp Solution.java && java -cp /tmp Solution"),
                "java",
                "Solution",
            ),
            Language::Cpp => (
                "gcc:13",
                sh("g++ -O2 -o /tmp/solution solution.cpp && /tmp/solution"),
                "cpp",
                "solution",
            ),
        };
        LanguageSpec {
            language: self,
            image: image.to_owned(),
            command,
            extension: extension.to_owned(),
            file_stem: file_stem.to_owned(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Language {
    type Err = JudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .iter()
            .copied()
            .find(|lang| lang.id() == s)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(s.to_owned()))
    }
}

/// How code of one language gets built and run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageSpec {
    pub language: Language,
    /// Runtime image reference, e.g. `python:3.9-alpine`.
    pub image: String,
    /// Build-and-run invocation. Runs in the container's working directory,
    /// next to the mounted source file.
    pub command: Vec<String>,
    pub extension: String,
    pub file_stem: String,
}

impl LanguageSpec {
    /// Name of the source file the command expects, e.g. `solution.py`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.file_stem, self.extension)
    }
}

/// Immutable language table, built once at start-up and shared.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    specs: HashMap<Language, LanguageSpec>,
}

impl LanguageRegistry {
    /// Registry of the built-in language specs.
    pub fn builtin() -> LanguageRegistry {
        LanguageRegistry {
            specs: Language::ALL
                .iter()
                .map(|&lang| (lang, lang.default_spec()))
                .collect(),
        }
    }

    /// Built-in specs with the configured overrides applied. Overrides for
    /// unknown languages are rejected.
    pub fn from_config(
        overrides: &HashMap<String, LanguageOverride>,
    ) -> Result<LanguageRegistry, JudgeError> {
        let mut registry = Self::builtin();
        for (id, o) in overrides {
            let lang: Language = id.parse()?;
            let spec = registry
                .specs
                .entry(lang)
                .or_insert_with(|| lang.default_spec());
            if let Some(image) = &o.image {
                spec.image = image.clone();
            }
            if let Some(command) = &o.command {
                spec.command = command.clone();
            }
            tracing::debug!(%lang, image = %spec.image, "Applied language override");
        }
        Ok(registry)
    }

    /// Look up the spec of `language_id`.
    pub fn resolve(&self, language_id: &str) -> Result<&LanguageSpec, JudgeError> {
        let lang: Language = language_id.parse()?;
        self.get(lang)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(language_id.to_owned()))
    }

    pub fn get(&self, lang: Language) -> Option<&LanguageSpec> {
        self.specs.get(&lang)
    }

    /// All specs, in the order of [`Language::ALL`].
    pub fn iter(&self) -> impl Iterator<Item = &LanguageSpec> {
        Language::ALL.iter().filter_map(move |lang| self.specs.get(lang))
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
