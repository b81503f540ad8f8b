// Language registry: the single source of truth for toolchains, file
// extensions and starter templates. Adding a language is a data entry
// (built-in or languages.json), not new control flow.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Replaced with the source file name in compile/run argv entries.
pub const SOURCE_PLACEHOLDER: &str = "{source}";
/// Replaced with the produced binary path in compile/run argv entries.
pub const BINARY_PLACEHOLDER: &str = "{binary}";

const BINARY_PATH: &str = "./main";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageSpec {
    /// Identifier used by callers (`"python"`, `"cpp"`, ...).
    pub id: String,
    pub display_name: String,
    pub file_extension: String,
    /// Name the submitted source is written under inside the workspace.
    /// Matters for toolchains with naming rules (e.g. Java's `Main.java`).
    pub source_file: String,
    /// Present for compiled languages; argv with placeholders.
    #[serde(default)]
    pub compile_command: Option<Vec<String>>,
    /// Argv with placeholders, executed once per test case.
    pub run_command: Vec<String>,
    /// Starter code surfaced to clients.
    #[serde(default)]
    pub template: String,
}

impl LanguageSpec {
    pub fn requires_compile(&self) -> bool {
        self.compile_command.is_some()
    }

    pub fn render_compile(&self) -> Option<Vec<String>> {
        self.compile_command.as_ref().map(|argv| self.render(argv))
    }

    pub fn render_run(&self) -> Vec<String> {
        self.render(&self.run_command)
    }

    fn render(&self, argv: &[String]) -> Vec<String> {
        argv.iter()
            .map(|arg| {
                arg.replace(SOURCE_PLACEHOLDER, &self.source_file)
                    .replace(BINARY_PLACEHOLDER, BINARY_PATH)
            })
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageSpec>,
}

#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    specs: HashMap<String, LanguageSpec>,
}

impl LanguageRegistry {
    /// Registry with the built-in language table.
    pub fn builtin() -> Self {
        Self::from_specs(builtin_specs())
    }

    /// Registry from explicit specs. Later entries win on duplicate ids.
    pub fn from_specs(specs: Vec<LanguageSpec>) -> Self {
        let mut map = HashMap::new();
        for spec in specs {
            map.insert(spec.id.clone(), spec);
        }
        Self { specs: map }
    }

    /// Load the registry from a `languages.json` document:
    /// `{"languages": [ ... ]}`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::internal(format!("failed to read {}: {}", path.display(), e))
        })?;
        let file: LanguagesFile = serde_json::from_str(&content).map_err(|e| {
            EngineError::internal(format!("failed to parse {}: {}", path.display(), e))
        })?;
        if file.languages.is_empty() {
            return Err(EngineError::internal(format!(
                "no languages configured in {}",
                path.display()
            )));
        }
        Ok(Self::from_specs(file.languages))
    }

    pub fn resolve(&self, id: &str) -> Result<&LanguageSpec, EngineError> {
        self.specs
            .get(id)
            .ok_or_else(|| EngineError::UnsupportedLanguage(id.to_string()))
    }

    pub fn is_supported(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    /// All specs, sorted by id for stable client menus.
    pub fn list(&self) -> Vec<&LanguageSpec> {
        let mut specs: Vec<&LanguageSpec> = self.specs.values().collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }
}

fn builtin_specs() -> Vec<LanguageSpec> {
    vec![
        LanguageSpec {
            id: "python".to_string(),
            display_name: "Python 3".to_string(),
            file_extension: "py".to_string(),
            source_file: "main.py".to_string(),
            compile_command: None,
            run_command: vec!["python3".to_string(), "{source}".to_string()],
            template: "print(\"Hello, World!\")\n".to_string(),
        },
        LanguageSpec {
            id: "javascript".to_string(),
            display_name: "JavaScript (Node.js)".to_string(),
            file_extension: "js".to_string(),
            source_file: "main.js".to_string(),
            compile_command: None,
            run_command: vec!["node".to_string(), "{source}".to_string()],
            template: "console.log(\"Hello, World!\");\n".to_string(),
        },
        LanguageSpec {
            id: "c".to_string(),
            display_name: "C (GCC)".to_string(),
            file_extension: "c".to_string(),
            source_file: "main.c".to_string(),
            compile_command: Some(vec![
                "gcc".to_string(),
                "-O2".to_string(),
                "-o".to_string(),
                "{binary}".to_string(),
                "{source}".to_string(),
            ]),
            run_command: vec!["{binary}".to_string()],
            template: "#include <stdio.h>\n\nint main(void) {\n    printf(\"Hello, World!\\n\");\n    return 0;\n}\n"
                .to_string(),
        },
        LanguageSpec {
            id: "cpp".to_string(),
            display_name: "C++ (G++, C++17)".to_string(),
            file_extension: "cpp".to_string(),
            source_file: "main.cpp".to_string(),
            compile_command: Some(vec![
                "g++".to_string(),
                "-O2".to_string(),
                "-std=c++17".to_string(),
                "-o".to_string(),
                "{binary}".to_string(),
                "{source}".to_string(),
            ]),
            run_command: vec!["{binary}".to_string()],
            template: "#include <iostream>\n\nint main() {\n    std::cout << \"Hello, World!\" << std::endl;\n    return 0;\n}\n"
                .to_string(),
        },
        LanguageSpec {
            id: "java".to_string(),
            display_name: "Java".to_string(),
            file_extension: "java".to_string(),
            source_file: "Main.java".to_string(),
            compile_command: Some(vec!["javac".to_string(), "{source}".to_string()]),
            run_command: vec![
                "java".to_string(),
                "-cp".to_string(),
                ".".to_string(),
                "Main".to_string(),
            ],
            template: "public class Main {\n    public static void main(String[] args) {\n        System.out.println(\"Hello, World!\");\n    }\n}\n"
                .to_string(),
        },
    ]
}
