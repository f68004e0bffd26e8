//! Project template catalog
//!
//! A fixed catalog keyed by (language, framework, type), with a default
//! template per language and a generic one beneath that. Placeholders
//! use `{{key}}` form: keys present in the variable map substitute their
//! value, unknown placeholders are left verbatim. The assembler always
//! populates the standard variable set, so a metadata field that is
//! absent substitutes as empty rather than leaking a placeholder.

use std::collections::BTreeMap;

use qlflow_core::FileKind;

/// One templated file
#[derive(Debug, Clone)]
pub struct TemplateFile {
    pub path: &'static str,
    pub content: &'static str,
    pub mode: u32,
    pub kind: FileKind,
}

/// A project template
#[derive(Debug, Clone)]
pub struct ProjectTemplate {
    pub key: &'static str,
    pub files: &'static [TemplateFile],
    pub dependencies: &'static [&'static str],
    pub build_command: &'static str,
    pub start_command: &'static str,
    pub test_command: &'static str,
}

const fn file(path: &'static str, content: &'static str, kind: FileKind) -> TemplateFile {
    TemplateFile {
        path,
        content,
        mode: 0o644,
        kind,
    }
}

const GITIGNORE: &str = "__pycache__/\n*.pyc\nnode_modules/\ntarget/\n.env\n";

static PYTHON_FASTAPI_API: ProjectTemplate = ProjectTemplate {
    key: "python/fastapi/api",
    files: &[
        file(
            "requirements.txt",
            "fastapi>=0.110\nuvicorn[standard]>=0.29\n",
            FileKind::Config,
        ),
        file(".gitignore", GITIGNORE, FileKind::Config),
    ],
    dependencies: &["fastapi", "uvicorn"],
    build_command: "pip install -r requirements.txt",
    start_command: "uvicorn main:app --host 0.0.0.0 --port 8000",
    test_command: "pytest",
};

static PYTHON_DEFAULT: ProjectTemplate = ProjectTemplate {
    key: "python",
    files: &[
        file("requirements.txt", "", FileKind::Config),
        file(".gitignore", GITIGNORE, FileKind::Config),
    ],
    dependencies: &[],
    build_command: "pip install -r requirements.txt",
    start_command: "python main.py",
    test_command: "pytest",
};

static GO_DEFAULT: ProjectTemplate = ProjectTemplate {
    key: "go",
    files: &[
        file("go.mod", "module {{name}}\n\ngo 1.22\n", FileKind::Config),
        file(".gitignore", GITIGNORE, FileKind::Config),
    ],
    dependencies: &[],
    build_command: "go build ./...",
    start_command: "go run main.go",
    test_command: "go test ./...",
};

static NODE_DEFAULT: ProjectTemplate = ProjectTemplate {
    key: "javascript",
    files: &[
        file(
            "package.json",
            "{\n  \"name\": \"{{name}}\",\n  \"version\": \"{{version}}\",\n  \"description\": \"{{description}}\",\n  \"main\": \"index.js\",\n  \"scripts\": {\n    \"start\": \"node index.js\",\n    \"test\": \"node --test\"\n  },\n  \"license\": \"{{license}}\"\n}\n",
            FileKind::Config,
        ),
        file(".gitignore", GITIGNORE, FileKind::Config),
    ],
    dependencies: &[],
    build_command: "npm install",
    start_command: "node index.js",
    test_command: "npm test",
};

static TYPESCRIPT_DEFAULT: ProjectTemplate = ProjectTemplate {
    key: "typescript",
    files: &[
        file(
            "package.json",
            "{\n  \"name\": \"{{name}}\",\n  \"version\": \"{{version}}\",\n  \"description\": \"{{description}}\",\n  \"main\": \"index.ts\",\n  \"scripts\": {\n    \"build\": \"tsc\",\n    \"start\": \"ts-node index.ts\",\n    \"test\": \"node --test\"\n  },\n  \"license\": \"{{license}}\"\n}\n",
            FileKind::Config,
        ),
        file(
            "tsconfig.json",
            "{\n  \"compilerOptions\": {\n    \"target\": \"ES2022\",\n    \"module\": \"commonjs\",\n    \"strict\": true,\n    \"outDir\": \"dist\"\n  }\n}\n",
            FileKind::Config,
        ),
        file(".gitignore", GITIGNORE, FileKind::Config),
    ],
    dependencies: &["typescript", "ts-node"],
    build_command: "npm install && npm run build",
    start_command: "npm start",
    test_command: "npm test",
};

static RUST_DEFAULT: ProjectTemplate = ProjectTemplate {
    key: "rust",
    files: &[
        file(
            "Cargo.toml",
            "[package]\nname = \"{{name}}\"\nversion = \"{{version}}\"\nedition = \"2021\"\nlicense = \"{{license}}\"\ndescription = \"{{description}}\"\n",
            FileKind::Config,
        ),
        file(".gitignore", GITIGNORE, FileKind::Config),
    ],
    dependencies: &[],
    build_command: "cargo build --release",
    start_command: "cargo run",
    test_command: "cargo test",
};

static JAVA_DEFAULT: ProjectTemplate = ProjectTemplate {
    key: "java",
    files: &[
        file(
            "pom.xml",
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<project xmlns=\"http://maven.apache.org/POM/4.0.0\">\n  <modelVersion>4.0.0</modelVersion>\n  <groupId>com.quantumlayer</groupId>\n  <artifactId>{{name}}</artifactId>\n  <version>{{version}}</version>\n</project>\n",
            FileKind::Config,
        ),
        file(".gitignore", GITIGNORE, FileKind::Config),
    ],
    dependencies: &[],
    build_command: "mvn compile",
    start_command: "mvn exec:java",
    test_command: "mvn test",
};

static GENERIC: ProjectTemplate = ProjectTemplate {
    key: "generic",
    files: &[file(".gitignore", GITIGNORE, FileKind::Config)],
    dependencies: &[],
    build_command: "",
    start_command: "",
    test_command: "",
};

/// Select a template for (language, framework, type)
///
/// Exact (language, framework, type) match first, then the language
/// default, then generic.
pub fn select(language: &str, framework: Option<&str>, project_type: &str) -> &'static ProjectTemplate {
    let exact = format!(
        "{}/{}/{}",
        language.to_lowercase(),
        framework.unwrap_or("").to_lowercase(),
        project_type.to_lowercase()
    );
    if exact == PYTHON_FASTAPI_API.key {
        return &PYTHON_FASTAPI_API;
    }

    match language.to_lowercase().as_str() {
        "python" => &PYTHON_DEFAULT,
        "go" | "golang" => &GO_DEFAULT,
        "javascript" | "js" | "node" => &NODE_DEFAULT,
        "typescript" | "ts" => &TYPESCRIPT_DEFAULT,
        "rust" => &RUST_DEFAULT,
        "java" => &JAVA_DEFAULT,
        _ => &GENERIC,
    }
}

/// Canonical main-file path for a language
pub fn main_path(language: &str) -> &'static str {
    match language.to_lowercase().as_str() {
        "python" => "main.py",
        "go" | "golang" => "main.go",
        "javascript" | "js" | "node" => "index.js",
        "typescript" | "ts" => "index.ts",
        "java" => "src/main/java/Main.java",
        "rust" => "src/main.rs",
        _ => "main.txt",
    }
}

/// Canonical test-file path for a language
pub fn test_path(language: &str) -> &'static str {
    match language.to_lowercase().as_str() {
        "python" => "test_main.py",
        "go" | "golang" => "main_test.go",
        "javascript" | "js" | "node" => "index.test.js",
        "typescript" | "ts" => "index.test.ts",
        "java" => "src/test/java/MainTest.java",
        "rust" => "tests/main.rs",
        _ => "tests.txt",
    }
}

/// Expand `{{key}}` placeholders against a variable map
///
/// Keys present in the map substitute their value; anything else is left
/// verbatim.
pub fn expand(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match vars.get(key.trim()) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_expand_substitutes_known_keys() {
        let out = expand("name: {{name}} v{{version}}", &vars(&[("name", "adder"), ("version", "1.0.0")]));
        assert_eq!(out, "name: adder v1.0.0");
    }

    #[test]
    fn test_expand_empty_value() {
        let out = expand("by {{author}}.", &vars(&[("author", "")]));
        assert_eq!(out, "by .");
    }

    #[test]
    fn test_expand_unknown_placeholder_left_verbatim() {
        let out = expand("hello {{nobody}}", &vars(&[("name", "x")]));
        assert_eq!(out, "hello {{nobody}}");
    }

    #[test]
    fn test_expand_unterminated_braces() {
        let out = expand("broken {{name", &vars(&[("name", "x")]));
        assert_eq!(out, "broken {{name");
    }

    #[test]
    fn test_select_exact_match() {
        let t = select("python", Some("fastapi"), "api");
        assert_eq!(t.key, "python/fastapi/api");
        assert!(t.dependencies.contains(&"fastapi"));
    }

    #[test]
    fn test_select_language_default() {
        let t = select("python", Some("flask"), "web");
        assert_eq!(t.key, "python");

        let t = select("Go", None, "cli");
        assert_eq!(t.key, "go");
    }

    #[test]
    fn test_select_generic_fallback() {
        let t = select("cobol", None, "api");
        assert_eq!(t.key, "generic");
    }

    #[test]
    fn test_canonical_paths() {
        assert_eq!(main_path("python"), "main.py");
        assert_eq!(main_path("go"), "main.go");
        assert_eq!(main_path("typescript"), "index.ts");
        assert_eq!(main_path("java"), "src/main/java/Main.java");
        assert_eq!(main_path("rust"), "src/main.rs");
        assert_eq!(main_path("cobol"), "main.txt");

        assert_eq!(test_path("python"), "test_main.py");
        assert_eq!(test_path("go"), "main_test.go");
    }
}
