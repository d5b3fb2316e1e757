use std::{
    collections::{
        BTreeMap,
        HashSet,
    },
    fmt,
    str::FromStr,
};

use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;

use crate::{
    error::GradeError,
    template,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageKey {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Cpp,
    CSharp,
    Go,
    Rust,
}

impl LanguageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Go => "go",
            Self::Rust => "rust",
        }
    }
}

impl fmt::Display for LanguageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageKey {
    type Err = GradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" => Ok(Self::Python),
            "javascript" => Ok(Self::JavaScript),
            "typescript" => Ok(Self::TypeScript),
            "java" => Ok(Self::Java),
            "cpp" => Ok(Self::Cpp),
            "csharp" => Ok(Self::CSharp),
            "go" => Ok(Self::Go),
            "rust" => Ok(Self::Rust),
            _ => Err(GradeError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Everything needed to run one language on the execution service.
///
/// `program_template` wraps the user's source and receives `{{source}}` and
/// `{{calls}}`; `call_template` is rendered once per test argument with
/// `{{function_name}}` and `{{args}}`. Both may use `{{indent}}`.
/// `empty_body` replaces `{{calls}}` when there are no arguments, for languages
/// where an empty block does not parse.
#[derive(Debug, Clone)]
pub struct LanguageDescriptor {
    pub key: LanguageKey,
    pub name: &'static str,
    pub judge0_id: u32,
    pub program_template: &'static str,
    pub call_template: &'static str,
    pub empty_body: Option<&'static str>,
}

const PYTHON_PROGRAM: &str = r#"{{source}}


if __name__ == "__main__":
{{calls}}
"#;

const JAVASCRIPT_PROGRAM: &str = r#"{{source}}

function __harnessFormat(value) {
{{indent}}return typeof value === "string" ? value : JSON.stringify(value);
}

{{calls}}
"#;

const TYPESCRIPT_PROGRAM: &str = r#"{{source}}

function __harnessFormat(value: unknown): string {
{{indent}}return typeof value === "string" ? value : JSON.stringify(value);
}

{{calls}}
"#;

const JAVA_PROGRAM: &str = r#"import java.util.*;

{{source}}

public class Main {
{{indent}}public static void main(String[] args) {
{{calls}}
{{indent}}}

{{indent}}private static String format(Object value) {
{{indent}}{{indent}}if (value instanceof int[]) return Arrays.toString((int[]) value);
{{indent}}{{indent}}if (value instanceof long[]) return Arrays.toString((long[]) value);
{{indent}}{{indent}}if (value instanceof double[]) return Arrays.toString((double[]) value);
{{indent}}{{indent}}if (value instanceof boolean[]) return Arrays.toString((boolean[]) value);
{{indent}}{{indent}}if (value instanceof char[]) return Arrays.toString((char[]) value);
{{indent}}{{indent}}if (value instanceof Object[]) return Arrays.deepToString((Object[]) value);
{{indent}}{{indent}}return String.valueOf(value);
{{indent}}}
}
"#;

const CPP_PROGRAM: &str = r#"#include <bits/stdc++.h>
using namespace std;

{{source}}

template <typename T>
void harness_print(ostream& out, const T& value) {
{{indent}}out << value;
}

void harness_print(ostream& out, bool value) {
{{indent}}out << (value ? "true" : "false");
}

template <typename T>
void harness_print(ostream& out, const vector<T>& values) {
{{indent}}out << "[";
{{indent}}for (size_t i = 0; i < values.size(); ++i) {
{{indent}}{{indent}}if (i > 0) out << ",";
{{indent}}{{indent}}harness_print(out, static_cast<T>(values[i]));
{{indent}}}
{{indent}}out << "]";
}

int main() {
{{calls}}
{{indent}}return 0;
}
"#;

const CSHARP_PROGRAM: &str = r#"using System;
using System.Collections;
using System.Collections.Generic;
using System.Linq;

{{source}}

public static class HarnessProgram {
{{indent}}public static void Main() {
{{calls}}
{{indent}}}

{{indent}}private static string Format(object value) {
{{indent}}{{indent}}if (value is bool flag) return flag ? "true" : "false";
{{indent}}{{indent}}if (value is string text) return text;
{{indent}}{{indent}}if (value is IEnumerable items) return "[" + string.Join(",", items.Cast<object>().Select(Format)) + "]";
{{indent}}{{indent}}return Convert.ToString(value);
{{indent}}}
}
"#;

const GO_PROGRAM: &str = r#"package main

import harnessfmt "fmt"

{{source}}

var _ = harnessfmt.Println

func main() {
{{calls}}
}
"#;

const RUST_PROGRAM: &str = r#"{{source}}

fn main() {
{{calls}}
}
"#;

static BUILTIN: [LanguageDescriptor; 8] = [
    LanguageDescriptor {
        key: LanguageKey::Python,
        name: "Python (3.8.1)",
        judge0_id: 71,
        program_template: PYTHON_PROGRAM,
        call_template: "{{indent}}print({{function_name}}({{args}}))",
        empty_body: Some("{{indent}}pass"),
    },
    LanguageDescriptor {
        key: LanguageKey::JavaScript,
        name: "JavaScript (Node.js 12.14.0)",
        judge0_id: 63,
        program_template: JAVASCRIPT_PROGRAM,
        call_template: "console.log(__harnessFormat({{function_name}}({{args}})));",
        empty_body: None,
    },
    LanguageDescriptor {
        key: LanguageKey::TypeScript,
        name: "TypeScript (3.7.4)",
        judge0_id: 74,
        program_template: TYPESCRIPT_PROGRAM,
        call_template: "console.log(__harnessFormat({{function_name}}({{args}})));",
        empty_body: None,
    },
    LanguageDescriptor {
        key: LanguageKey::Java,
        name: "Java (OpenJDK 13.0.1)",
        judge0_id: 62,
        program_template: JAVA_PROGRAM,
        call_template: "{{indent}}{{indent}}System.out.println(format(new Solution().{{function_name}}({{args}})));",
        empty_body: None,
    },
    LanguageDescriptor {
        key: LanguageKey::Cpp,
        name: "C++ (GCC 9.2.0)",
        judge0_id: 54,
        program_template: CPP_PROGRAM,
        call_template: "{{indent}}harness_print(cout, Solution().{{function_name}}({{args}}));\n{{indent}}cout << '\\n';",
        empty_body: None,
    },
    LanguageDescriptor {
        key: LanguageKey::CSharp,
        name: "C# (Mono 6.6.0.161)",
        judge0_id: 51,
        program_template: CSHARP_PROGRAM,
        call_template: "{{indent}}{{indent}}Console.WriteLine(Format(new Solution().{{function_name}}({{args}})));",
        empty_body: None,
    },
    LanguageDescriptor {
        key: LanguageKey::Go,
        name: "Go (1.13.5)",
        judge0_id: 60,
        program_template: GO_PROGRAM,
        call_template: "{{indent}}harnessfmt.Println({{function_name}}({{args}}))",
        empty_body: None,
    },
    LanguageDescriptor {
        key: LanguageKey::Rust,
        name: "Rust (1.40.0)",
        judge0_id: 73,
        program_template: RUST_PROGRAM,
        call_template: "{{indent}}println!(\"{:?}\", {{function_name}}({{args}}));",
        empty_body: None,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no languages enabled")]
    Empty,
    #[error("language {0} is registered twice")]
    DuplicateKey(LanguageKey),
    #[error("execution service id {0} is used by more than one language")]
    DuplicateExternalId(u32),
    #[error("language {key} has an empty {field}")]
    MissingField {
        key: LanguageKey,
        field: &'static str,
    },
    #[error("language {key}: {template} lacks placeholder {{{{{placeholder}}}}}")]
    MissingPlaceholder {
        key: LanguageKey,
        template: &'static str,
        placeholder: &'static str,
    },
    #[error("language {key}: {template} uses unknown placeholder {{{{{placeholder}}}}}")]
    UnknownPlaceholder {
        key: LanguageKey,
        template: &'static str,
        placeholder: String,
    },
}

/// Frozen lookup of the languages this process accepts.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: BTreeMap<LanguageKey, &'static LanguageDescriptor>,
}

impl LanguageRegistry {
    /// Validates the builtin table and keeps the enabled subset (all when `None`).
    pub fn load(enabled: Option<&[LanguageKey]>) -> Result<Self, RegistryError> {
        validate_descriptors(&BUILTIN)?;

        let languages = BUILTIN
            .iter()
            .filter(|d| enabled.is_none_or(|keys| keys.contains(&d.key)))
            .map(|d| (d.key, d))
            .collect::<BTreeMap<_, _>>();

        if languages.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(Self { languages })
    }

    pub fn builtin() -> Result<Self, RegistryError> {
        Self::load(None)
    }

    pub fn get(&self, key: &str) -> Result<&'static LanguageDescriptor, GradeError> {
        let parsed = key.parse::<LanguageKey>()?;
        self.languages
            .get(&parsed)
            .copied()
            .ok_or_else(|| GradeError::UnsupportedLanguage(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static LanguageDescriptor> + '_ {
        self.languages.values().copied()
    }
}

const PROGRAM_PLACEHOLDERS: &[&str] = &["source", "calls", "indent"];
const CALL_PLACEHOLDERS: &[&str] = &["function_name", "args", "indent"];
const EMPTY_BODY_PLACEHOLDERS: &[&str] = &["indent"];

pub fn validate_descriptors(descriptors: &[LanguageDescriptor]) -> Result<(), RegistryError> {
    if descriptors.is_empty() {
        return Err(RegistryError::Empty);
    }

    let mut keys = HashSet::new();
    let mut ids = HashSet::new();
    for d in descriptors {
        if !keys.insert(d.key) {
            return Err(RegistryError::DuplicateKey(d.key));
        }
        if !ids.insert(d.judge0_id) {
            return Err(RegistryError::DuplicateExternalId(d.judge0_id));
        }
        if d.name.trim().is_empty() {
            return Err(RegistryError::MissingField {
                key: d.key,
                field: "name",
            });
        }
        if d.judge0_id == 0 {
            return Err(RegistryError::MissingField {
                key: d.key,
                field: "judge0_id",
            });
        }

        check_template(d.key, "program_template", d.program_template, PROGRAM_PLACEHOLDERS, &[
            "source", "calls",
        ])?;
        check_template(d.key, "call_template", d.call_template, CALL_PLACEHOLDERS, &[
            "function_name",
            "args",
        ])?;
        if let Some(body) = d.empty_body {
            check_template(d.key, "empty_body", body, EMPTY_BODY_PLACEHOLDERS, &[])?;
        }
    }
    Ok(())
}

fn check_template(
    key: LanguageKey,
    name: &'static str,
    body: &str,
    allowed: &[&str],
    required: &[&'static str],
) -> Result<(), RegistryError> {
    if body.trim().is_empty() {
        return Err(RegistryError::MissingField { key, field: name });
    }

    let used = template::placeholders(body);
    if let Some(unknown) = used.iter().copied().find(|p| !allowed.contains(p)) {
        return Err(RegistryError::UnknownPlaceholder {
            key,
            template: name,
            placeholder: unknown.to_string(),
        });
    }
    if let Some(missing) = required.iter().copied().find(|p| !used.contains(p)) {
        return Err(RegistryError::MissingPlaceholder {
            key,
            template: name,
            placeholder: missing,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(key: LanguageKey, judge0_id: u32) -> LanguageDescriptor {
        LanguageDescriptor {
            key,
            name: "Test",
            judge0_id,
            program_template: "{{source}}\n{{calls}}",
            call_template: "{{function_name}}({{args}})",
            empty_body: None,
        }
    }

    #[test]
    fn builtin_table_is_complete() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert_eq!(registry.iter().count(), 8);
        assert_eq!(registry.get("python").unwrap().judge0_id, 71);
        assert_eq!(registry.get("Java").unwrap().key, LanguageKey::Java);
        assert_eq!(registry.get("cpp").unwrap().judge0_id, 54);
    }

    #[test]
    fn unknown_key_is_unsupported() {
        let registry = LanguageRegistry::builtin().unwrap();
        let err = registry.get("cobol").unwrap_err();
        assert!(matches!(err, GradeError::UnsupportedLanguage(key) if key == "cobol"));
    }

    #[test]
    fn disabled_key_is_unsupported() {
        let registry = LanguageRegistry::load(Some(&[LanguageKey::Python])).unwrap();
        assert!(registry.get("python").is_ok());
        assert!(matches!(
            registry.get("rust"),
            Err(GradeError::UnsupportedLanguage(_))
        ));
        assert_eq!(registry.iter().map(|d| d.judge0_id).collect::<Vec<_>>(), vec![71]);
    }

    #[test]
    fn empty_selection_fails_fast() {
        assert_eq!(
            LanguageRegistry::load(Some(&[])).unwrap_err(),
            RegistryError::Empty
        );
    }

    #[test]
    fn rejects_duplicate_external_ids() {
        let table = [descriptor(LanguageKey::Go, 1), descriptor(LanguageKey::Rust, 1)];
        assert_eq!(
            validate_descriptors(&table).unwrap_err(),
            RegistryError::DuplicateExternalId(1)
        );
    }

    #[test]
    fn rejects_templates_without_required_placeholders() {
        let mut broken = descriptor(LanguageKey::Go, 60);
        broken.call_template = "{{function_name}}()";
        assert_eq!(
            validate_descriptors(&[broken]).unwrap_err(),
            RegistryError::MissingPlaceholder {
                key: LanguageKey::Go,
                template: "call_template",
                placeholder: "args",
            }
        );
    }

    #[test]
    fn rejects_unknown_placeholders() {
        let mut broken = descriptor(LanguageKey::Go, 60);
        broken.program_template = "{{source}}{{calls}}{{return_type}}";
        assert!(matches!(
            validate_descriptors(&[broken]).unwrap_err(),
            RegistryError::UnknownPlaceholder { placeholder, .. } if placeholder == "return_type"
        ));
    }
}
