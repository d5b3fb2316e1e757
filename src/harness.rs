//! Wraps raw user source in a per-language harness that calls the function
//! under test once per argument list and prints one line per call.
//!
//! Pure and synchronous: no I/O happens here.

use serde::Deserialize;

use crate::{
    error::{
        GradeError,
        GradeResult,
    },
    language::{
        LanguageKey,
        LanguageRegistry,
    },
    template::{
        self,
        TemplateError,
    },
};

pub const DEFAULT_INDENT: usize = 4;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub language: String,
    pub source: String,
    pub function_name: String,
    pub test_args: Vec<String>,
    #[serde(default)]
    pub indent_width: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledProgram {
    pub language: LanguageKey,
    pub judge0_id: u32,
    pub source: String,
    /// Number of stdout lines a correct run prints.
    pub expected_lines: usize,
}

pub fn assemble(
    registry: &LanguageRegistry,
    request: &SubmissionRequest,
) -> GradeResult<AssembledProgram> {
    let descriptor = registry.get(&request.language)?;
    let width = if request.indent_width == 0 {
        DEFAULT_INDENT
    } else {
        request.indent_width
    };
    let indent = " ".repeat(width);

    let calls = if request.test_args.is_empty() {
        match descriptor.empty_body {
            Some(body) => template::render(body, &[("indent", &indent)]).map_err(template_error)?,
            None => String::new(),
        }
    } else {
        request
            .test_args
            .iter()
            .map(|args| {
                template::render(descriptor.call_template, &[
                    ("indent", &indent),
                    ("function_name", request.function_name.trim()),
                    ("args", args),
                ])
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(template_error)?
            .join("\n")
    };

    let source = template::render(descriptor.program_template, &[
        ("indent", &indent),
        ("source", request.source.trim_end()),
        ("calls", &calls),
    ])
    .map_err(template_error)?;

    Ok(AssembledProgram {
        language: descriptor.key,
        judge0_id: descriptor.judge0_id,
        source,
        expected_lines: request.test_args.len(),
    })
}

// The registry validates every template at startup, so this only fires if a
// descriptor was changed without passing validation.
fn template_error(err: TemplateError) -> GradeError {
    GradeError::InvalidRequest(format!("harness template: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(language: &str, source: &str, args: &[&str]) -> SubmissionRequest {
        SubmissionRequest {
            language: language.to_string(),
            source: source.to_string(),
            function_name: "square".to_string(),
            test_args: args.iter().map(|a| a.to_string()).collect(),
            indent_width: 4,
        }
    }

    fn registry() -> LanguageRegistry {
        LanguageRegistry::builtin().unwrap()
    }

    #[test]
    fn python_harness_prints_one_line_per_argument() {
        let program = assemble(
            &registry(),
            &request("python", "def square(n):\n    return n * n\n", &[
                "1", "2", "3", "4", "5",
            ]),
        )
        .unwrap();

        assert_eq!(program.judge0_id, 71);
        assert_eq!(program.expected_lines, 5);
        assert_eq!(
            program.source,
            "def square(n):\n    return n * n\n\n\nif __name__ == \"__main__\":\n    \
             print(square(1))\n    print(square(2))\n    print(square(3))\n    \
             print(square(4))\n    print(square(5))\n"
        );
    }

    #[test]
    fn calls_keep_argument_order_for_every_language() {
        let args = ["1", "2", "3"];
        for descriptor in registry().iter() {
            let program = assemble(
                &registry(),
                &request(descriptor.key.as_str(), "// user code", &args),
            )
            .unwrap();

            let positions = args
                .iter()
                .map(|a| {
                    program
                        .source
                        .find(&format!("square({a})"))
                        .unwrap_or_else(|| panic!("{} harness lacks call for {a}", descriptor.key))
                })
                .collect::<Vec<_>>();
            assert!(
                positions.windows(2).all(|w| w[0] < w[1]),
                "{} harness reorders calls",
                descriptor.key
            );
            assert_eq!(program.expected_lines, args.len());
            assert!(!program.source.contains("{{"), "{} left a placeholder", descriptor.key);
        }
    }

    #[test]
    fn empty_argument_list_still_renders_a_valid_body() {
        let python = assemble(&registry(), &request("python", "x = 1", &[])).unwrap();
        assert!(python.source.ends_with("if __name__ == \"__main__\":\n    pass\n"));
        assert_eq!(python.expected_lines, 0);

        let java = assemble(&registry(), &request("java", "class Solution {}", &[])).unwrap();
        assert!(java.source.contains("public static void main(String[] args) {\n\n    }"));
    }

    #[test]
    fn indent_width_controls_harness_indentation() {
        let mut req = request("java", "class Solution {}", &["7"]);
        req.indent_width = 2;
        let program = assemble(&registry(), &req).unwrap();
        assert!(
            program
                .source
                .contains("\n    System.out.println(format(new Solution().square(7)));")
        );
        assert!(program.source.contains("\n  public static void main"));
    }

    #[test]
    fn zero_indent_falls_back_to_default() {
        let mut req = request("python", "x = 1", &["1"]);
        req.indent_width = 0;
        let program = assemble(&registry(), &req).unwrap();
        assert!(program.source.contains("\n    print(square(1))"));
    }

    #[test]
    fn user_source_with_braces_is_not_expanded() {
        let program = assemble(
            &registry(),
            &request("rust", "fn square(n: i32) -> i32 { let _s = \"{{calls}}\"; n * n }", &[
                "3",
            ]),
        )
        .unwrap();
        assert!(program.source.contains("\"{{calls}}\""));
        assert!(program.source.contains("println!(\"{:?}\", square(3));"));
    }

    #[test]
    fn go_imports_precede_harness_declarations() {
        let source = "import (\n    \"fmt\"\n    \"sort\"\n)\n\nfunc square(n int) int {\n    \
                      s := []int{n}\n    sort.Ints(s)\n    fmt.Sprint(s)\n    return n * n\n}";
        let program = assemble(&registry(), &request("go", source, &["4"])).unwrap();

        let user_import = program.source.find("\"sort\"").unwrap();
        let first_decl = program.source.find("var _ =").unwrap();
        assert!(user_import < first_decl);
        assert!(program.source.starts_with("package main\n\nimport harnessfmt \"fmt\"\n"));
        assert!(program.source.contains("    harnessfmt.Println(square(4))"));
    }

    #[test]
    fn unsupported_language_is_reported() {
        let err = assemble(&registry(), &request("brainfuck", "+", &["1"])).unwrap_err();
        assert!(matches!(err, GradeError::UnsupportedLanguage(key) if key == "brainfuck"));
    }
}
