// src/core/metadata.rs

//! Parser for the help-metadata protocol of external commands.
//!
//! An executable describes itself when called with `--help`: everything before a line
//! consisting of `--` is free help text, every line after it is metadata.

use crate::models::{Arity, ExternalMetadata, FlowLink, ParamSpec, ValueType};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    // `O:...`, `F:...`, `A:...`, `N:...`, `M:...`, `flowdepends: ...`, `flowoptions: ...`
    static ref METADATA_LINE_RE: Regex =
        Regex::new(r"^(?P<kind>[OFANM]|flowdepends|flowoptions):\s?(?P<body>.*)$").unwrap();
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetadataError {
    #[error("line {line}: '{content}' is not valid metadata, expected {expected}")]
    InvalidLine {
        line: usize,
        content: String,
        expected: &'static str,
    },
    #[error("line {line}: {reason}")]
    InvalidValue { line: usize, reason: String },
}

const EXPECTED_ANY: &str = "one of O:, F:, A:, N:, M:, flowdepends: or flowoptions:";
const EXPECTED_OPTION: &str = "O:name:type:help[:default]";
const EXPECTED_FLAG: &str = "F:name:help[:default]";
const EXPECTED_ARGUMENT: &str = "A:name:type:help[:nargs[:default]]";
const EXPECTED_FLOWOPTIONS: &str = "flowoptions: target:opt1,opt2";

fn invalid(line: usize, content: &str, expected: &'static str) -> MetadataError {
    MetadataError::InvalidLine {
        line,
        content: content.to_string(),
        expected,
    }
}

fn non_empty<'a>(part: Option<&'a str>) -> Option<&'a str> {
    part.map(str::trim).filter(|p| !p.is_empty())
}

fn parse_type(line: usize, raw: &str) -> Result<ValueType, MetadataError> {
    raw.parse()
        .map_err(|reason| MetadataError::InvalidValue { line, reason })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_metadata_line(
    number: usize,
    content: &str,
    metadata: &mut ExternalMetadata,
) -> Result<(), MetadataError> {
    let caps = METADATA_LINE_RE
        .captures(content)
        .ok_or_else(|| invalid(number, content, EXPECTED_ANY))?;
    let kind = caps.name("kind").map_or("", |m| m.as_str());
    let body = caps.name("body").map_or("", |m| m.as_str());

    match kind {
        "O" => {
            let mut parts = body.splitn(4, ':');
            let name = non_empty(parts.next()).ok_or_else(|| invalid(number, content, EXPECTED_OPTION))?;
            let value_type = parts.next().ok_or_else(|| invalid(number, content, EXPECTED_OPTION))?;
            let help = parts.next().ok_or_else(|| invalid(number, content, EXPECTED_OPTION))?;
            let mut spec = ParamSpec::option(name)
                .value_type(parse_type(number, value_type)?)
                .help(help.trim());
            if let Some(default) = parts.next() {
                spec = spec.default_value(default);
            }
            metadata.params.push(spec);
        }
        "F" => {
            let mut parts = body.splitn(3, ':');
            let name = non_empty(parts.next()).ok_or_else(|| invalid(number, content, EXPECTED_FLAG))?;
            let help = parts.next().ok_or_else(|| invalid(number, content, EXPECTED_FLAG))?;
            let mut spec = ParamSpec::flag(name).help(help.trim());
            if let Some(default) = non_empty(parts.next()) {
                let value: bool = default.parse().map_err(|_| MetadataError::InvalidValue {
                    line: number,
                    reason: format!("flag default must be true or false, found '{}'", default),
                })?;
                spec = spec.default_value(&value.to_string());
            }
            metadata.params.push(spec);
        }
        "A" => {
            let mut parts = body.splitn(5, ':');
            let name = non_empty(parts.next()).ok_or_else(|| invalid(number, content, EXPECTED_ARGUMENT))?;
            let value_type = parts.next().ok_or_else(|| invalid(number, content, EXPECTED_ARGUMENT))?;
            let help = parts.next().ok_or_else(|| invalid(number, content, EXPECTED_ARGUMENT))?;
            let mut spec = ParamSpec::argument(name)
                .value_type(parse_type(number, value_type)?)
                .help(help.trim())
                .required();
            if let Some(nargs) = non_empty(parts.next()) {
                let count: i64 = nargs.parse().map_err(|_| MetadataError::InvalidValue {
                    line: number,
                    reason: format!("nargs must be an integer, found '{}'", nargs),
                })?;
                spec.arity = match count {
                    -1 => Arity::Many,
                    1 => Arity::One,
                    n if n > 1 => Arity::Exactly(usize::try_from(n).unwrap_or(1)),
                    _ => {
                        return Err(MetadataError::InvalidValue {
                            line: number,
                            reason: format!("nargs must be -1 or positive, found {}", count),
                        });
                    }
                };
            }
            if let Some(default) = parts.next() {
                spec.required = false;
                spec.default = if spec.arity == Arity::One {
                    vec![default.to_string()]
                } else {
                    default.split_whitespace().map(str::to_string).collect()
                };
            }
            if spec.arity == Arity::Many {
                spec.required = false;
            }
            metadata.params.push(spec);
        }
        "N" => {
            metadata
                .params
                .push(ParamSpec::remainder("args").help(body.trim()));
            metadata.ignore_unknown_options = true;
        }
        "M" => {
            for flag in body.trim().chars() {
                match flag {
                    'I' => metadata.ignore_unknown_options = true,
                    'D' => metadata.handle_dry_run = true,
                    other => {
                        return Err(MetadataError::InvalidValue {
                            line: number,
                            reason: format!("unknown metadata flag '{}', expected I or D", other),
                        });
                    }
                }
            }
        }
        "flowdepends" => metadata.flowdepends.extend(split_list(body)),
        "flowoptions" => {
            let (target, params) = body
                .split_once(':')
                .ok_or_else(|| invalid(number, content, EXPECTED_FLOWOPTIONS))?;
            let target = target.trim();
            if target.is_empty() {
                return Err(invalid(number, content, EXPECTED_FLOWOPTIONS));
            }
            metadata.flow_links.push(FlowLink {
                target: target.to_string(),
                params: split_list(params),
            });
        }
        _ => return Err(invalid(number, content, EXPECTED_ANY)),
    }
    Ok(())
}

/// Parses the output of `<executable> --help`.
///
/// Output without a `--` line is pure help text. Line numbers in errors are 1-based and
/// count from the start of the output.
pub fn parse_help_output(output: &str) -> Result<ExternalMetadata, MetadataError> {
    let mut metadata = ExternalMetadata::default();
    let mut help_lines = Vec::new();
    let mut in_metadata = false;

    for (index, raw) in output.lines().enumerate() {
        let line = raw.trim_end();
        if !in_metadata {
            if line.trim() == "--" {
                in_metadata = true;
            } else {
                help_lines.push(line);
            }
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        parse_metadata_line(index + 1, line.trim_start(), &mut metadata)?;
    }

    metadata.help = help_lines.join("\n").trim().to_string();
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParamKind;

    #[test]
    fn test_full_metadata_block() {
        let output = "\
Deploy the application.

Longer description.
--
O:target:[dev|prod]:Where to deploy:dev
F:force:Skip confirmations
A:services:str:Services to deploy:-1
M:D
flowdepends: build, test
flowoptions: build:target,force
";
        let meta = parse_help_output(output).unwrap();

        assert_eq!(meta.help, "Deploy the application.\n\nLonger description.");
        assert_eq!(meta.params.len(), 3);
        let target = &meta.params[0];
        assert_eq!(target.kind, ParamKind::Option);
        assert_eq!(
            target.value_type,
            ValueType::Choice(vec!["dev".into(), "prod".into()])
        );
        assert_eq!(target.default, vec!["dev"]);
        assert_eq!(meta.params[1].kind, ParamKind::Flag);
        assert_eq!(meta.params[2].arity, Arity::Many);
        assert!(!meta.params[2].required);
        assert!(meta.handle_dry_run);
        assert!(!meta.ignore_unknown_options);
        assert_eq!(meta.flowdepends, vec!["build", "test"]);
        assert_eq!(
            meta.flow_links,
            vec![FlowLink {
                target: "build".into(),
                params: vec!["target".into(), "force".into()]
            }]
        );
    }

    #[test]
    fn test_help_without_metadata() {
        let meta = parse_help_output("Just a script\n").unwrap();
        assert_eq!(meta.help, "Just a script");
        assert!(meta.params.is_empty());
    }

    #[test]
    fn test_catch_all_arguments() {
        let meta = parse_help_output("--\nN:Arguments passed to make\n").unwrap();
        assert!(meta.params[0].trailing);
        assert!(meta.ignore_unknown_options);
    }

    #[test]
    fn test_error_reports_line_and_expected_format() {
        let err = parse_help_output("help\n--\nO:only-name\n").unwrap_err();
        assert_eq!(
            err,
            MetadataError::InvalidLine {
                line: 3,
                content: "O:only-name".into(),
                expected: EXPECTED_OPTION,
            }
        );
        assert!(err.to_string().contains("O:name:type:help[:default]"));

        let err = parse_help_output("--\nX:what\n").unwrap_err();
        assert!(matches!(err, MetadataError::InvalidLine { line: 2, .. }));

        let err = parse_help_output("--\nA:n:str:help:zero\n").unwrap_err();
        assert!(matches!(err, MetadataError::InvalidValue { line: 2, .. }));
    }
}
