//! Output formatting for sepa-cli (json, csv)

use clap::ValueEnum;
use colored::Colorize;
use sepa_client::{Binding, RdfTerm, TermType};
use serde_json::{json, Value};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// SPARQL JSON results (default)
    #[default]
    Json,
    /// One CSV row per binding
    Csv,
}

impl OutputFormat {
    pub fn parse(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg);
        }
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print a SPARQL results document
    pub fn print_results(&self, results: &Value) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(results).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Csv => {
                let vars: Vec<String> = results
                    .pointer("/head/vars")
                    .and_then(Value::as_array)
                    .map(|vars| {
                        vars.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                let rows: Vec<Binding> = results
                    .pointer("/results/bindings")
                    .and_then(|b| serde_json::from_value(b.clone()).ok())
                    .unwrap_or_default();

                println!("{}", vars.join(","));
                for row in &rows {
                    println!("{}", csv_row(&vars, row));
                }
            }
        }
    }

    /// Print one notification
    pub fn print_delta(&self, added: &[Binding], removed: &[Binding]) {
        match self.format {
            OutputFormat::Json => {
                println!("{}", json!({ "added": added, "removed": removed }));
            }
            OutputFormat::Csv => {
                for (sign, rows) in [("+", added), ("-", removed)] {
                    for row in rows {
                        let vars: Vec<String> = row.keys().cloned().collect();
                        println!("{},{}", sign, csv_row(&vars, row));
                    }
                }
            }
        }
    }
}

fn csv_row(vars: &[String], row: &Binding) -> String {
    vars.iter()
        .map(|var| row.get(var).map(format_term).unwrap_or_default())
        .map(|value| escape_csv(&value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Render a term in SPARQL surface syntax
fn format_term(term: &RdfTerm) -> String {
    match term.kind {
        TermType::Uri => format!("<{}>", term.value),
        TermType::Bnode => format!("_:{}", term.value),
        TermType::Literal => match (&term.lang, &term.datatype) {
            (Some(lang), _) => format!("\"{}\"@{}", term.value, lang),
            (None, Some(datatype)) => format!("\"{}\"^^<{}>", term.value, datatype),
            (None, None) => term.value.clone(),
        },
    }
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_terms() {
        assert_eq!(format_term(&RdfTerm::uri("http://ex/a")), "<http://ex/a>");
        assert_eq!(format_term(&RdfTerm::bnode("b0")), "_:b0");

        let mut tagged = RdfTerm::literal("Ciao");
        tagged.lang = Some("it".into());
        assert_eq!(format_term(&tagged), "\"Ciao\"@it");
    }

    #[test]
    fn test_csv_row_escapes_and_fills_gaps() {
        let row = Binding::from([
            ("a".to_string(), RdfTerm::literal("x,y")),
            ("b".to_string(), RdfTerm::uri("http://ex/b")),
        ]);
        let vars = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        assert_eq!(csv_row(&vars, &row), "\"x,y\",,<http://ex/b>");
    }

    #[test]
    fn test_parse_format_name() {
        assert_eq!(OutputFormat::parse("CSV"), Some(OutputFormat::Csv));
        assert_eq!(OutputFormat::parse("table"), None);
    }
}
