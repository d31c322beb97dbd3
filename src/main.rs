//! Purpose: `studentdb` CLI entry point.
//! Role: Binary crate root; parses args, opens the store, dispatches to a caller.
//! Invariants: One-shot commands emit JSON on stdout (tables only for humans on a TTY).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All record access goes through `api::StudentStore`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};

mod command_dispatch;
mod html;
mod menu;
mod serve;

use studentdb::api::{Error, ErrorKind, StudentRecord, default_db_path, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `studentdb --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let db_path = cli.db.unwrap_or_else(default_db_path);
    let color_mode = cli.color;

    command_dispatch::dispatch_command(cli.command, db_path)
        .map_err(add_busy_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "studentdb",
    version,
    about = "Manage student records from the terminal or a web browser",
    long_about = None,
    after_help = r#"EXAMPLES
  $ studentdb add --name "Ann Lee" --age 20 --grade A --email ann@x.com
  $ studentdb list
  $ studentdb search ann
  $ studentdb update 1 --grade B
  $ studentdb delete 1 --yes
  $ studentdb menu                 # interactive numbered menu
  $ studentdb serve                # web interface on http://127.0.0.1:5000"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        help = "SQLite database file (default: ~/.studentdb/students.db)",
        value_hint = ValueHint::FilePath
    )]
    db: Option<PathBuf>,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Add a student record")]
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, help = "Age as a whole number")]
        age: String,
        #[arg(long, help = "Letter grade (stored as given)")]
        grade: String,
        #[arg(long)]
        email: String,
    },
    #[command(about = "List all students, newest first")]
    List {
        #[arg(long, help = "Emit JSON even on a terminal")]
        json: bool,
    },
    #[command(about = "Show one student by id")]
    Get { id: i64 },
    #[command(
        about = "Update a student; omitted fields keep their current values",
        arg_required_else_help = true
    )]
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        age: Option<String>,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    #[command(about = "Delete a student by id")]
    Delete {
        id: i64,
        #[arg(long, short = 'y', help = "Skip the confirmation prompt")]
        yes: bool,
    },
    #[command(about = "Search by name, email, or id (case-insensitive substring)")]
    Search {
        term: String,
        #[arg(long, help = "Emit JSON even on a terminal")]
        json: bool,
    },
    #[command(about = "Run the interactive terminal menu")]
    Menu,
    #[command(about = "Serve the web interface and JSON API")]
    Serve(ServeArgs),
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:5000", help = "Address to bind")]
    bind: String,
    #[arg(long, help = "Allow binding to a non-loopback address")]
    allow_non_loopback: bool,
    #[arg(long, default_value_t = 64 * 1024, help = "Maximum request body size in bytes")]
    max_body_bytes: u64,
}

fn student_json(record: &StudentRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "age": record.age,
        "grade": record.grade,
        "email": record.email,
    })
}

fn student_rows(records: &[StudentRecord]) -> Vec<Vec<String>> {
    records
        .iter()
        .map(|record| {
            vec![
                record.id.to_string(),
                record.name.clone(),
                record.age.to_string(),
                record.grade.clone(),
                record.email.clone(),
            ]
        })
        .collect()
}

const STUDENT_HEADERS: [&str; 5] = ["ID", "NAME", "AGE", "GRADE", "EMAIL"];

fn emit_students(records: &[StudentRecord], force_json: bool) {
    if !force_json && io::stdout().is_terminal() {
        if records.is_empty() {
            println!("No students found.");
        } else {
            println!("{}", render_table(&STUDENT_HEADERS, &student_rows(records)));
        }
        return;
    }
    let values = records.iter().map(student_json).collect::<Vec<_>>();
    emit_json(json!({ "students": values }));
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let column_count = headers.len();
    let mut sanitized_rows = Vec::with_capacity(rows.len());
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count())
        .collect::<Vec<_>>();

    for row in rows {
        let mut sanitized = Vec::with_capacity(column_count);
        for (idx, width) in widths.iter_mut().enumerate() {
            let value = row.get(idx).map(String::as_str).unwrap_or("");
            let cleaned = sanitize_table_cell(value);
            *width = (*width).max(cleaned.chars().count());
            sanitized.push(cleaned);
        }
        sanitized_rows.push(sanitized);
    }

    let mut lines = Vec::with_capacity(sanitized_rows.len() + 1);
    lines.push(format_table_line(
        &headers
            .iter()
            .map(|header| header.to_string())
            .collect::<Vec<_>>(),
        &widths,
    ));
    for row in sanitized_rows {
        lines.push(format_table_line(&row, &widths));
    }
    lines.join("\n")
}

fn sanitize_table_cell(value: &str) -> String {
    value.replace('\n', "\\n").replace('\r', "\\r")
}

fn format_table_line(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::new();
    for (idx, width) in widths.iter().enumerate() {
        if idx > 0 {
            line.push_str("  ");
        }
        let cell = cells.get(idx).map(String::as_str).unwrap_or("");
        line.push_str(cell);
        let cell_len = cell.chars().count();
        if *width > cell_len && idx + 1 < widths.len() {
            line.push_str(&" ".repeat(*width - cell_len));
        }
    }
    line
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Validation => "invalid input".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::DuplicateEmail => "email already exists".to_string(),
        ErrorKind::Busy => "database is busy".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(id) = err.id() {
        inner.insert("id".to_string(), json!(id));
    }
    if let Some(field) = err.field() {
        inner.insert("field".to_string(), json!(field));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(id) = err.id() {
        lines.push(format!(
            "{} {id}",
            colorize_label("id:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn add_busy_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Busy || err.hint().is_some() {
        return err;
    }
    err.with_hint("Another studentdb process holds the write lock; retry shortly.")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{
        Error, ErrorKind, StudentRecord, error_json, error_text, render_table, student_json,
        student_rows,
    };

    fn ann() -> StudentRecord {
        StudentRecord {
            id: 1,
            name: "Ann Lee".to_string(),
            age: 20,
            grade: "A".to_string(),
            email: "ann@x.com".to_string(),
        }
    }

    #[test]
    fn render_table_pads_columns() {
        let table = render_table(
            &["ID", "NAME"],
            &[
                vec!["1".to_string(), "Ann".to_string()],
                vec!["10".to_string(), "Bo".to_string()],
            ],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines, vec!["ID  NAME", "1   Ann", "10  Bo"]);
    }

    #[test]
    fn render_table_escapes_newlines() {
        let table = render_table(&["NAME"], &[vec!["a\nb".to_string()]]);
        assert!(table.contains("a\\nb"));
    }

    #[test]
    fn student_rows_follow_header_order() {
        let rows = student_rows(&[ann()]);
        assert_eq!(rows[0], vec!["1", "Ann Lee", "20", "A", "ann@x.com"]);
    }

    #[test]
    fn student_json_has_all_fields() {
        let value = student_json(&ann());
        assert_eq!(value["id"], 1);
        assert_eq!(value["email"], "ann@x.com");
        assert_eq!(value["age"], 20);
    }

    #[test]
    fn error_json_carries_kind_id_and_hint() {
        let err = Error::new(ErrorKind::NotFound)
            .with_message("student not found")
            .with_id(4)
            .with_hint("List students to find a valid id.");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "NotFound");
        assert_eq!(value["error"]["id"], 4);
        assert_eq!(value["error"]["hint"], "List students to find a valid id.");
    }

    #[test]
    fn error_text_without_color_is_plain() {
        let err = Error::new(ErrorKind::DuplicateEmail).with_message("email already exists");
        let text = error_text(&err, false);
        assert_eq!(text, "error: email already exists");
    }
}
