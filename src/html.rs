//! Purpose: Render the HTML pages of the web front-end.
//! Exports: `Flash`, `FlashLevel`, `StudentForm`, `FormMode`, and page renderers.
//! Role: Pure string rendering; handlers in `serve` decide what to show.
//! Invariants: Every interpolated value passes through `escape`.

use serde::Deserialize;
use studentdb::api::StudentRecord;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FlashLevel {
    Success,
    Error,
    Info,
}

impl FlashLevel {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            FlashLevel::Success => "success",
            FlashLevel::Error => "error",
            FlashLevel::Info => "info",
        }
    }

    pub(crate) fn parse(value: &str) -> Self {
        match value {
            "success" => FlashLevel::Success,
            "error" => FlashLevel::Error,
            _ => FlashLevel::Info,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub(crate) fn new(level: FlashLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Raw form submission; age stays text until `parse_age` sees it.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct StudentForm {
    pub name: String,
    pub age: String,
    pub grade: String,
    pub email: String,
}

impl StudentForm {
    pub(crate) fn from_record(record: &StudentRecord) -> Self {
        Self {
            name: record.name.clone(),
            age: record.age.to_string(),
            grade: record.grade.clone(),
            email: record.email.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum FormMode {
    Add,
    Edit(i64),
}

pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn layout(title: &str, flash: Option<&Flash>, body: &str) -> String {
    let flash_html = flash
        .map(|flash| {
            format!(
                "<div class=\"flash flash-{}\">{}</div>\n",
                flash.level.as_str(),
                escape(&flash.message)
            )
        })
        .unwrap_or_default();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title} - Student Database</title>
<style>
body {{ font-family: sans-serif; margin: 2rem; }}
table {{ border-collapse: collapse; }}
th, td {{ border: 1px solid #ccc; padding: 0.3rem 0.6rem; text-align: left; }}
.flash {{ padding: 0.5rem; margin-bottom: 1rem; }}
.flash-success {{ background: #e6f4ea; }}
.flash-error {{ background: #fce8e6; }}
.flash-info {{ background: #e8f0fe; }}
form.inline {{ display: inline; }}
</style>
</head>
<body>
<nav><a href="/">All Students</a> | <a href="/add">Add Student</a> | <a href="/search">Search</a></nav>
<h1>{title}</h1>
{flash_html}{body}
</body>
</html>
"#,
        title = escape(title),
    )
}

fn students_table(records: &[StudentRecord], with_actions: bool) -> String {
    let mut html = String::from(
        "<table>\n<tr><th>ID</th><th>Name</th><th>Age</th><th>Grade</th><th>Email</th>",
    );
    if with_actions {
        html.push_str("<th>Actions</th>");
    }
    html.push_str("</tr>\n");
    for record in records {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td>",
            record.id,
            escape(&record.name),
            record.age,
            escape(&record.grade),
            escape(&record.email),
        ));
        if with_actions {
            // The browser confirm is the only guard before the state-changing POST.
            html.push_str(&format!(
                "<td><a href=\"/edit/{id}\">Edit</a> \
                 <form class=\"inline\" method=\"post\" action=\"/delete/{id}\" \
                 onsubmit=\"return confirm('Delete this student?');\">\
                 <button type=\"submit\">Delete</button></form></td>",
                id = record.id,
            ));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>\n");
    html
}

pub(crate) fn index_page(records: &[StudentRecord], flash: Option<&Flash>) -> String {
    let body = if records.is_empty() {
        "<p>No students yet. <a href=\"/add\">Add the first one</a>.</p>\n".to_string()
    } else {
        students_table(records, true)
    };
    layout("All Students", flash, &body)
}

pub(crate) fn student_form_page(
    mode: FormMode,
    values: &StudentForm,
    error: Option<&str>,
) -> String {
    let (title, action, submit) = match mode {
        FormMode::Add => ("Add Student".to_string(), "/add".to_string(), "Add Student"),
        FormMode::Edit(id) => (
            format!("Edit Student {id}"),
            format!("/edit/{id}"),
            "Update Student",
        ),
    };
    let flash = error.map(|message| Flash::new(FlashLevel::Error, message));
    let body = format!(
        r#"<form method="post" action="{action}">
<p><label>Name <input type="text" name="name" value="{name}" required></label></p>
<p><label>Age <input type="number" name="age" value="{age}" required></label></p>
<p><label>Grade <input type="text" name="grade" value="{grade}" required></label></p>
<p><label>Email <input type="email" name="email" value="{email}" required></label></p>
<p><button type="submit">{submit}</button> <a href="/">Cancel</a></p>
</form>
"#,
        name = escape(&values.name),
        age = escape(&values.age),
        grade = escape(&values.grade),
        email = escape(&values.email),
    );
    layout(&title, flash.as_ref(), &body)
}

pub(crate) fn search_page(
    term: Option<&str>,
    results: &[StudentRecord],
    flash: Option<&Flash>,
) -> String {
    let mut body = format!(
        r#"<form method="post" action="/search">
<p><label>Search <input type="text" name="search_term" value="{}" placeholder="name, email, or ID"></label>
<button type="submit">Search</button></p>
</form>
"#,
        escape(term.unwrap_or_default())
    );
    if !results.is_empty() {
        body.push_str(&students_table(results, true));
    }
    layout("Search Students", flash, &body)
}

pub(crate) fn error_page(message: &str) -> String {
    let flash = Flash::new(FlashLevel::Error, message);
    layout("Error", Some(&flash), "<p><a href=\"/\">Back to all students</a></p>\n")
}
