//! Purpose: Interactive numbered-menu front-end over the student store.
//! Exports: `Menu`, `is_affirmative`.
//! Role: Terminal caller; prompts for fields and reports store results.
//! Invariants: Store errors are reported and the loop continues; only i/o errors end it.
//! Invariants: No prompt is issued while a store call is in progress.

use std::io::{self, BufRead, Write};

use studentdb::api::{Error, ErrorKind, StudentFields, StudentRecord, StudentStore, parse_age};

use crate::{STUDENT_HEADERS, error_message, render_table, student_rows};

const RULE: &str = "==================================================";

pub(crate) struct Menu<'a, R, W> {
    store: &'a StudentStore,
    input: R,
    output: W,
}

impl<'a, R: BufRead, W: Write> Menu<'a, R, W> {
    pub(crate) fn new(store: &'a StudentStore, input: R, output: W) -> Self {
        Self {
            store,
            input,
            output,
        }
    }

    pub(crate) fn run(&mut self) -> io::Result<()> {
        writeln!(self.output, "Welcome to the Student Database Management System")?;
        loop {
            self.display_menu()?;
            let Some(choice) = self.prompt("Enter your choice (1-6): ")? else {
                writeln!(self.output)?;
                writeln!(self.output, "Goodbye!")?;
                return Ok(());
            };
            match choice.trim() {
                "1" => self.add_student()?,
                "2" => self.view_all_students()?,
                "3" => self.update_student()?,
                "4" => self.delete_student()?,
                "5" => self.search_students()?,
                "6" => {
                    writeln!(self.output, "Goodbye!")?;
                    return Ok(());
                }
                _ => writeln!(
                    self.output,
                    "error: invalid choice, enter a number between 1 and 6"
                )?,
            }
        }
    }

    fn display_menu(&mut self) -> io::Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "{RULE}")?;
        writeln!(self.output, "  STUDENT DATABASE MANAGEMENT SYSTEM")?;
        writeln!(self.output, "{RULE}")?;
        writeln!(self.output, "1. Add Student")?;
        writeln!(self.output, "2. View All Students")?;
        writeln!(self.output, "3. Update Student")?;
        writeln!(self.output, "4. Delete Student")?;
        writeln!(self.output, "5. Search Student")?;
        writeln!(self.output, "6. Exit")?;
        writeln!(self.output, "{RULE}")
    }

    fn add_student(&mut self) -> io::Result<()> {
        writeln!(self.output, "\n=== Add New Student ===")?;
        let Some(name) = self.prompt("Enter student name: ")? else {
            return Ok(());
        };
        let Some(age) = self.prompt("Enter student age: ")? else {
            return Ok(());
        };
        let age = match parse_age(&age) {
            Ok(age) => age,
            Err(err) => return self.report(&err),
        };
        let Some(grade) = self.prompt("Enter student grade (A/B/C/D/F): ")? else {
            return Ok(());
        };
        let Some(email) = self.prompt("Enter student email: ")? else {
            return Ok(());
        };

        let fields = StudentFields::new(
            name.trim(),
            age,
            grade.trim().to_uppercase(),
            email.trim(),
        );
        match self.store.create(&fields) {
            Ok(id) => writeln!(
                self.output,
                "Student '{}' added successfully with ID: {id}",
                fields.name
            ),
            Err(err) => self.report(&err),
        }
    }

    fn view_all_students(&mut self) -> io::Result<()> {
        writeln!(self.output, "\n=== All Students ===")?;
        match self.store.list_all() {
            Ok(records) if records.is_empty() => {
                writeln!(self.output, "No students found in the database.")
            }
            Ok(records) => self.print_table(&records),
            Err(err) => self.report(&err),
        }
    }

    fn update_student(&mut self) -> io::Result<()> {
        writeln!(self.output, "\n=== Update Student ===")?;
        let Some(id) = self.prompt_id("Enter student ID to update: ")? else {
            return Ok(());
        };
        let current = match self.store.get(id) {
            Ok(record) => record,
            Err(err) => return self.report(&err),
        };

        writeln!(
            self.output,
            "\nCurrent details: {}, Age: {}, Grade: {}, Email: {}",
            current.name, current.age, current.grade, current.email
        )?;
        writeln!(
            self.output,
            "Enter new details (press Enter to keep current value):"
        )?;

        let Some(name) = self.prompt(&format!("Name [{}]: ", current.name))? else {
            return Ok(());
        };
        let Some(age) = self.prompt(&format!("Age [{}]: ", current.age))? else {
            return Ok(());
        };
        let age = if age.trim().is_empty() {
            current.age
        } else {
            match parse_age(&age) {
                Ok(age) => age,
                Err(err) => return self.report(&err),
            }
        };
        let Some(grade) = self.prompt(&format!("Grade [{}]: ", current.grade))? else {
            return Ok(());
        };
        let Some(email) = self.prompt(&format!("Email [{}]: ", current.email))? else {
            return Ok(());
        };

        let fields = StudentFields {
            name: keep_or_replace(&name, &current.name),
            age,
            grade: keep_or_replace(&grade.to_uppercase(), &current.grade),
            email: keep_or_replace(&email, &current.email),
        };
        match self.store.update(id, &fields) {
            Ok(record) => writeln!(
                self.output,
                "Student ID {} updated successfully!",
                record.id
            ),
            Err(err) => self.report(&err),
        }
    }

    fn delete_student(&mut self) -> io::Result<()> {
        writeln!(self.output, "\n=== Delete Student ===")?;
        let Some(id) = self.prompt_id("Enter student ID to delete: ")? else {
            return Ok(());
        };
        let current = match self.store.get(id) {
            Ok(record) => record,
            Err(err) => return self.report(&err),
        };

        let question = format!(
            "Are you sure you want to delete '{}'? (yes/no): ",
            current.name
        );
        let Some(answer) = self.prompt(&question)? else {
            return Ok(());
        };
        if !is_affirmative(&answer) {
            return writeln!(self.output, "Deletion cancelled.");
        }
        match self.store.delete(id) {
            Ok(name) => writeln!(self.output, "Student '{name}' deleted successfully!"),
            Err(err) => self.report(&err),
        }
    }

    fn search_students(&mut self) -> io::Result<()> {
        writeln!(self.output, "\n=== Search Student ===")?;
        let Some(term) = self.prompt("Enter search term (name, email, or ID): ")? else {
            return Ok(());
        };
        match self.store.search(term.trim()) {
            Ok(records) if records.is_empty() => writeln!(
                self.output,
                "No students found matching \"{}\"",
                term.trim()
            ),
            Ok(records) => self.print_table(&records),
            Err(err) => self.report(&err),
        }
    }

    fn print_table(&mut self, records: &[StudentRecord]) -> io::Result<()> {
        writeln!(
            self.output,
            "{}",
            render_table(&STUDENT_HEADERS, &student_rows(records))
        )
    }

    fn report(&mut self, err: &Error) -> io::Result<()> {
        match err.id() {
            Some(id) => writeln!(self.output, "error: {} (ID: {id})", error_message(err)),
            None => writeln!(self.output, "error: {}", error_message(err)),
        }
    }

    /// Returns `None` at end of input.
    fn prompt(&mut self, label: &str) -> io::Result<Option<String>> {
        write!(self.output, "{label}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).to_string();
        Ok(Some(trimmed))
    }

    fn prompt_id(&mut self, label: &str) -> io::Result<Option<i64>> {
        let Some(text) = self.prompt(label)? else {
            return Ok(None);
        };
        match parse_id(&text) {
            Ok(id) => Ok(Some(id)),
            Err(err) => {
                self.report(&err)?;
                Ok(None)
            }
        }
    }
}

fn parse_id(text: &str) -> Result<i64, Error> {
    text.trim().parse::<i64>().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("student ID must be a whole number")
            .with_source(err)
    })
}

fn keep_or_replace(input: &str, current: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        current.to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y")
}
