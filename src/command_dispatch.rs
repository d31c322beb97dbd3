//! Purpose: Hold top-level CLI command dispatch for `studentdb`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Each one-shot command maps onto store operations only; no SQL here.
//! Invariants: The store is opened once per process and dropped before exit.

use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use studentdb::api::{StudentFields, StudentStore, parse_age};

use super::*;

pub(super) fn dispatch_command(command: Command, db_path: PathBuf) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "studentdb", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let bind: SocketAddr = args.bind.parse().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid bind address")
                    .with_hint("Use a host:port value like 127.0.0.1:5000.")
            })?;
            let config = serve::ServeConfig {
                bind,
                db_path,
                allow_non_loopback: args.allow_non_loopback,
                max_body_bytes: args.max_body_bytes,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Menu => {
            let store = open_store(&db_path)?;
            let stdin = io::stdin();
            let mut menu = menu::Menu::new(&store, stdin.lock(), io::stdout());
            menu.run().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("terminal i/o failed")
                    .with_source(err)
            })?;
            Ok(RunOutcome::ok())
        }
        Command::Add {
            name,
            age,
            grade,
            email,
        } => {
            let age = parse_age(&age)?;
            let store = open_store(&db_path)?;
            let fields = StudentFields::new(name, age, grade, email);
            let id = store.create(&fields)?;
            let record = StudentRecord {
                id,
                name: fields.name,
                age: fields.age,
                grade: fields.grade,
                email: fields.email,
            };
            emit_json(json!({ "student": student_json(&record) }));
            Ok(RunOutcome::ok())
        }
        Command::List { json } => {
            let store = open_store(&db_path)?;
            let records = store.list_all()?;
            emit_students(&records, json);
            Ok(RunOutcome::ok())
        }
        Command::Get { id } => {
            let store = open_store(&db_path)?;
            let record = store.get(id)?;
            emit_json(json!({ "student": student_json(&record) }));
            Ok(RunOutcome::ok())
        }
        Command::Update {
            id,
            name,
            age,
            grade,
            email,
        } => {
            if name.is_none() && age.is_none() && grade.is_none() && email.is_none() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("update requires at least one field to change")
                    .with_hint("Pass --name, --age, --grade, or --email."));
            }
            let age = age.as_deref().map(parse_age).transpose()?;
            let store = open_store(&db_path)?;
            let current = store.get(id)?;
            let fields = StudentFields {
                name: name.unwrap_or(current.name),
                age: age.unwrap_or(current.age),
                grade: grade.unwrap_or(current.grade),
                email: email.unwrap_or(current.email),
            };
            let record = store.update(id, &fields)?;
            emit_json(json!({ "student": student_json(&record) }));
            Ok(RunOutcome::ok())
        }
        Command::Delete { id, yes } => {
            if !yes && !io::stdin().is_terminal() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("delete needs confirmation")
                    .with_hint("Re-run with --yes when stdin is not a terminal."));
            }
            let store = open_store(&db_path)?;
            if !yes {
                let current = store.get(id)?;
                if !confirm_delete(&current.name)? {
                    eprintln!("Deletion cancelled.");
                    return Ok(RunOutcome::ok());
                }
            }
            let name = store.delete(id)?;
            emit_json(json!({ "deleted": { "id": id, "name": name } }));
            Ok(RunOutcome::ok())
        }
        Command::Search { term, json } => {
            let store = open_store(&db_path)?;
            let records = store.search(&term)?;
            emit_students(&records, json);
            Ok(RunOutcome::ok())
        }
    }
}

fn open_store(db_path: &Path) -> Result<StudentStore, Error> {
    StudentStore::open(db_path)
}

fn confirm_delete(name: &str) -> Result<bool, Error> {
    let io_error = |err: io::Error| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read confirmation")
            .with_source(err)
    };
    eprint!("Are you sure you want to delete '{name}'? (yes/no): ");
    io::stderr().flush().map_err(io_error)?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).map_err(io_error)?;
    Ok(menu::is_affirmative(&answer))
}
