//! Purpose: End-to-end tests for the web front-end and JSON API.
//! Exports: None (integration test module).
//! Role: Drive a spawned `studentdb serve` over loopback HTTP.
//! Invariants: Each test uses its own temp database and port.
//! Invariants: Bounded waits avoid test flakiness; servers are killed on drop.

use serde_json::{Value, json};
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(db_path: &std::path::Path) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");
            let base_url = format!("http://{bind}");

            let mut child = Command::new(env!("CARGO_BIN_EXE_studentdb"))
                .arg("--db")
                .arg(db_path)
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;

            match wait_for_server(&mut child, bind.parse()?) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    let url = format!("http://{addr}/healthz");
    let start = Instant::now();
    loop {
        if let Ok(resp) = ureq::get(&url).call() {
            if resp.status() == 200 {
                return Ok(());
            }
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}

fn no_redirect_agent() -> ureq::Agent {
    ureq::AgentBuilder::new().redirects(0).build()
}

/// Returns (status, body) for both success and error statuses.
fn status_and_json(result: Result<ureq::Response, ureq::Error>) -> TestResult<(u16, Value)> {
    match result {
        Ok(resp) => {
            let status = resp.status();
            Ok((status, resp.into_json()?))
        }
        Err(ureq::Error::Status(status, resp)) => Ok((status, resp.into_json()?)),
        Err(err) => Err(err.into()),
    }
}

fn status_and_text(result: Result<ureq::Response, ureq::Error>) -> TestResult<(u16, String)> {
    match result {
        Ok(resp) => {
            let status = resp.status();
            Ok((status, resp.into_string()?))
        }
        Err(ureq::Error::Status(status, resp)) => Ok((status, resp.into_string()?)),
        Err(err) => Err(err.into()),
    }
}

fn send_json(
    server: &TestServer,
    method: &str,
    path: &str,
    body: Value,
) -> Result<ureq::Response, ureq::Error> {
    ureq::request(method, &server.url(path)).send_json(body)
}

fn student(name: &str, age: i64, grade: &str, email: &str) -> Value {
    json!({ "name": name, "age": age, "grade": grade, "email": email })
}

#[test]
fn json_api_walkthrough() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(&temp.path().join("students.db"))?;

    let (status, body) = status_and_json(
        send_json(&server, "POST", "/api/students", student("Ann Lee", 20, "A", "ann@x.com")),
    )?;
    assert_eq!(status, 201);
    assert_eq!(body["student"]["id"], 1);
    assert_eq!(body["student"]["email"], "ann@x.com");

    let (status, body) = status_and_json(
        send_json(&server, "POST", "/api/students", student("Bo Ray", 21, "B", "bo@x.com")),
    )?;
    assert_eq!(status, 201);
    assert_eq!(body["student"]["id"], 2);

    let (_, body) = status_and_json(ureq::get(&server.url("/api/students")).call())?;
    let ids: Vec<i64> = body["students"]
        .as_array()
        .expect("students array")
        .iter()
        .map(|student| student["id"].as_i64().expect("id"))
        .collect();
    assert_eq!(ids, vec![2, 1]);

    let (_, body) = status_and_json(ureq::get(&server.url("/api/students/search?q=ANN")).call())?;
    let found = body["students"].as_array().expect("students array");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], "Ann Lee");

    let (_, body) = status_and_json(ureq::get(&server.url("/api/students/search?q=")).call())?;
    assert!(body["students"].as_array().expect("students array").is_empty());

    let (status, body) = status_and_json(ureq::delete(&server.url("/api/students/1")).call())?;
    assert_eq!(status, 200);
    assert_eq!(body["deleted"]["name"], "Ann Lee");

    let (status, body) = status_and_json(ureq::get(&server.url("/api/students/1")).call())?;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["kind"], "NotFound");
    assert_eq!(body["error"]["id"], 1);
    Ok(())
}

#[test]
fn json_api_reports_duplicates_and_validation() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(&temp.path().join("students.db"))?;

    let (status, _) = status_and_json(
        send_json(&server, "POST", "/api/students", student("Ann Lee", 20, "A", "ann@x.com")),
    )?;
    assert_eq!(status, 201);
    let (status, _) = status_and_json(
        send_json(&server, "POST", "/api/students", student("Bo Ray", 21, "B", "bo@x.com")),
    )?;
    assert_eq!(status, 201);

    let (status, body) = status_and_json(
        send_json(&server, "POST", "/api/students", student("Copy", 30, "C", "ann@x.com")),
    )?;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["kind"], "DuplicateEmail");

    let (status, body) = status_and_json(
        send_json(&server, "PUT", "/api/students/1", student("Ann Lee", 20, "A", "bo@x.com")),
    )?;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["kind"], "DuplicateEmail");

    let (status, body) = status_and_json(
        send_json(&server, "PUT", "/api/students/1", student("Ann Lee", 22, "B", "ann@x.com")),
    )?;
    assert_eq!(status, 200);
    assert_eq!(body["student"]["age"], 22);

    let (status, body) = status_and_json(
        send_json(&server, "POST", "/api/students", json!({
            "name": "",
            "age": 1,
            "grade": "A",
            "email": "e@x.com",
        })),
    )?;
    assert_eq!(status, 422);
    assert_eq!(body["error"]["kind"], "Validation");
    assert_eq!(body["error"]["field"], "name");

    let (status, body) = status_and_json(
        send_json(&server, "POST", "/api/students", json!({
            "name": "Cy",
            "grade": "A",
            "email": "cy@x.com",
        })),
    )?;
    assert_eq!(status, 422);
    assert_eq!(body["error"]["field"], "age");

    let (status, body) = status_and_json(
        send_json(&server, "PUT", "/api/students/99", student("Nobody", 1, "F", "n@x.com")),
    )?;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["kind"], "NotFound");

    let (_, body) = status_and_json(ureq::get(&server.url("/healthz")).call())?;
    assert_eq!(body["students"], 2);
    Ok(())
}

#[test]
fn html_add_redirects_with_flash() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(&temp.path().join("students.db"))?;
    let agent = no_redirect_agent();

    let resp = agent.post(&server.url("/add")).send_form(&[
        ("name", "Ann Lee"),
        ("age", "20"),
        ("grade", "A"),
        ("email", "ann@x.com"),
    ])?;
    assert_eq!(resp.status(), 303);
    let location = resp.header("location").expect("location").to_string();
    assert!(location.starts_with("/?"));

    let page = ureq::get(&server.url(&location)).call()?.into_string()?;
    assert!(page.contains("Student Ann Lee added successfully!"));
    assert!(page.contains("ann@x.com"));
    Ok(())
}

#[test]
fn html_form_errors_rerender_with_values() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(&temp.path().join("students.db"))?;
    let agent = no_redirect_agent();

    let (status, page) = status_and_text(agent.post(&server.url("/add")).send_form(&[
        ("name", "Ann Lee"),
        ("age", "old"),
        ("grade", "A"),
        ("email", "ann@x.com"),
    ]))?;
    assert_eq!(status, 422);
    assert!(page.contains("value=\"old\""));
    assert!(page.contains("age must be a whole number"));
    assert!(!page.contains("All fields are required!"));

    let resp = agent.post(&server.url("/add")).send_form(&[
        ("name", "Ann Lee"),
        ("age", "20"),
        ("grade", "A"),
        ("email", "ann@x.com"),
    ])?;
    assert_eq!(resp.status(), 303);

    let (status, page) = status_and_text(agent.post(&server.url("/add")).send_form(&[
        ("name", "Copy"),
        ("age", "30"),
        ("grade", "C"),
        ("email", "ann@x.com"),
    ]))?;
    assert_eq!(status, 409);
    assert!(page.contains("Email already exists!"));
    assert!(page.contains("value=\"Copy\""));
    Ok(())
}

#[test]
fn html_edit_delete_and_search() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(&temp.path().join("students.db"))?;
    let agent = no_redirect_agent();

    let (status, _) = status_and_json(
        send_json(&server, "POST", "/api/students", student("Ann Lee", 20, "A", "ann@x.com")),
    )?;
    assert_eq!(status, 201);

    let edit_page = ureq::get(&server.url("/edit/1")).call()?.into_string()?;
    assert!(edit_page.contains("value=\"Ann Lee\""));

    let resp = agent.post(&server.url("/edit/1")).send_form(&[
        ("name", "Ann Lee"),
        ("age", "21"),
        ("grade", "B"),
        ("email", "ann@x.com"),
    ])?;
    assert_eq!(resp.status(), 303);

    let page = agent
        .post(&server.url("/search"))
        .send_form(&[("search_term", "ANN")])?
        .into_string()?;
    assert!(page.contains("<td>21</td>"));

    let page = agent
        .post(&server.url("/search"))
        .send_form(&[("search_term", "nobody")])?
        .into_string()?;
    assert!(page.contains("No students found matching &quot;nobody&quot;"));

    let resp = agent.get(&server.url("/edit/42")).call()?;
    assert_eq!(resp.status(), 303);

    let resp = agent.post(&server.url("/edit/42")).send_form(&[
        ("name", "Ghost"),
        ("age", "old"),
        ("grade", "F"),
        ("email", "ghost@x.com"),
    ])?;
    assert_eq!(resp.status(), 303);
    let location = resp.header("location").expect("location").to_string();
    let page = ureq::get(&server.url(&location)).call()?.into_string()?;
    assert!(page.contains("Student not found!"));

    let resp = agent.post(&server.url("/delete/1")).call()?;
    assert_eq!(resp.status(), 303);
    let location = resp.header("location").expect("location").to_string();
    let page = ureq::get(&server.url(&location)).call()?.into_string()?;
    assert!(page.contains("Student Ann Lee deleted successfully!"));

    let resp = agent.post(&server.url("/delete/1")).call()?;
    let location = resp.header("location").expect("location").to_string();
    let page = ureq::get(&server.url(&location)).call()?.into_string()?;
    assert!(page.contains("Student not found!"));
    Ok(())
}
